//! Key import and key export drivers
//!
//! Import: one initiator holds a raw private key and deals Shamir shares
//! of it to every listed party; the result is indistinguishable from a
//! fresh keygen except that the key is fixed by the supplied secret.
//!
//! Export: the mirror image. Each exporter wraps its keyshare into a
//! single contribution addressed to one receiver, which reconstructs the
//! raw secret locally. Exporters learn nothing.

use std::collections::BTreeMap;

use k256::{elliptic_curve::PrimeField, ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::driver::{ProtocolDriver, SessionOutput};
use crate::keyshare::Keyshare;
use crate::proto::{
    commitment_eval, decode_commitments, decode_payload, encode_point, feldman_verify,
    lagrange_coefficient, scalar_from_bytes, sha256, Envelope, SecretPolynomial, SessionCore,
};
use crate::setup::{SetupKind, SetupMessage};
use crate::{Error, Result};

const ROUND_DEAL: u8 = 1;
const ROUND_SHARE: u8 = 2;
const ROUND_CONFIRM: u8 = 3;

/// Import round 1: the initiator's Feldman commitments
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImportDeal {
    commitments: Vec<Vec<u8>>,
}

/// Import round 2: one party's share of the imported key
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImportShare {
    share: Vec<u8>,
}

/// Import round 3: an importer confirms the key it verified
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImportConfirm {
    public_key: Vec<u8>,
}

/// Export contribution: an exporter's raw share and its rank
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExportContribution {
    rank: u8,
    share: Vec<u8>,
}

/// Key import driver. The initiator (first listed party) deals; everyone
/// else verifies and confirms.
pub struct KeyImportSession {
    core: SessionCore,
    poly: Option<SecretPolynomial>,
    commitments: Option<Vec<ProjectivePoint>>,
    secret: Option<Scalar>,
    result: Option<Keyshare>,
}

impl KeyImportSession {
    /// Creates the initiator session and the setup message every importer
    /// needs. The initiator is the first entry of `ids`.
    pub fn initiator(
        private_key: &[u8],
        root_chain_code: Option<[u8; 32]>,
        threshold: u8,
        ids: &[&str],
    ) -> Result<(Self, SetupMessage)> {
        if private_key.len() != 32 {
            return Err(Error::SetupMessage("private key must be 32 bytes".into()));
        }
        let array: [u8; 32] = private_key.try_into().map_err(|_| {
            Error::SetupMessage("private key must be 32 bytes".into())
        })?;
        let secret: Option<Scalar> = Option::from(Scalar::from_repr(array.into()));
        let secret = secret
            .filter(|s| s != &Scalar::ZERO)
            .ok_or_else(|| Error::Keygen("private key is not a valid scalar".into()))?;

        let public_point = ProjectivePoint::GENERATOR * secret;
        let public_key = encode_point(&public_point);
        let key_id = sha256(&[&public_key]);

        let setup =
            SetupMessage::key_import(key_id, &public_key, threshold, ids, root_chain_code)?;

        let mut core = SessionCore::new(setup.clone(), ids[0], SetupKind::KeyImport)?;
        let t = threshold as usize;
        let poly = SecretPolynomial::random(t - 1, Some(secret));
        let commitment_bytes = poly.commitments();

        core.push_broadcast(
            ROUND_DEAL,
            &ImportDeal {
                commitments: commitment_bytes.clone(),
            },
        )?;
        for to in 1..core.setup.party_count() as u16 {
            let share = poly.evaluate(to as u64 + 1);
            core.push_direct(
                ROUND_SHARE,
                to,
                &ImportShare {
                    share: share.to_bytes().to_vec(),
                },
            )?;
        }

        let own_secret = poly.evaluate(1);
        let commitments = decode_commitments(&commitment_bytes)?;

        info!(
            party = %ids[0],
            threshold,
            participants = ids.len(),
            "key import initiator created"
        );

        let session = Self {
            core,
            poly: Some(poly),
            commitments: Some(commitments),
            secret: Some(own_secret),
            result: None,
        };
        Ok((session, setup))
    }

    /// Joins a key import as a plain importer.
    pub fn importer(setup: SetupMessage, id: &str) -> Result<Self> {
        let core = SessionCore::new(setup, id, SetupKind::KeyImport)?;
        if core.me == 0 {
            return Err(Error::SetupMessage(
                "the first listed party is the initiator, not an importer".into(),
            ));
        }
        if core.setup.public_key().is_none() {
            return Err(Error::SetupMessage(
                "key import setup carries no public key".into(),
            ));
        }

        info!(party = %id, "key importer created");

        Ok(Self {
            core,
            poly: None,
            commitments: None,
            secret: None,
            result: None,
        })
    }

    fn is_initiator(&self) -> bool {
        self.core.me == 0
    }

    fn expected_confirmers(&self) -> std::collections::BTreeSet<u16> {
        (1..self.core.setup.party_count() as u16)
            .filter(|&i| i != self.core.me)
            .collect()
    }

    fn assemble(&mut self) -> Result<Keyshare> {
        let commitments = self.commitments.as_ref().ok_or(Error::InvalidSessionState)?;
        let secret = self.secret.ok_or(Error::InvalidSessionState)?;
        let setup = &self.core.setup;
        let n = setup.party_count();

        let public_key = encode_point(&commitments[0]);
        let mut public_shares = Vec::with_capacity(n);
        for j in 0..n {
            public_shares.push(encode_point(&commitment_eval(commitments, j as u64 + 1)));
        }

        let key_id = setup.key_id().ok_or(Error::InvalidSessionState)?;

        Ok(Keyshare {
            party_id: self.core.me as u8,
            threshold: setup.threshold(),
            participants: n as u8,
            key_id,
            secret_share: secret,
            public_key,
            public_shares,
            chain_code: setup.root_chain_code(),
        })
    }

    fn advance(&mut self) -> Result<()> {
        let expected_key = self
            .core
            .setup
            .public_key()
            .map(|pk| pk.to_vec())
            .unwrap_or_default();

        if !self.is_initiator() && self.commitments.is_none() {
            let dealer: std::collections::BTreeSet<u16> = [0u16].into_iter().collect();
            if self.core.ledger.round_complete(ROUND_DEAL, &dealer)
                && self.core.ledger.round_complete(ROUND_SHARE, &dealer)
            {
                let deal_round = self.core.ledger.take_round(ROUND_DEAL);
                let share_round = self.core.ledger.take_round(ROUND_SHARE);

                let deal: ImportDeal =
                    decode_payload(&deal_round[&0]).map_err(|_| Error::Abort { party: 0 })?;
                if deal.commitments.len() != self.core.setup.threshold() as usize {
                    return Err(Error::Abort { party: 0 });
                }
                let commitments =
                    decode_commitments(&deal.commitments).map_err(|_| Error::Abort { party: 0 })?;
                if encode_point(&commitments[0]) != expected_key {
                    return Err(Error::Abort { party: 0 });
                }

                let msg: ImportShare =
                    decode_payload(&share_round[&0]).map_err(|_| Error::Abort { party: 0 })?;
                let share =
                    scalar_from_bytes(&msg.share).map_err(|_| Error::Abort { party: 0 })?;
                let my_point = self.core.me as u64 + 1;
                if !feldman_verify(&share, my_point, &commitments) {
                    return Err(Error::Abort { party: 0 });
                }

                self.commitments = Some(commitments);
                self.secret = Some(share);
                self.core.push_broadcast(
                    ROUND_CONFIRM,
                    &ImportConfirm {
                        public_key: expected_key.clone(),
                    },
                )?;
                debug!(party = self.core.me, "imported share verified, confirmed");
            }
        }

        if self.commitments.is_some()
            && !self.core.complete
            && self
                .core
                .ledger
                .round_complete(ROUND_CONFIRM, &self.expected_confirmers())
        {
            let round = self.core.ledger.take_round(ROUND_CONFIRM);
            for &from in &self.expected_confirmers() {
                let msg: ImportConfirm =
                    decode_payload(&round[&from]).map_err(|_| Error::Abort {
                        party: from as usize,
                    })?;
                if msg.public_key != expected_key {
                    return Err(Error::Abort {
                        party: from as usize,
                    });
                }
            }
            self.result = Some(self.assemble()?);
            self.poly = None;
            self.core.complete = true;
            info!(party = self.core.me, "key import session finished");
        }

        Ok(())
    }
}

impl ProtocolDriver for KeyImportSession {
    fn output_message(&mut self) -> Result<Option<Vec<u8>>> {
        self.core.pop_output()
    }

    fn message_receiver(&self, message: &[u8], index: usize) -> Result<Option<String>> {
        self.core.receiver(message, index)
    }

    fn input_message(&mut self, message: &[u8]) -> Result<bool> {
        self.core.accept(message, ROUND_CONFIRM)?;
        match self.advance() {
            Ok(()) => Ok(self.core.complete),
            Err(e) => Err(self.core.record_failure(e)),
        }
    }

    fn finish(&mut self) -> Result<SessionOutput> {
        self.core.finalize()?;
        if let Some(error) = self.core.failure.take() {
            return Err(error);
        }
        match self.result.take() {
            Some(share) => Ok(SessionOutput::Keyshare(Box::new(share))),
            None => Err(Error::InvalidSessionState),
        }
    }
}

/// Receiver side of key export: collects one contribution from every
/// other listed party and reconstructs the raw secret.
pub struct KeyExportSession {
    core: SessionCore,
    keyshare: Keyshare,
    contributions: BTreeMap<u16, (u8, Scalar)>,
    result: Option<Vec<u8>>,
}

impl KeyExportSession {
    /// Creates the receiver session and the setup message the exporters
    /// consume. `ids` must be indexed consistently with the keyshares'
    /// party ids, receiver included.
    pub fn receiver(keyshare: &Keyshare, ids: &[&str]) -> Result<(Self, SetupMessage)> {
        let setup = SetupMessage::key_export(
            keyshare.key_id(),
            &keyshare.public_key(),
            keyshare.threshold(),
            ids,
            keyshare.party_id(),
        )?;
        let receiver_id = ids
            .get(keyshare.party_id() as usize)
            .ok_or_else(|| Error::SetupMessage("receiver index outside the name list".into()))?;

        let core = SessionCore::new(setup.clone(), receiver_id, SetupKind::KeyExport)?;

        info!(
            party = %receiver_id,
            key_id = %hex::encode(keyshare.key_id()),
            "key export receiver created"
        );

        Ok((
            Self {
                core,
                keyshare: keyshare.clone(),
                contributions: BTreeMap::new(),
                result: None,
            },
            setup,
        ))
    }

    fn advance(&mut self) -> Result<()> {
        let others = self.core.others();
        if !self.core.ledger.round_complete(ROUND_DEAL, &others) {
            return Ok(());
        }

        let round = self.core.ledger.take_round(ROUND_DEAL);
        for &from in &others {
            let msg: ExportContribution =
                decode_payload(&round[&from]).map_err(|_| Error::Abort {
                    party: from as usize,
                })?;
            let share = scalar_from_bytes(&msg.share).map_err(|_| Error::Abort {
                party: from as usize,
            })?;
            if msg.rank as usize >= self.keyshare.public_shares.len()
                || msg.rank == self.keyshare.party_id()
                || self.contributions.values().any(|&(r, _)| r == msg.rank)
            {
                return Err(Error::Abort {
                    party: from as usize,
                });
            }
            // a contribution is exactly the sender's share, so it must
            // match the public share at its rank
            let expected = self.keyshare.public_share_point(msg.rank as usize)?;
            if ProjectivePoint::GENERATOR * share != expected {
                return Err(Error::Abort {
                    party: from as usize,
                });
            }
            self.contributions.insert(from, (msg.rank, share));
        }

        let mut points: Vec<u64> = self
            .contributions
            .values()
            .map(|&(r, _)| r as u64 + 1)
            .collect();
        points.push(self.keyshare.party_id() as u64 + 1);

        let own_lambda = lagrange_coefficient(&points, self.keyshare.party_id() as u64 + 1)?;
        let mut secret = own_lambda * self.keyshare.secret_share();
        for &(rank, share) in self.contributions.values() {
            let lambda = lagrange_coefficient(&points, rank as u64 + 1)?;
            secret += lambda * share;
        }

        let reconstructed = encode_point(&(ProjectivePoint::GENERATOR * secret));
        if reconstructed != self.keyshare.public_key() {
            return Err(Error::KeyExport(
                "reconstructed secret does not match the public key".into(),
            ));
        }

        self.result = Some(secret.to_bytes().to_vec());
        self.core.complete = true;
        info!(party = self.core.me, "key export session finished");
        Ok(())
    }
}

impl ProtocolDriver for KeyExportSession {
    fn output_message(&mut self) -> Result<Option<Vec<u8>>> {
        self.core.pop_output()
    }

    fn message_receiver(&self, message: &[u8], index: usize) -> Result<Option<String>> {
        self.core.receiver(message, index)
    }

    fn input_message(&mut self, message: &[u8]) -> Result<bool> {
        self.core.accept(message, ROUND_DEAL)?;
        match self.advance() {
            Ok(()) => Ok(self.core.complete),
            Err(e) => Err(self.core.record_failure(e)),
        }
    }

    fn finish(&mut self) -> Result<SessionOutput> {
        self.core.finalize()?;
        if let Some(error) = self.core.failure.take() {
            return Err(error);
        }
        match self.result.take() {
            Some(secret) => Ok(SessionOutput::Secret(secret)),
            None => Err(Error::InvalidSessionState),
        }
    }
}

/// One-shot exporter: wraps an existing keyshare into a single
/// contribution message and names the receiver it must reach.
pub fn key_exporter(
    setup: &SetupMessage,
    id: &str,
    keyshare: &Keyshare,
) -> Result<(Vec<u8>, String)> {
    if setup.kind() != SetupKind::KeyExport {
        return Err(Error::SetupMessage(
            "setup kind does not match the export protocol".into(),
        ));
    }
    let me = setup.party_index(id)?;
    let receiver = setup
        .receiver()
        .ok_or_else(|| Error::SetupMessage("export setup carries no receiver".into()))? as u16;
    if me == receiver {
        return Err(Error::SetupMessage(
            "the receiver cannot export to itself".into(),
        ));
    }
    if setup.key_id() != Some(keyshare.key_id()) {
        return Err(Error::SetupMessage(
            "keyshare belongs to a different key".into(),
        ));
    }

    let payload = ExportContribution {
        rank: keyshare.party_id(),
        share: keyshare.secret_share().to_bytes().to_vec(),
    };
    let env = Envelope {
        setup: setup.digest()?,
        from: me,
        round: ROUND_DEAL,
        to: Some(receiver),
        payload: crate::proto::encode_payload(&payload)?,
    };

    let receiver_name = setup.parties()[receiver as usize].clone();

    info!(party = %id, receiver = %receiver_name, "key export contribution created");

    Ok((env.encode()?, receiver_name))
}
