//! Distributed key generation driver

use std::collections::BTreeMap;

use k256::{ProjectivePoint, Scalar};
use tracing::{debug, info};

use super::messages::{KeygenRound1, KeygenRound2};
use crate::driver::{ProtocolDriver, SessionOutput};
use crate::keyshare::Keyshare;
use crate::proto::{
    commitment_eval, decode_commitments, decode_payload, encode_point, feldman_verify,
    scalar_from_bytes, sha256, SecretPolynomial, SessionCore,
};
use crate::setup::{SetupKind, SetupMessage};
use crate::{Error, Result};

const ROUND_COMMIT: u8 = 1;
const ROUND_SHARE: u8 = 2;

/// Per-party driver of one fresh key generation.
///
/// Round 1 broadcasts Feldman commitments and a chain-code contribution;
/// round 2 distributes point-to-point shares, verified against the
/// commitments. Every party ends with a Shamir share of a key nobody ever
/// held whole.
pub struct KeygenSession {
    core: SessionCore,
    poly: SecretPolynomial,
    /// Decoded round-1 commitments, own entry included
    commitments: BTreeMap<u16, Vec<ProjectivePoint>>,
    chain_contribs: BTreeMap<u16, [u8; 32]>,
    result: Option<Keyshare>,
}

impl KeygenSession {
    pub fn from_setup(setup: SetupMessage, id: &str) -> Result<Self> {
        let mut core = SessionCore::new(setup, id, SetupKind::Keygen)?;
        let t = core.setup.threshold() as usize;

        let poly = SecretPolynomial::random(t - 1, None);
        let chain_contrib: [u8; 32] = rand::random();
        let commitment_bytes = poly.commitments();

        core.push_broadcast(
            ROUND_COMMIT,
            &KeygenRound1 {
                commitments: commitment_bytes.clone(),
                chain_contrib,
            },
        )?;

        let mut commitments = BTreeMap::new();
        commitments.insert(core.me, decode_commitments(&commitment_bytes)?);
        let mut chain_contribs = BTreeMap::new();
        chain_contribs.insert(core.me, chain_contrib);

        info!(
            party = %id,
            threshold = core.setup.threshold(),
            participants = core.setup.party_count(),
            "keygen session created"
        );

        Ok(Self {
            core,
            poly,
            commitments,
            chain_contribs,
            result: None,
        })
    }

    fn advance(&mut self) -> Result<()> {
        let others = self.core.others();
        let t = self.core.setup.threshold() as usize;

        if self.commitments.len() == 1 && self.core.ledger.round_complete(ROUND_COMMIT, &others) {
            let round = self.core.ledger.take_round(ROUND_COMMIT);
            for (&from, payload) in &round {
                let msg: KeygenRound1 = decode_payload(payload).map_err(|_| Error::Abort {
                    party: from as usize,
                })?;
                if msg.commitments.len() != t {
                    return Err(Error::Abort {
                        party: from as usize,
                    });
                }
                let points = decode_commitments(&msg.commitments).map_err(|_| Error::Abort {
                    party: from as usize,
                })?;
                self.commitments.insert(from, points);
                self.chain_contribs.insert(from, msg.chain_contrib);
            }

            debug!(party = self.core.me, "keygen commitments complete, sending shares");
            for &to in &others {
                let share = self.poly.evaluate(to as u64 + 1);
                self.core.push_direct(
                    ROUND_SHARE,
                    to,
                    &KeygenRound2 {
                        share: share.to_bytes().to_vec(),
                    },
                )?;
            }
        }

        if self.commitments.len() == self.core.setup.party_count()
            && self.core.ledger.round_complete(ROUND_SHARE, &others)
        {
            let round = self.core.ledger.take_round(ROUND_SHARE);
            let my_point = self.core.me as u64 + 1;
            let mut secret = self.poly.evaluate(my_point);

            for &from in &others {
                let payload = &round[&from];
                let msg: KeygenRound2 = decode_payload(payload).map_err(|_| Error::Abort {
                    party: from as usize,
                })?;
                let share = scalar_from_bytes(&msg.share).map_err(|_| Error::Abort {
                    party: from as usize,
                })?;
                if !feldman_verify(&share, my_point, &self.commitments[&from]) {
                    return Err(Error::Abort {
                        party: from as usize,
                    });
                }
                secret += share;
            }

            self.result = Some(assemble_keyshare(
                &self.core.setup,
                self.core.me,
                secret,
                &self.commitments,
                Some(&self.chain_contribs),
            )?);
            self.core.complete = true;

            info!(party = self.core.me, "keygen session finished");
        }

        Ok(())
    }
}

impl ProtocolDriver for KeygenSession {
    fn output_message(&mut self) -> Result<Option<Vec<u8>>> {
        self.core.pop_output()
    }

    fn message_receiver(&self, message: &[u8], index: usize) -> Result<Option<String>> {
        self.core.receiver(message, index)
    }

    fn input_message(&mut self, message: &[u8]) -> Result<bool> {
        self.core.accept(message, ROUND_SHARE)?;
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

/// Builds the keyshare shared state from the full commitment set: the
/// aggregate public key, per-party public shares, chain code, and key id.
pub(super) fn assemble_keyshare(
    setup: &SetupMessage,
    me: u16,
    secret: Scalar,
    commitments: &BTreeMap<u16, Vec<ProjectivePoint>>,
    chain_contribs: Option<&BTreeMap<u16, [u8; 32]>>,
) -> Result<Keyshare> {
    let n = setup.party_count();

    let mut public_point = ProjectivePoint::IDENTITY;
    for points in commitments.values() {
        public_point += points[0];
    }
    if public_point == ProjectivePoint::IDENTITY {
        return Err(Error::Keygen("aggregate public key is the identity".into()));
    }
    let public_key = encode_point(&public_point);

    let mut public_shares = Vec::with_capacity(n);
    for j in 0..n {
        let mut share_point = ProjectivePoint::IDENTITY;
        for points in commitments.values() {
            share_point += commitment_eval(points, j as u64 + 1);
        }
        public_shares.push(encode_point(&share_point));
    }

    let chain_code = chain_contribs.map(|contribs| {
        let parts: Vec<&[u8]> = contribs.values().map(|c| c.as_slice()).collect();
        sha256(&parts)
    });

    let key_id = setup.key_id().unwrap_or_else(|| sha256(&[&public_key]));

    Ok(Keyshare {
        party_id: me as u8,
        threshold: setup.threshold(),
        participants: n as u8,
        key_id,
        secret_share: secret,
        public_key,
        public_shares,
        chain_code,
    })
}
