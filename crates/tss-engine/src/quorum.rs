//! Quorum change driver
//!
//! Re-shares an existing key onto a new party set, possibly with a new
//! threshold, without changing the public key. Parties in the old set
//! contribute their Lagrange-weighted shares as fresh Feldman dealings
//! over the new set's evaluation points; parties joining pass no secret
//! input and receive a derived share at finish. Parties absent from the
//! new set still run to completion so they observe the handover, but
//! finish with no keyshare.

use std::collections::{BTreeMap, BTreeSet};

use k256::ProjectivePoint;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::driver::{ProtocolDriver, SessionOutput};
use crate::keyshare::Keyshare;
use crate::proto::{
    commitment_eval, decode_commitments, decode_payload, decode_point, encode_point,
    feldman_verify, lagrange_coefficient, scalar_from_bytes, SecretPolynomial, SessionCore,
};
use crate::setup::{SetupKind, SetupMessage};
use crate::{Error, Result};

const ROUND_RANK: u8 = 1;
const ROUND_COMMIT: u8 = 2;
const ROUND_SHARE: u8 = 3;
const ROUND_CONFIRM: u8 = 4;

/// Round 1: an old party announces its keyshare rank and chain code
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QcRank {
    rank: u8,
    chain_code: Option<[u8; 32]>,
}

/// Round 2: commitments to the resharing of a weighted old share
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QcCommit {
    commitments: Vec<Vec<u8>>,
}

/// Round 3: reshared share for one new party
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QcShare {
    share: Vec<u8>,
}

/// Round 4: a new party confirms the key it assembled
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QcConfirm {
    public_key: Vec<u8>,
}

pub struct QuorumSession {
    core: SessionCore,
    keyshare: Option<Keyshare>,
    old_set: Vec<u16>,
    new_set: Vec<u16>,
    expected_key: Vec<u8>,
    poly: Option<SecretPolynomial>,
    ranks: BTreeMap<u16, u8>,
    chain_code: Option<[u8; 32]>,
    commitments: BTreeMap<u16, Vec<ProjectivePoint>>,
    own_share: Option<k256::Scalar>,
    new_secret: Option<k256::Scalar>,
    new_public_shares: Option<Vec<Vec<u8>>>,
    ranks_done: bool,
    commits_done: bool,
    assembled: bool,
    result: Option<Option<Keyshare>>,
}

impl QuorumSession {
    /// `keyshare` is required for parties in the old set and must be
    /// absent for parties that only join.
    pub fn from_setup(setup: SetupMessage, id: &str, keyshare: Option<Keyshare>) -> Result<Self> {
        let core = SessionCore::new(setup, id, SetupKind::QuorumChange)?;

        let old_set: Vec<u16> = core
            .setup
            .old_parties()
            .unwrap_or_default()
            .iter()
            .map(|&i| i as u16)
            .collect();
        let new_set: Vec<u16> = core
            .setup
            .new_parties()
            .unwrap_or_default()
            .iter()
            .map(|&i| i as u16)
            .collect();

        for set in [&old_set, &new_set] {
            let unique: BTreeSet<u16> = set.iter().copied().collect();
            if unique.len() != set.len() {
                return Err(Error::SetupMessage("duplicate party index in quorum sets".into()));
            }
        }

        let is_old = old_set.contains(&core.me);
        let is_new = new_set.contains(&core.me);
        if !is_old && !is_new {
            return Err(Error::SetupMessage(
                "party is in neither the old nor the new quorum".into(),
            ));
        }
        if is_old != keyshare.is_some() {
            return Err(Error::SetupMessage(if is_old {
                "old-quorum party requires its keyshare".into()
            } else {
                "joining party must not supply a keyshare".to_string()
            }));
        }

        let key_id = core
            .setup
            .key_id()
            .ok_or_else(|| Error::SetupMessage("quorum change setup carries no key id".into()))?;
        let expected_key = core
            .setup
            .public_key()
            .ok_or_else(|| Error::SetupMessage("quorum change setup carries no public key".into()))?
            .to_vec();
        decode_point(&expected_key)?;

        if let Some(share) = &keyshare {
            if share.key_id() != key_id {
                return Err(Error::SetupMessage(
                    "keyshare belongs to a different key".into(),
                ));
            }
            if share.public_key() != expected_key {
                return Err(Error::SetupMessage(
                    "keyshare public key does not match the setup".into(),
                ));
            }
            if old_set.len() < share.threshold() as usize {
                return Err(Error::SetupMessage(format!(
                    "{} old parties cannot meet threshold {}",
                    old_set.len(),
                    share.threshold()
                )));
            }
        }

        let mut session = Self {
            chain_code: keyshare.as_ref().and_then(|s| s.chain_code()),
            core,
            keyshare,
            old_set,
            new_set,
            expected_key,
            poly: None,
            ranks: BTreeMap::new(),
            commitments: BTreeMap::new(),
            own_share: None,
            new_secret: None,
            new_public_shares: None,
            ranks_done: false,
            commits_done: false,
            assembled: false,
            result: None,
        };

        if let Some(share) = &session.keyshare {
            let announce = QcRank {
                rank: share.party_id(),
                chain_code: share.chain_code(),
            };
            session.ranks.insert(session.core.me, share.party_id());
            session.core.push_broadcast(ROUND_RANK, &announce)?;
        }

        info!(
            party = %id,
            old = is_old,
            new = is_new,
            threshold = session.core.setup.threshold(),
            "quorum change session created"
        );

        Ok(session)
    }

    fn is_old(&self) -> bool {
        self.old_set.contains(&self.core.me)
    }

    fn is_new(&self) -> bool {
        self.new_set.contains(&self.core.me)
    }

    fn old_others(&self) -> BTreeSet<u16> {
        self.old_set
            .iter()
            .copied()
            .filter(|&i| i != self.core.me)
            .collect()
    }

    fn new_others(&self) -> BTreeSet<u16> {
        self.new_set
            .iter()
            .copied()
            .filter(|&i| i != self.core.me)
            .collect()
    }

    /// Position of a party in the new set; fixes its evaluation point.
    fn new_position(&self, party: u16) -> Option<u64> {
        self.new_set.iter().position(|&p| p == party).map(|p| p as u64)
    }

    fn process_ranks(&mut self) -> Result<()> {
        let round = self.core.ledger.take_round(ROUND_RANK);
        for &from in &self.old_others() {
            let msg: QcRank = decode_payload(&round[&from]).map_err(|_| Error::Abort {
                party: from as usize,
            })?;
            if self.ranks.values().any(|&r| r == msg.rank) {
                return Err(Error::Abort {
                    party: from as usize,
                });
            }
            if self.ranks.is_empty() {
                // joining party adopts the first announced chain code
                self.chain_code = msg.chain_code;
            } else if self.chain_code != msg.chain_code {
                return Err(Error::Abort {
                    party: from as usize,
                });
            }
            self.ranks.insert(from, msg.rank);
        }
        self.ranks_done = true;

        // old parties now know every contributing rank and can deal
        if let Some(share) = &self.keyshare {
            let points: Vec<u64> = self.ranks.values().map(|&r| r as u64 + 1).collect();
            let lambda = lagrange_coefficient(&points, share.party_id() as u64 + 1)?;
            let weighted = lambda * share.secret_share();

            let t = self.core.setup.threshold() as usize;
            let poly = SecretPolynomial::random(t - 1, Some(weighted));
            self.core.push_broadcast(
                ROUND_COMMIT,
                &QcCommit {
                    commitments: poly.commitments(),
                },
            )?;
            self.commitments
                .insert(self.core.me, decode_commitments(&poly.commitments())?);
            self.poly = Some(poly);
            debug!(party = self.core.me, "quorum ranks resolved, dealt resharing");
        }
        Ok(())
    }

    fn process_commitments(&mut self) -> Result<()> {
        let round = self.core.ledger.take_round(ROUND_COMMIT);
        let t = self.core.setup.threshold() as usize;

        for &from in &self.old_others() {
            let msg: QcCommit = decode_payload(&round[&from]).map_err(|_| Error::Abort {
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
        }

        // the weighted dealings must re-assemble the expected key
        let mut aggregate = ProjectivePoint::IDENTITY;
        for points in self.commitments.values() {
            aggregate += points[0];
        }
        if encode_point(&aggregate) != self.expected_key {
            return Err(Error::Keygen(
                "reshared commitments do not reproduce the public key".into(),
            ));
        }

        // old parties can pin each dealing to the dealer's public share
        if let Some(share) = &self.keyshare {
            let points: Vec<u64> = self.ranks.values().map(|&r| r as u64 + 1).collect();
            for (&from, &rank) in &self.ranks {
                if from == self.core.me {
                    continue;
                }
                let lambda = lagrange_coefficient(&points, rank as u64 + 1)?;
                let expected = share.public_share_point(rank as usize)? * lambda;
                if self.commitments[&from][0] != expected {
                    return Err(Error::Abort {
                        party: from as usize,
                    });
                }
            }
        }
        self.commits_done = true;

        // deal the shares out to the new set
        if let Some(poly) = &self.poly {
            for (pos, &to) in self.new_set.clone().iter().enumerate() {
                let value = poly.evaluate(pos as u64 + 1);
                if to == self.core.me {
                    self.own_share = Some(value);
                } else {
                    self.core.push_direct(
                        ROUND_SHARE,
                        to,
                        &QcShare {
                            share: value.to_bytes().to_vec(),
                        },
                    )?;
                }
            }
            debug!(party = self.core.me, "quorum resharing distributed");
        }
        Ok(())
    }

    fn assemble_share(&mut self) -> Result<()> {
        let round = self.core.ledger.take_round(ROUND_SHARE);
        let my_pos = self
            .new_position(self.core.me)
            .ok_or(Error::InvalidSessionState)?;
        let my_point = my_pos + 1;

        let mut secret = self.own_share.unwrap_or(k256::Scalar::ZERO);
        for &from in &self.old_others() {
            let msg: QcShare = decode_payload(&round[&from]).map_err(|_| Error::Abort {
                party: from as usize,
            })?;
            let value = scalar_from_bytes(&msg.share).map_err(|_| Error::Abort {
                party: from as usize,
            })?;
            if !feldman_verify(&value, my_point, &self.commitments[&from]) {
                return Err(Error::Abort {
                    party: from as usize,
                });
            }
            secret += value;
        }
        self.new_secret = Some(secret);

        let mut public_shares = Vec::with_capacity(self.new_set.len());
        for pos in 0..self.new_set.len() {
            let mut point = ProjectivePoint::IDENTITY;
            for points in self.commitments.values() {
                point += commitment_eval(points, pos as u64 + 1);
            }
            public_shares.push(encode_point(&point));
        }
        self.new_public_shares = Some(public_shares);
        self.assembled = true;

        self.core.push_broadcast(
            ROUND_CONFIRM,
            &QcConfirm {
                public_key: self.expected_key.clone(),
            },
        )?;
        debug!(party = self.core.me, "quorum share assembled, confirmed");
        Ok(())
    }

    fn process_confirmations(&mut self) -> Result<()> {
        let round = self.core.ledger.take_round(ROUND_CONFIRM);
        for &from in &self.new_others() {
            let msg: QcConfirm = decode_payload(&round[&from]).map_err(|_| Error::Abort {
                party: from as usize,
            })?;
            if msg.public_key != self.expected_key {
                return Err(Error::Abort {
                    party: from as usize,
                });
            }
        }

        let result = if self.is_new() {
            let key_id = self
                .core
                .setup
                .key_id()
                .ok_or(Error::InvalidSessionState)?;
            let pos = self
                .new_position(self.core.me)
                .ok_or(Error::InvalidSessionState)?;
            Some(Keyshare {
                party_id: pos as u8,
                threshold: self.core.setup.threshold(),
                participants: self.new_set.len() as u8,
                key_id,
                secret_share: self.new_secret.take().ok_or(Error::InvalidSessionState)?,
                public_key: self.expected_key.clone(),
                public_shares: self
                    .new_public_shares
                    .take()
                    .ok_or(Error::InvalidSessionState)?,
                chain_code: self.chain_code,
            })
        } else {
            None
        };

        self.result = Some(result);
        self.core.complete = true;
        info!(
            party = self.core.me,
            stays = self.is_new(),
            "quorum change session finished"
        );
        Ok(())
    }

    fn advance(&mut self) -> Result<()> {
        if !self.ranks_done && self.core.ledger.round_complete(ROUND_RANK, &self.old_others()) {
            self.process_ranks()?;
        }
        if self.ranks_done
            && !self.commits_done
            && self.core.ledger.round_complete(ROUND_COMMIT, &self.old_others())
        {
            self.process_commitments()?;
        }
        if self.commits_done
            && self.is_new()
            && !self.assembled
            && self.core.ledger.round_complete(ROUND_SHARE, &self.old_others())
        {
            self.assemble_share()?;
        }
        let waiting_on_own_assembly = self.is_new() && !self.assembled;
        if self.commits_done
            && !waiting_on_own_assembly
            && !self.core.complete
            && self.core.ledger.round_complete(ROUND_CONFIRM, &self.new_others())
        {
            self.process_confirmations()?;
        }
        Ok(())
    }
}

impl ProtocolDriver for QuorumSession {
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
            Some(Some(share)) => Ok(SessionOutput::Keyshare(Box::new(share))),
            Some(None) => Ok(SessionOutput::NoKeyshare),
            None => Err(Error::InvalidSessionState),
        }
    }
}
