//! Key refresh driver
//!
//! Re-randomizes every party's share without changing the key. Each party
//! deals a zero polynomial; the sums shift the sharing polynomial while
//! leaving its constant term, and therefore the public key, untouched.
//! Regularly refreshing shares limits the window of vulnerability if a
//! share is compromised.

use std::collections::BTreeMap;

use k256::{ProjectivePoint, Scalar};
use tracing::{debug, info};

use super::messages::{RefreshRound1, RefreshRound2};
use crate::driver::{ProtocolDriver, SessionOutput};
use crate::keyshare::{Keyshare, RefreshShare};
use crate::proto::{
    commitment_eval, decode_commitments, decode_payload, decode_point, encode_point,
    scalar_from_bytes, SecretPolynomial, SessionCore,
};
use crate::setup::{SetupKind, SetupMessage};
use crate::{Error, Result};

const ROUND_COMMIT: u8 = 1;
const ROUND_SHARE: u8 = 2;

/// The "old share" input of a refresh session: a live keyshare or one
/// re-encoded through `Keyshare::to_refresh_bytes`.
pub enum RefreshInput {
    Keyshare(Box<Keyshare>),
    RefreshShare(Box<RefreshShare>),
}

impl RefreshInput {
    fn into_share(self) -> RefreshShare {
        match self {
            RefreshInput::Keyshare(ks) => ks.to_refresh_share(),
            RefreshInput::RefreshShare(rs) => *rs,
        }
    }
}

pub struct RefreshSession {
    core: SessionCore,
    old: RefreshShare,
    poly: SecretPolynomial,
    /// Commitments to coefficients 1..t-1 of each zero polynomial
    commitments: BTreeMap<u16, Vec<ProjectivePoint>>,
    result: Option<Keyshare>,
}

impl RefreshSession {
    pub fn from_setup(setup: SetupMessage, id: &str, old: RefreshInput) -> Result<Self> {
        let mut core = SessionCore::new(setup, id, SetupKind::Keygen)?;
        let old = old.into_share();

        if core.setup.threshold() != old.threshold
            || core.setup.party_count() != old.participants as usize
        {
            return Err(Error::SetupMessage(
                "refresh setup does not match the old keyshare's quorum".into(),
            ));
        }
        if core.me != old.party_id as u16 {
            return Err(Error::SetupMessage(
                "old keyshare belongs to a different party".into(),
            ));
        }
        if let Some(key_id) = core.setup.key_id() {
            if key_id != old.key_id {
                return Err(Error::SetupMessage(
                    "old keyshare belongs to a different key".into(),
                ));
            }
        }

        let t = core.setup.threshold() as usize;
        let poly = SecretPolynomial::random(t - 1, Some(Scalar::ZERO));
        // constant term is zero and stays private by omission
        let commitment_bytes: Vec<Vec<u8>> = poly.commitments().split_off(1);

        core.push_broadcast(
            ROUND_COMMIT,
            &RefreshRound1 {
                commitments: commitment_bytes.clone(),
            },
        )?;

        let mut commitments = BTreeMap::new();
        commitments.insert(core.me, decode_commitments(&commitment_bytes)?);

        info!(
            party = %id,
            key_id = %hex::encode(old.key_id),
            "key refresh session created"
        );

        Ok(Self {
            core,
            old,
            poly,
            commitments,
            result: None,
        })
    }

    fn zero_share_expected(commitments: &[ProjectivePoint], x: u64) -> ProjectivePoint {
        // sum over k >= 1 of A_k * x^k
        commitment_eval(commitments, x) * Scalar::from(x)
    }

    fn advance(&mut self) -> Result<()> {
        let others = self.core.others();
        let t = self.core.setup.threshold() as usize;

        if self.commitments.len() == 1 && self.core.ledger.round_complete(ROUND_COMMIT, &others) {
            let round = self.core.ledger.take_round(ROUND_COMMIT);
            for (&from, payload) in &round {
                let msg: RefreshRound1 = decode_payload(payload).map_err(|_| Error::Abort {
                    party: from as usize,
                })?;
                if msg.commitments.len() != t - 1 {
                    return Err(Error::Abort {
                        party: from as usize,
                    });
                }
                let points = decode_commitments(&msg.commitments).map_err(|_| Error::Abort {
                    party: from as usize,
                })?;
                self.commitments.insert(from, points);
            }

            debug!(party = self.core.me, "refresh commitments complete, sending shares");
            for &to in &others {
                let share = self.poly.evaluate(to as u64 + 1);
                self.core.push_direct(
                    ROUND_SHARE,
                    to,
                    &RefreshRound2 {
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
            let mut secret = self.old.secret_share + self.poly.evaluate(my_point);

            for &from in &others {
                let msg: RefreshRound2 =
                    decode_payload(&round[&from]).map_err(|_| Error::Abort {
                        party: from as usize,
                    })?;
                let share = scalar_from_bytes(&msg.share).map_err(|_| Error::Abort {
                    party: from as usize,
                })?;
                let expected = Self::zero_share_expected(&self.commitments[&from], my_point);
                if ProjectivePoint::GENERATOR * share != expected {
                    return Err(Error::Abort {
                        party: from as usize,
                    });
                }
                secret += share;
            }

            // public shares shift by every dealt zero polynomial
            let n = self.core.setup.party_count();
            let mut public_shares = Vec::with_capacity(n);
            for j in 0..n {
                let mut point = decode_point(&self.old.public_shares[j])?;
                for points in self.commitments.values() {
                    point += Self::zero_share_expected(points, j as u64 + 1);
                }
                public_shares.push(encode_point(&point));
            }

            self.result = Some(Keyshare {
                party_id: self.old.party_id,
                threshold: self.old.threshold,
                participants: self.old.participants,
                key_id: self.old.key_id,
                secret_share: secret,
                public_key: self.old.public_key.clone(),
                public_shares,
                chain_code: self.old.chain_code,
            });
            self.core.complete = true;

            info!(party = self.core.me, "key refresh session finished");
        }

        Ok(())
    }
}

impl ProtocolDriver for RefreshSession {
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
