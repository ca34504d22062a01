//! Wire-level plumbing shared by every protocol driver: the message
//! envelope, per-round buffering of out-of-order input, and the
//! polynomial/commitment primitives the drivers are built from.

use std::collections::{BTreeMap, BTreeSet};

use k256::{
    elliptic_curve::{
        bigint::U256,
        ops::Reduce,
        sec1::{FromEncodedPoint, ToEncodedPoint},
        Field,
    },
    AffinePoint, ProjectivePoint, Scalar,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Wire envelope around every protocol message.
///
/// `setup` binds the message to one protocol instance (SHA-256 of the
/// encoded setup message), so a session rejects traffic from an unrelated
/// run before touching the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Envelope {
    pub setup: [u8; 32],
    pub from: u16,
    pub round: u8,
    /// `None` addresses every party except the sender
    pub to: Option<u16>,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(
            self,
            bincode::config::standard(),
        )?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (env, _) =
            bincode::serde::decode_from_slice::<Self, _>(bytes, bincode::config::standard())?;
        Ok(env)
    }

    /// Recipient names in enumeration order, contiguous from index 0.
    pub fn receiver(&self, parties: &[String], index: usize) -> Option<String> {
        match self.to {
            Some(to) => {
                if index == 0 {
                    parties.get(to as usize).cloned()
                } else {
                    None
                }
            }
            None => parties
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != self.from as usize)
                .map(|(_, name)| name.clone())
                .nth(index),
        }
    }
}

pub(crate) fn encode_payload<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(
        msg,
        bincode::config::standard(),
    )?)
}

pub(crate) fn decode_payload<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (msg, _) = bincode::serde::decode_from_slice::<T, _>(bytes, bincode::config::standard())?;
    Ok(msg)
}

/// Buffers inbound payloads per `(round, sender)` so a session can accept
/// messages for later rounds before its own round is complete.
#[derive(Debug, Default)]
pub(crate) struct RoundLedger {
    slots: BTreeMap<u8, BTreeMap<u16, Vec<u8>>>,
}

impl RoundLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A second message for the same `(round, sender)` slot is attributed
    /// to the sender as a protocol abort.
    pub fn insert(&mut self, round: u8, from: u16, payload: Vec<u8>) -> Result<()> {
        let slot = self.slots.entry(round).or_default();
        if slot.contains_key(&from) {
            return Err(Error::Abort {
                party: from as usize,
            });
        }
        slot.insert(from, payload);
        Ok(())
    }

    pub fn round_complete(&self, round: u8, expected: &BTreeSet<u16>) -> bool {
        match self.slots.get(&round) {
            Some(slot) => expected.iter().all(|p| slot.contains_key(p)),
            None => expected.is_empty(),
        }
    }

    /// Removes and returns a completed round, in sender order.
    pub fn take_round(&mut self, round: u8) -> BTreeMap<u16, Vec<u8>> {
        self.slots.remove(&round).unwrap_or_default()
    }
}

/// Secret polynomial of degree `len - 1`; coefficient 0 is the shared value.
pub(crate) struct SecretPolynomial {
    coefficients: Vec<Scalar>,
}

impl SecretPolynomial {
    /// Random polynomial of the given degree. When `constant` is set it
    /// becomes coefficient 0 (fixed-secret sharing), otherwise the constant
    /// term is random as well.
    pub fn random(degree: usize, constant: Option<Scalar>) -> Self {
        let mut rng = OsRng;
        let mut coefficients = Vec::with_capacity(degree + 1);
        coefficients.push(constant.unwrap_or_else(|| Scalar::random(&mut rng)));
        for _ in 0..degree {
            coefficients.push(Scalar::random(&mut rng));
        }
        Self { coefficients }
    }

    /// Horner evaluation at x.
    pub fn evaluate(&self, x: u64) -> Scalar {
        let x = Scalar::from(x);
        let mut acc = Scalar::ZERO;
        for coef in self.coefficients.iter().rev() {
            acc = acc * x + coef;
        }
        acc
    }

    /// Feldman commitments to every coefficient, compressed SEC1 encoding.
    pub fn commitments(&self) -> Vec<Vec<u8>> {
        self.coefficients
            .iter()
            .map(|c| encode_point(&(ProjectivePoint::GENERATOR * c)))
            .collect()
    }
}

pub(crate) fn encode_point(point: &ProjectivePoint) -> Vec<u8> {
    point.to_affine().to_encoded_point(true).as_bytes().to_vec()
}

pub(crate) fn decode_point(bytes: &[u8]) -> Result<ProjectivePoint> {
    let encoded = k256::EncodedPoint::from_bytes(bytes)
        .map_err(|e| Error::Serialization(e.to_string()))?;
    let affine: AffinePoint = Option::from(AffinePoint::from_encoded_point(&encoded))
        .ok_or_else(|| Error::Serialization("invalid curve point".into()))?;
    Ok(ProjectivePoint::from(affine))
}

pub(crate) fn scalar_from_bytes(bytes: &[u8]) -> Result<Scalar> {
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::Serialization("invalid scalar length".into()))?;
    Ok(<Scalar as Reduce<U256>>::reduce_bytes(&array.into()))
}

/// Evaluates a committed polynomial in the exponent at x (Horner).
pub(crate) fn commitment_eval(commitments: &[ProjectivePoint], x: u64) -> ProjectivePoint {
    let x = Scalar::from(x);
    let mut acc = ProjectivePoint::IDENTITY;
    for com in commitments.iter().rev() {
        acc = acc * x + com;
    }
    acc
}

pub(crate) fn decode_commitments(raw: &[Vec<u8>]) -> Result<Vec<ProjectivePoint>> {
    raw.iter().map(|c| decode_point(c)).collect()
}

/// Feldman check: share * G == sum(A_k * x^k).
pub(crate) fn feldman_verify(share: &Scalar, x: u64, commitments: &[ProjectivePoint]) -> bool {
    ProjectivePoint::GENERATOR * share == commitment_eval(commitments, x)
}

/// Lagrange coefficient at zero for `point` within `points`.
///
/// Fails on duplicated evaluation points, which would make the
/// denominator non-invertible.
pub(crate) fn lagrange_coefficient(points: &[u64], point: u64) -> Result<Scalar> {
    let mut sorted = points.to_vec();
    sorted.sort_unstable();
    if sorted.windows(2).any(|w| w[0] == w[1]) {
        return Err(Error::SignGen("degenerate evaluation points".into()));
    }

    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;

    for &j in points {
        if j == point {
            continue;
        }
        numerator *= Scalar::from(j);
        let diff = if j > point {
            Scalar::from(j - point)
        } else {
            -Scalar::from(point - j)
        };
        denominator *= diff;
    }

    let inverted: Option<Scalar> = Option::from(denominator.invert());
    inverted
        .map(|inv| numerator * inv)
        .ok_or_else(|| Error::SignGen("degenerate evaluation points".into()))
}

pub(crate) fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// State every protocol driver shares: the setup it was created from, the
/// outbound queue, the inbound round ledger, and the lifecycle flags.
pub(crate) struct SessionCore {
    pub setup: crate::setup::SetupMessage,
    pub digest: [u8; 32],
    pub me: u16,
    pub outbox: std::collections::VecDeque<Vec<u8>>,
    pub ledger: RoundLedger,
    pub complete: bool,
    pub finalized: bool,
    /// Terminal protocol failure, replayed by the first `finish` call
    pub failure: Option<Error>,
}

impl SessionCore {
    pub fn new(
        setup: crate::setup::SetupMessage,
        id: &str,
        kind: crate::setup::SetupKind,
    ) -> Result<Self> {
        if setup.kind() != kind {
            return Err(Error::SetupMessage(format!(
                "setup kind {:?} does not match the session protocol",
                setup.kind()
            )));
        }
        let me = setup.party_index(id)?;
        let digest = setup.digest()?;
        Ok(Self {
            setup,
            digest,
            me,
            outbox: std::collections::VecDeque::new(),
            ledger: RoundLedger::new(),
            complete: false,
            finalized: false,
            failure: None,
        })
    }

    pub fn ensure_running(&self) -> Result<()> {
        if self.complete || self.finalized || self.failure.is_some() {
            return Err(Error::InvalidSessionState);
        }
        Ok(())
    }

    /// Marks the session terminally failed; the error is handed back to
    /// the caller now and replayed once by `finish`.
    pub fn record_failure(&mut self, error: Error) -> Error {
        self.failure = Some(error.clone());
        error
    }

    /// Validates an inbound envelope and buffers its payload. Rounds the
    /// driver never defined are treated as misbehavior of the sender.
    pub fn accept(&mut self, message: &[u8], max_round: u8) -> Result<()> {
        self.ensure_running()?;
        let env = Envelope::decode(message)?;
        if env.setup != self.digest {
            return Err(Error::SetupMessage(
                "message belongs to a different protocol instance".into(),
            ));
        }
        let n = self.setup.party_count() as u16;
        if env.from >= n || env.from == self.me {
            return Err(Error::SetupMessage("invalid message sender".into()));
        }
        if let Some(to) = env.to {
            if to != self.me {
                return Err(Error::SetupMessage(
                    "message addressed to a different party".into(),
                ));
            }
        }
        if env.round == 0 || env.round > max_round {
            return Err(Error::Abort {
                party: env.from as usize,
            });
        }
        self.ledger.insert(env.round, env.from, env.payload)
    }

    pub fn push_broadcast<T: Serialize>(&mut self, round: u8, payload: &T) -> Result<()> {
        let env = Envelope {
            setup: self.digest,
            from: self.me,
            round,
            to: None,
            payload: encode_payload(payload)?,
        };
        self.outbox.push_back(env.encode()?);
        Ok(())
    }

    pub fn push_direct<T: Serialize>(&mut self, round: u8, to: u16, payload: &T) -> Result<()> {
        let env = Envelope {
            setup: self.digest,
            from: self.me,
            round,
            to: Some(to),
            payload: encode_payload(payload)?,
        };
        self.outbox.push_back(env.encode()?);
        Ok(())
    }

    pub fn pop_output(&mut self) -> Result<Option<Vec<u8>>> {
        self.ensure_running()?;
        Ok(self.outbox.pop_front())
    }

    pub fn receiver(&self, message: &[u8], index: usize) -> Result<Option<String>> {
        let env = Envelope::decode(message)?;
        Ok(env.receiver(self.setup.parties(), index))
    }

    /// Every party index except this one.
    pub fn others(&self) -> BTreeSet<u16> {
        (0..self.setup.party_count() as u16)
            .filter(|&i| i != self.me)
            .collect()
    }

    /// One-shot transition into the finalized state; round state and any
    /// undrained output are released.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Err(Error::InvalidSessionState);
        }
        self.finalized = true;
        self.ledger = RoundLedger::new();
        self.outbox.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polynomial_shares_interpolate_to_constant() {
        let secret = Scalar::from(1234567u64);
        let poly = SecretPolynomial::random(2, Some(secret));

        let points = [1u64, 3, 5];
        let mut acc = Scalar::ZERO;
        for &p in &points {
            let lambda = lagrange_coefficient(&points, p).unwrap();
            acc += lambda * poly.evaluate(p);
        }
        assert_eq!(acc, secret);
    }

    #[test]
    fn feldman_accepts_honest_share_and_rejects_forged() {
        let poly = SecretPolynomial::random(1, None);
        let commitments = decode_commitments(&poly.commitments()).unwrap();

        let share = poly.evaluate(2);
        assert!(feldman_verify(&share, 2, &commitments));
        assert!(!feldman_verify(&(share + Scalar::ONE), 2, &commitments));
    }

    #[test]
    fn lagrange_rejects_duplicate_points() {
        assert!(lagrange_coefficient(&[1, 1, 2], 1).is_err());
    }

    #[test]
    fn broadcast_envelope_enumerates_all_but_sender() {
        let parties = vec!["p1".to_string(), "p2".to_string(), "p3".to_string()];
        let env = Envelope {
            setup: [0u8; 32],
            from: 1,
            round: 1,
            to: None,
            payload: vec![],
        };
        assert_eq!(env.receiver(&parties, 0).as_deref(), Some("p1"));
        assert_eq!(env.receiver(&parties, 1).as_deref(), Some("p3"));
        assert_eq!(env.receiver(&parties, 2), None);
    }

    #[test]
    fn direct_envelope_has_single_recipient() {
        let parties = vec!["p1".to_string(), "p2".to_string()];
        let env = Envelope {
            setup: [0u8; 32],
            from: 0,
            round: 2,
            to: Some(1),
            payload: vec![],
        };
        assert_eq!(env.receiver(&parties, 0).as_deref(), Some("p2"));
        assert_eq!(env.receiver(&parties, 1), None);
    }

    #[test]
    fn ledger_flags_duplicate_sender() {
        let mut ledger = RoundLedger::new();
        ledger.insert(1, 0, vec![1]).unwrap();
        let err = ledger.insert(1, 0, vec![2]).unwrap_err();
        assert!(matches!(err, Error::Abort { party: 0 }));
    }
}
