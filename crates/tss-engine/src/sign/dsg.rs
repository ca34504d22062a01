//! Threshold Schnorr signing driver

use std::collections::BTreeMap;

use k256::{elliptic_curve::Field, ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use tracing::{debug, info};

use super::messages::{SignRound1, SignRound2};
use super::Presignature;
use crate::driver::{ProtocolDriver, SessionOutput};
use crate::keyshare::{derive_path, Keyshare};
use crate::proto::{
    decode_point, decode_payload, encode_point, lagrange_coefficient, scalar_from_bytes, sha256,
    SessionCore,
};
use crate::setup::{KeyId, SessionId, SetupKind, SetupMessage};
use crate::{Error, Result};

const ROUND_NONCE: u8 = 1;
const ROUND_PARTIAL: u8 = 2;

/// Per-party state pinned down by the nonce phase
struct PartyEntry {
    big_r: ProjectivePoint,
    lambda_pub: ProjectivePoint,
}

/// Keyshare-backed context, needed only until the nonce phase resolves
/// the participating ranks
struct ShareContext {
    secret: Scalar,
    rank: u8,
    public_shares: Vec<Vec<u8>>,
    tweak: Scalar,
}

enum SignResult {
    Signature(Vec<u8>),
    Presignature(Box<Presignature>),
}

/// Driver for full signing, pre-signing, and the presignature-consuming
/// finish phase. The variant is decided by what the session was created
/// from and whether the setup carries a message hash.
pub struct SignSession {
    core: SessionCore,
    message: Option<Vec<u8>>,
    key_id: KeyId,
    public_key: ProjectivePoint,
    public_key_bytes: Vec<u8>,
    k_share: Scalar,
    lambda_x: Option<Scalar>,
    share_ctx: Option<ShareContext>,
    entries: Option<BTreeMap<u16, PartyEntry>>,
    big_r: Option<ProjectivePoint>,
    session_id: Option<SessionId>,
    result: Option<SignResult>,
}

impl SignSession {
    /// Full sign (message hash present in the setup) or pre-sign (absent).
    pub fn from_keyshare(setup: SetupMessage, id: &str, keyshare: &Keyshare) -> Result<Self> {
        let mut core = SessionCore::new(setup, id, SetupKind::Sign)?;

        let key_id = core
            .setup
            .key_id()
            .ok_or_else(|| Error::SetupMessage("sign setup carries no key id".into()))?;
        if key_id != keyshare.key_id() {
            return Err(Error::SetupMessage(
                "keyshare belongs to a different key".into(),
            ));
        }
        if core.setup.party_count() < keyshare.threshold() as usize {
            return Err(Error::SetupMessage(format!(
                "{} signers cannot meet threshold {}",
                core.setup.party_count(),
                keyshare.threshold()
            )));
        }

        let (public_key_bytes, tweak) = match core.setup.chain_path() {
            Some(path) if path != "m" => {
                let derived = derive_path(&keyshare.public_key(), keyshare.chain_code(), path)?;
                (derived.public_key, derived.tweak)
            }
            _ => (keyshare.public_key(), Scalar::ZERO),
        };
        let public_key = decode_point(&public_key_bytes)?;

        let k_share = Scalar::random(&mut OsRng);
        core.push_broadcast(
            ROUND_NONCE,
            &SignRound1 {
                rank: keyshare.party_id(),
                big_r: encode_point(&(ProjectivePoint::GENERATOR * k_share)),
            },
        )?;

        info!(
            party = %id,
            key_id = %hex::encode(key_id),
            presign = core.setup.message_hash().is_none(),
            "sign session created"
        );

        Ok(Self {
            message: core.setup.message_hash().map(|m| m.to_vec()),
            share_ctx: Some(ShareContext {
                secret: keyshare.secret_share() + tweak,
                rank: keyshare.party_id(),
                public_shares: keyshare.public_shares.clone(),
                tweak,
            }),
            core,
            key_id,
            public_key,
            public_key_bytes,
            k_share,
            lambda_x: None,
            entries: None,
            big_r: None,
            session_id: None,
            result: None,
        })
    }

    /// Finish phase: consumes a presignature under a sign-finish setup
    /// bound to the same session id and party list.
    pub fn from_presignature(setup: SetupMessage, id: &str, presig: &Presignature) -> Result<Self> {
        let mut core = SessionCore::new(setup, id, SetupKind::SignFinish)?;

        if core.setup.session_id() != Some(presig.session_id) {
            return Err(Error::SetupMessage(
                "presignature belongs to a different signing session".into(),
            ));
        }
        if core.setup.parties() != presig.parties.as_slice() {
            return Err(Error::SetupMessage(
                "finish setup lists a different party set".into(),
            ));
        }
        if core.me != presig.my_index {
            return Err(Error::SetupMessage(
                "presignature belongs to a different party".into(),
            ));
        }
        let message = core
            .setup
            .message_hash()
            .ok_or_else(|| Error::SetupMessage("finish setup carries no message".into()))?
            .to_vec();

        let mut entries = BTreeMap::new();
        for (j, (r, lp)) in presig
            .party_r
            .iter()
            .zip(presig.party_lambda_pub.iter())
            .enumerate()
        {
            entries.insert(
                j as u16,
                PartyEntry {
                    big_r: decode_point(r)?,
                    lambda_pub: decode_point(lp)?,
                },
            );
        }

        let public_key = decode_point(&presig.public_key)?;
        let big_r = decode_point(&presig.big_r)?;

        let mut session = Self {
            core,
            message: Some(message),
            key_id: presig.key_id,
            public_key,
            public_key_bytes: presig.public_key.clone(),
            k_share: presig.k_share,
            lambda_x: Some(presig.lambda_x),
            share_ctx: None,
            entries: Some(entries),
            big_r: Some(big_r),
            session_id: Some(presig.session_id),
            result: None,
        };
        session.emit_partial()?;

        info!(
            party = %id,
            session_id = %hex::encode(presig.session_id),
            "sign finish session created"
        );

        Ok(session)
    }

    fn challenge(&self) -> Result<Scalar> {
        let big_r = self
            .big_r
            .as_ref()
            .ok_or(Error::InvalidSessionState)?;
        let message = self.message.as_ref().ok_or(Error::InvalidSessionState)?;
        scalar_from_bytes(&sha256(&[
            &encode_point(big_r),
            &self.public_key_bytes,
            message,
        ]))
    }

    fn emit_partial(&mut self) -> Result<()> {
        let e = self.challenge()?;
        let lambda_x = self.lambda_x.ok_or(Error::InvalidSessionState)?;
        let partial = self.k_share + e * lambda_x;
        self.core.push_broadcast(
            ROUND_PARTIAL,
            &SignRound2 {
                partial: partial.to_bytes().to_vec(),
            },
        )
    }

    /// Resolves the nonce phase: aggregate R, per-party Lagrange weights,
    /// and the session id shared by every participant.
    fn resolve_nonces(&mut self) -> Result<()> {
        let others = self.core.others();
        let round = self.core.ledger.take_round(ROUND_NONCE);
        let ctx = self.share_ctx.as_ref().ok_or(Error::InvalidSessionState)?;

        let mut ranks: BTreeMap<u16, u8> = BTreeMap::new();
        let mut nonces: BTreeMap<u16, ProjectivePoint> = BTreeMap::new();
        ranks.insert(self.core.me, ctx.rank);
        nonces.insert(
            self.core.me,
            ProjectivePoint::GENERATOR * self.k_share,
        );

        for &from in &others {
            let msg: SignRound1 = decode_payload(&round[&from]).map_err(|_| Error::Abort {
                party: from as usize,
            })?;
            if msg.rank as usize >= ctx.public_shares.len() {
                return Err(Error::Abort {
                    party: from as usize,
                });
            }
            let point = decode_point(&msg.big_r).map_err(|_| Error::Abort {
                party: from as usize,
            })?;
            ranks.insert(from, msg.rank);
            nonces.insert(from, point);
        }

        let points: Vec<u64> = ranks.values().map(|&r| r as u64 + 1).collect();
        {
            let mut sorted = points.clone();
            sorted.sort_unstable();
            sorted.dedup();
            if sorted.len() != points.len() {
                return Err(Error::SignGen(
                    "two signers presented the same keyshare rank".into(),
                ));
            }
        }

        let tweak_point = ProjectivePoint::GENERATOR * ctx.tweak;
        let mut entries = BTreeMap::new();
        let mut big_r = ProjectivePoint::IDENTITY;
        for (&j, &rank) in &ranks {
            let lambda = lagrange_coefficient(&points, rank as u64 + 1)?;
            let share_point = decode_point(&ctx.public_shares[rank as usize])?;
            let entry = PartyEntry {
                big_r: nonces[&j],
                lambda_pub: (share_point + tweak_point) * lambda,
            };
            big_r += entry.big_r;
            if j == self.core.me {
                self.lambda_x = Some(lambda * ctx.secret);
            }
            entries.insert(j, entry);
        }

        if big_r == ProjectivePoint::IDENTITY {
            return Err(Error::SignGen("aggregate nonce is the identity".into()));
        }

        let mut sid_parts: Vec<Vec<u8>> = vec![self.key_id.to_vec(), encode_point(&big_r)];
        for entry in entries.values() {
            sid_parts.push(encode_point(&entry.big_r));
        }
        let part_refs: Vec<&[u8]> = sid_parts.iter().map(|p| p.as_slice()).collect();
        self.session_id = Some(sha256(&part_refs));

        self.big_r = Some(big_r);
        self.entries = Some(entries);
        Ok(())
    }

    fn build_presignature(&mut self) -> Result<Presignature> {
        let entries = self.entries.as_ref().ok_or(Error::InvalidSessionState)?;
        let big_r = self.big_r.as_ref().ok_or(Error::InvalidSessionState)?;
        let session_id = self.session_id.ok_or(Error::InvalidSessionState)?;
        let lambda_x = self.lambda_x.ok_or(Error::InvalidSessionState)?;

        Ok(Presignature {
            session_id,
            key_id: self.key_id,
            public_key: self.public_key_bytes.clone(),
            big_r: encode_point(big_r),
            parties: self.core.setup.parties().to_vec(),
            my_index: self.core.me,
            k_share: self.k_share,
            lambda_x,
            party_r: entries.values().map(|e| encode_point(&e.big_r)).collect(),
            party_lambda_pub: entries
                .values()
                .map(|e| encode_point(&e.lambda_pub))
                .collect(),
        })
    }

    fn combine_partials(&mut self) -> Result<()> {
        let others = self.core.others();
        let round = self.core.ledger.take_round(ROUND_PARTIAL);
        let e = self.challenge()?;
        let entries = self.entries.as_ref().ok_or(Error::InvalidSessionState)?;
        let big_r = *self.big_r.as_ref().ok_or(Error::InvalidSessionState)?;
        let lambda_x = self.lambda_x.ok_or(Error::InvalidSessionState)?;

        let mut s = self.k_share + e * lambda_x;
        for &from in &others {
            let msg: SignRound2 = decode_payload(&round[&from]).map_err(|_| Error::Abort {
                party: from as usize,
            })?;
            let partial = scalar_from_bytes(&msg.partial).map_err(|_| Error::Abort {
                party: from as usize,
            })?;
            let entry = &entries[&from];
            if ProjectivePoint::GENERATOR * partial != entry.big_r + entry.lambda_pub * e {
                return Err(Error::Abort {
                    party: from as usize,
                });
            }
            s += partial;
        }

        if ProjectivePoint::GENERATOR * s != big_r + self.public_key * e {
            return Err(Error::SignGen("combined signature does not verify".into()));
        }

        let mut signature = encode_point(&big_r);
        signature.extend_from_slice(&s.to_bytes());
        self.result = Some(SignResult::Signature(signature));
        self.core.complete = true;

        info!(party = self.core.me, "sign session finished");
        Ok(())
    }

    fn advance(&mut self) -> Result<()> {
        let others = self.core.others();

        if self.entries.is_none() && self.core.ledger.round_complete(ROUND_NONCE, &others) {
            self.resolve_nonces()?;

            if self.message.is_some() {
                debug!(party = self.core.me, "nonce phase complete, sending partial");
                self.emit_partial()?;
            } else {
                let presig = self.build_presignature()?;
                self.result = Some(SignResult::Presignature(Box::new(presig)));
                self.core.complete = true;
                info!(party = self.core.me, "presign session finished");
            }
        }

        if !self.core.complete
            && self.entries.is_some()
            && self.message.is_some()
            && self.core.ledger.round_complete(ROUND_PARTIAL, &others)
        {
            self.combine_partials()?;
        }

        Ok(())
    }
}

impl ProtocolDriver for SignSession {
    fn output_message(&mut self) -> Result<Option<Vec<u8>>> {
        self.core.pop_output()
    }

    fn message_receiver(&self, message: &[u8], index: usize) -> Result<Option<String>> {
        self.core.receiver(message, index)
    }

    fn input_message(&mut self, message: &[u8]) -> Result<bool> {
        self.core.accept(message, ROUND_PARTIAL)?;
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
            Some(SignResult::Signature(sig)) => Ok(SessionOutput::Signature(sig)),
            Some(SignResult::Presignature(presig)) => Ok(SessionOutput::Presignature(presig)),
            None => Err(Error::InvalidSessionState),
        }
    }
}
