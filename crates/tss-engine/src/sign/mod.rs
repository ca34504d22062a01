//! Signing protocol drivers
//!
//! Two-phase threshold Schnorr: a message-independent nonce phase and a
//! message-dependent partial-signature phase. A full sign session chains
//! both; a presign session stops after the first and finishes into a
//! [`Presignature`]; a sign-finish session consumes one and runs only the
//! second.

mod dsg;
mod messages;

pub use dsg::SignSession;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::keyshare::scalar_serde;
use crate::setup::{KeyId, SessionId};
use crate::{Error, Result};

const PRESIGN_MAGIC: &[u8; 4] = b"TSP1";

/// Message-independent first-phase signing material.
///
/// Bound to the session id the nonce phase agreed on; the matching
/// sign-finish setup is built from that id. Single-use: the in-process
/// registry refuses to hand a consumed presignature to a second session,
/// and reuse across processes is undefined. Holders should destroy it as
/// soon as a finish session took it.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Presignature {
    #[zeroize(skip)]
    pub(crate) session_id: SessionId,
    #[zeroize(skip)]
    pub(crate) key_id: KeyId,
    /// Signing key, chain-path tweak already applied
    #[zeroize(skip)]
    pub(crate) public_key: Vec<u8>,
    /// Aggregate nonce commitment
    #[zeroize(skip)]
    pub(crate) big_r: Vec<u8>,
    #[zeroize(skip)]
    pub(crate) parties: Vec<String>,
    pub(crate) my_index: u16,
    /// This party's nonce share
    #[zeroize(skip)]
    #[serde(with = "scalar_serde")]
    pub(crate) k_share: k256::Scalar,
    /// This party's Lagrange-weighted secret share
    #[zeroize(skip)]
    #[serde(with = "scalar_serde")]
    pub(crate) lambda_x: k256::Scalar,
    /// Per-party nonce commitments, by party index in `parties`
    #[zeroize(skip)]
    pub(crate) party_r: Vec<Vec<u8>>,
    /// Per-party Lagrange-weighted public shares, by party index
    #[zeroize(skip)]
    pub(crate) party_lambda_pub: Vec<Vec<u8>>,
}

impl Presignature {
    /// Session id usable to construct the matching sign-finish setup.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn key_id(&self) -> KeyId {
        self.key_id
    }

    /// Compressed public key the finished signature will verify under.
    pub fn public_key(&self) -> Vec<u8> {
        self.public_key.clone()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = bincode::serde::encode_to_vec(self, bincode::config::standard())?;
        let mut out = Vec::with_capacity(PRESIGN_MAGIC.len() + body.len());
        out.extend_from_slice(PRESIGN_MAGIC);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let body = bytes
            .strip_prefix(PRESIGN_MAGIC.as_slice())
            .ok_or_else(|| Error::Serialization("not a presignature buffer".into()))?;
        let (presig, _) =
            bincode::serde::decode_from_slice::<Self, _>(body, bincode::config::standard())?;
        Ok(presig)
    }
}
