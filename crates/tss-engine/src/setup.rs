//! Setup messages: the immutable protocol parameters every party must
//! agree on before a session starts.
//!
//! Key functionalities:
//! - Constructing setup messages for each protocol family
//! - Deterministic encoding to an opaque byte blob
//! - Pure, repeatable decoding of individual fields (key id, message
//!   hash, session id, party names) from the blob alone

use serde::{Deserialize, Serialize};

use crate::proto::sha256;
use crate::{Error, Result};

/// 32-byte key identifier
pub type KeyId = [u8; 32];

/// 32-byte signing-session identifier
pub type SessionId = [u8; 32];

const SETUP_MAGIC: &[u8; 4] = b"TSS1";

/// Protocol family a setup message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetupKind {
    /// Fresh keygen; also consumed by refresh and migration sessions
    Keygen,
    /// One-shot signing, or pre-signing when no message hash is present
    Sign,
    /// Second-phase signing that consumes a presignature
    SignFinish,
    /// Re-share an existing key onto a new party set
    QuorumChange,
    /// Reconstruct the raw secret at a single receiver
    KeyExport,
    /// Distribute shares of an externally supplied private key
    KeyImport,
}

/// Immutable, self-describing protocol parameters.
///
/// Encoding is deterministic: two setups constructed from the same logical
/// fields encode to identical bytes, so independently constructed copies
/// (e.g. a sign-finish setup rebuilt from a serialized presignature) bind
/// to the same protocol instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupMessage {
    kind: SetupKind,
    threshold: u8,
    parties: Vec<String>,
    key_id: Option<KeyId>,
    chain_path: Option<String>,
    message_hash: Option<Vec<u8>>,
    session_id: Option<SessionId>,
    old_parties: Option<Vec<u8>>,
    new_parties: Option<Vec<u8>>,
    public_key: Option<Vec<u8>>,
    root_chain_code: Option<[u8; 32]>,
    receiver: Option<u8>,
}

impl SetupMessage {
    /// Setup for fresh key generation. An absent `key_id` means "generate
    /// new"; refresh sessions pin the existing id here instead.
    pub fn keygen(threshold: u8, key_id: Option<KeyId>, parties: &[&str]) -> Result<Self> {
        let msg = Self {
            kind: SetupKind::Keygen,
            threshold,
            parties: parties.iter().map(|s| s.to_string()).collect(),
            key_id,
            chain_path: None,
            message_hash: None,
            session_id: None,
            old_parties: None,
            new_parties: None,
            public_key: None,
            root_chain_code: None,
            receiver: None,
        };
        msg.validate()?;
        Ok(msg)
    }

    /// Setup for signing. Without `message_hash` the session stops after
    /// the message-independent phase and finishes into a presignature.
    pub fn sign(
        key_id: KeyId,
        chain_path: Option<&str>,
        message_hash: Option<&[u8]>,
        parties: &[&str],
    ) -> Result<Self> {
        let msg = Self {
            kind: SetupKind::Sign,
            threshold: 0,
            parties: parties.iter().map(|s| s.to_string()).collect(),
            key_id: Some(key_id),
            chain_path: chain_path.map(|p| p.to_string()),
            message_hash: message_hash.map(|m| m.to_vec()),
            session_id: None,
            old_parties: None,
            new_parties: None,
            public_key: None,
            root_chain_code: None,
            receiver: None,
        };
        msg.validate()?;
        Ok(msg)
    }

    /// Setup for the second signing phase, consuming a presignature bound
    /// to `session_id`.
    pub fn sign_finish(
        session_id: SessionId,
        message_hash: &[u8],
        parties: &[&str],
    ) -> Result<Self> {
        let msg = Self {
            kind: SetupKind::SignFinish,
            threshold: 0,
            parties: parties.iter().map(|s| s.to_string()).collect(),
            key_id: None,
            chain_path: None,
            message_hash: Some(message_hash.to_vec()),
            session_id: Some(session_id),
            old_parties: None,
            new_parties: None,
            public_key: None,
            root_chain_code: None,
            receiver: None,
        };
        msg.validate()?;
        Ok(msg)
    }

    /// Setup for a quorum change. `parties` is the union of old and new
    /// sets; `old_parties`/`new_parties` index into it.
    pub fn quorum_change(
        key_id: KeyId,
        public_key: &[u8],
        new_threshold: u8,
        parties: &[&str],
        old_parties: &[u8],
        new_parties: &[u8],
    ) -> Result<Self> {
        let msg = Self {
            kind: SetupKind::QuorumChange,
            threshold: new_threshold,
            parties: parties.iter().map(|s| s.to_string()).collect(),
            key_id: Some(key_id),
            chain_path: None,
            message_hash: None,
            session_id: None,
            old_parties: Some(old_parties.to_vec()),
            new_parties: Some(new_parties.to_vec()),
            public_key: Some(public_key.to_vec()),
            root_chain_code: None,
            receiver: None,
        };
        msg.validate()?;
        Ok(msg)
    }

    /// Setup for key export toward the party at `receiver`.
    pub fn key_export(
        key_id: KeyId,
        public_key: &[u8],
        threshold: u8,
        parties: &[&str],
        receiver: u8,
    ) -> Result<Self> {
        let msg = Self {
            kind: SetupKind::KeyExport,
            threshold,
            parties: parties.iter().map(|s| s.to_string()).collect(),
            key_id: Some(key_id),
            chain_path: None,
            message_hash: None,
            session_id: None,
            old_parties: None,
            new_parties: None,
            public_key: Some(public_key.to_vec()),
            root_chain_code: None,
            receiver: Some(receiver),
        };
        msg.validate()?;
        Ok(msg)
    }

    /// Setup for key import. Produced by the initiator, which is by
    /// convention the first listed party.
    pub fn key_import(
        key_id: KeyId,
        public_key: &[u8],
        threshold: u8,
        parties: &[&str],
        root_chain_code: Option<[u8; 32]>,
    ) -> Result<Self> {
        let msg = Self {
            kind: SetupKind::KeyImport,
            threshold,
            parties: parties.iter().map(|s| s.to_string()).collect(),
            key_id: Some(key_id),
            chain_path: None,
            message_hash: None,
            session_id: None,
            old_parties: None,
            new_parties: None,
            public_key: Some(public_key.to_vec()),
            root_chain_code,
            receiver: None,
        };
        msg.validate()?;
        Ok(msg)
    }

    fn validate(&self) -> Result<()> {
        let n = self.parties.len();
        if n < 2 || n > u8::MAX as usize {
            return Err(Error::SetupMessage(format!(
                "party count {n} outside supported range"
            )));
        }
        for (i, name) in self.parties.iter().enumerate() {
            if name.is_empty() {
                return Err(Error::SetupMessage(format!("party {i} has an empty name")));
            }
            if self.parties[..i].contains(name) {
                return Err(Error::SetupMessage(format!("duplicate party name {name:?}")));
            }
        }

        match self.kind {
            SetupKind::Keygen | SetupKind::KeyImport => {
                let t = self.threshold as usize;
                if t < 2 || t > n {
                    return Err(Error::SetupMessage(format!(
                        "threshold {t} invalid for {n} parties"
                    )));
                }
            }
            SetupKind::QuorumChange => {
                let old = self.old_parties.as_deref().unwrap_or_default();
                let new = self.new_parties.as_deref().unwrap_or_default();
                if old.is_empty() || new.is_empty() {
                    return Err(Error::SetupMessage(
                        "quorum change requires old and new party sets".into(),
                    ));
                }
                for &idx in old.iter().chain(new) {
                    if idx as usize >= n {
                        return Err(Error::SetupMessage(format!(
                            "party index {idx} outside the name list"
                        )));
                    }
                }
                let t = self.threshold as usize;
                if t < 2 || t > new.len() {
                    return Err(Error::SetupMessage(format!(
                        "threshold {t} invalid for {} new parties",
                        new.len()
                    )));
                }
            }
            SetupKind::KeyExport => {
                let receiver = self.receiver.unwrap_or(u8::MAX);
                if receiver as usize >= n {
                    return Err(Error::SetupMessage(format!(
                        "receiver index {receiver} outside the name list"
                    )));
                }
            }
            SetupKind::Sign | SetupKind::SignFinish => {}
        }
        Ok(())
    }

    /// Deterministic opaque encoding.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serde::encode_to_vec(self, bincode::config::standard())?;
        let mut out = Vec::with_capacity(SETUP_MAGIC.len() + body.len());
        out.extend_from_slice(SETUP_MAGIC);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decodes a setup blob. Read-only; may be called by any party,
    /// including parties not listed in the message.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let body = bytes
            .strip_prefix(SETUP_MAGIC.as_slice())
            .ok_or_else(|| Error::Serialization("not a setup message".into()))?;
        let (msg, _) =
            bincode::serde::decode_from_slice::<Self, _>(body, bincode::config::standard())?;
        msg.validate()?;
        Ok(msg)
    }

    /// SHA-256 over the encoded form; binds wire messages to one instance.
    pub(crate) fn digest(&self) -> Result<[u8; 32]> {
        Ok(sha256(&[&self.encode()?]))
    }

    pub fn kind(&self) -> SetupKind {
        self.kind
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn parties(&self) -> &[String] {
        &self.parties
    }

    pub fn party_count(&self) -> usize {
        self.parties.len()
    }

    /// Index of `id` within the party list.
    pub fn party_index(&self, id: &str) -> Result<u16> {
        self.parties
            .iter()
            .position(|p| p == id)
            .map(|i| i as u16)
            .ok_or_else(|| Error::SetupMessage(format!("{id:?} is not a listed party")))
    }

    pub fn key_id(&self) -> Option<KeyId> {
        self.key_id
    }

    pub fn chain_path(&self) -> Option<&str> {
        self.chain_path.as_deref()
    }

    pub fn message_hash(&self) -> Option<&[u8]> {
        self.message_hash.as_deref()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn old_parties(&self) -> Option<&[u8]> {
        self.old_parties.as_deref()
    }

    pub fn new_parties(&self) -> Option<&[u8]> {
        self.new_parties.as_deref()
    }

    pub fn public_key(&self) -> Option<&[u8]> {
        self.public_key.as_deref()
    }

    pub fn root_chain_code(&self) -> Option<[u8; 32]> {
        self.root_chain_code
    }

    pub fn receiver(&self) -> Option<u8> {
        self.receiver
    }
}

/// Decodes the key id from an encoded setup message.
pub fn decode_key_id(setup: &[u8]) -> Result<Vec<u8>> {
    let msg = SetupMessage::decode(setup)?;
    Ok(msg.key_id.map(|id| id.to_vec()).unwrap_or_default())
}

/// Decodes the message hash from an encoded setup message.
pub fn decode_message(setup: &[u8]) -> Result<Vec<u8>> {
    let msg = SetupMessage::decode(setup)?;
    Ok(msg.message_hash.unwrap_or_default())
}

/// Decodes the signing-session id from an encoded setup message.
pub fn decode_session_id(setup: &[u8]) -> Result<Vec<u8>> {
    let msg = SetupMessage::decode(setup)?;
    Ok(msg.session_id.map(|id| id.to_vec()).unwrap_or_default())
}

/// Decodes the party name at `index`; out-of-range indices fail.
pub fn decode_party_name(setup: &[u8], index: usize) -> Result<String> {
    let msg = SetupMessage::decode(setup)?;
    msg.parties
        .get(index)
        .cloned()
        .ok_or_else(|| Error::SetupMessage(format!("party index {index} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SetupMessage {
        SetupMessage::keygen(2, Some([7u8; 32]), &["p1", "p2", "p3"]).unwrap()
    }

    #[test]
    fn encode_is_deterministic() {
        let a = sample().encode().unwrap();
        let b = sample().encode().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn decode_round_trips_every_field() {
        let setup = SetupMessage::sign([9u8; 32], Some("m/0/1"), Some(&[0xAA; 32]), &["a", "b"])
            .unwrap();
        let bytes = setup.encode().unwrap();
        let back = SetupMessage::decode(&bytes).unwrap();
        assert_eq!(back.kind(), SetupKind::Sign);
        assert_eq!(back.key_id(), Some([9u8; 32]));
        assert_eq!(back.chain_path(), Some("m/0/1"));
        assert_eq!(back.message_hash(), Some(&[0xAA; 32][..]));
        assert_eq!(back.parties(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn field_decoding_is_idempotent() {
        let bytes = sample().encode().unwrap();
        let first = decode_key_id(&bytes).unwrap();
        for _ in 0..3 {
            assert_eq!(decode_key_id(&bytes).unwrap(), first);
        }
        assert_eq!(decode_party_name(&bytes, 1).unwrap(), "p2");
        assert_eq!(decode_party_name(&bytes, 1).unwrap(), "p2");
    }

    #[test]
    fn party_name_out_of_range_fails() {
        let bytes = sample().encode().unwrap();
        assert!(decode_party_name(&bytes, 3).is_err());
    }

    #[test]
    fn rejects_bad_threshold_and_duplicate_names() {
        assert!(SetupMessage::keygen(4, None, &["p1", "p2", "p3"]).is_err());
        assert!(SetupMessage::keygen(1, None, &["p1", "p2"]).is_err());
        assert!(SetupMessage::keygen(2, None, &["p1", "p1"]).is_err());
    }

    #[test]
    fn rejects_foreign_bytes() {
        assert!(SetupMessage::decode(b"garbage").is_err());
        assert!(SetupMessage::decode(&[]).is_err());
    }
}
