//! Setup-message construction and field decoding at the byte-blob level
//!
//! Thin, validated wrappers over the engine codec. Decoders are pure and
//! repeatable; any party, listed or not, may inspect a setup blob.

use tss_engine::SetupMessage;

use crate::registry::{Handle, Registry};
use crate::{Error, Result};

fn key_id_array(key_id: &[u8]) -> Result<[u8; 32]> {
    key_id.try_into().map_err(|_| Error::InvalidBufferSize)
}

/// Builds a keygen setup message. An empty `key_id` means "generate new";
/// a refresh pins the existing key's id here.
pub fn keygen_setup_msg(threshold: u8, key_id: Option<&[u8]>, ids: &[&str]) -> Result<Vec<u8>> {
    let key_id = match key_id {
        None | Some(&[]) => None,
        Some(bytes) => Some(key_id_array(bytes)?),
    };
    Ok(SetupMessage::keygen(threshold, key_id, ids)?.encode()?)
}

/// Builds a sign setup message. Without `message_hash` the sessions run
/// the pre-sign phase only and finish into presignatures.
pub fn sign_setup_msg(
    key_id: &[u8],
    chain_path: Option<&str>,
    message_hash: Option<&[u8]>,
    ids: &[&str],
) -> Result<Vec<u8>> {
    if key_id.is_empty() {
        return Err(Error::NullInput);
    }
    let message_hash = match message_hash {
        None | Some(&[]) => None,
        Some(bytes) => Some(bytes),
    };
    Ok(SetupMessage::sign(key_id_array(key_id)?, chain_path, message_hash, ids)?.encode()?)
}

/// Builds the second-phase sign setup from a presignature's session id.
pub fn finish_setup_msg(session_id: &[u8], message_hash: &[u8], ids: &[&str]) -> Result<Vec<u8>> {
    if session_id.is_empty() || message_hash.is_empty() {
        return Err(Error::NullInput);
    }
    let session_id: [u8; 32] = session_id.try_into().map_err(|_| Error::InvalidBufferSize)?;
    Ok(SetupMessage::sign_finish(session_id, message_hash, ids)?.encode()?)
}

/// Decodes the key id from a setup blob.
pub fn decode_key_id(setup: &[u8]) -> Result<Vec<u8>> {
    if setup.is_empty() {
        return Err(Error::NullInput);
    }
    Ok(tss_engine::setup::decode_key_id(setup)?)
}

/// Decodes the message hash from a setup blob.
pub fn decode_message(setup: &[u8]) -> Result<Vec<u8>> {
    if setup.is_empty() {
        return Err(Error::NullInput);
    }
    Ok(tss_engine::setup::decode_message(setup)?)
}

/// Decodes the signing-session id from a setup blob.
pub fn decode_session_id(setup: &[u8]) -> Result<Vec<u8>> {
    if setup.is_empty() {
        return Err(Error::NullInput);
    }
    Ok(tss_engine::setup::decode_session_id(setup)?)
}

/// Decodes the party name at `index`; fails for any index at or past the
/// end of the party list.
pub fn decode_party_name(setup: &[u8], index: usize) -> Result<String> {
    if setup.is_empty() {
        return Err(Error::NullInput);
    }
    Ok(tss_engine::setup::decode_party_name(setup, index)?)
}

impl Registry {
    /// Builds a quorum-change setup message from the proposing party's
    /// keyshare. `ids` is the union of old and new sets;
    /// `old_parties`/`new_parties` index into it.
    pub fn qc_setup_msg_new(
        &self,
        keyshare: Handle,
        new_threshold: u8,
        ids: &[&str],
        old_parties: &[u8],
        new_parties: &[u8],
    ) -> Result<Vec<u8>> {
        if ids.is_empty() {
            return Err(Error::NullInput);
        }
        let share = self.keyshare(keyshare)?;
        let setup = SetupMessage::quorum_change(
            share.key_id(),
            &share.public_key(),
            new_threshold,
            ids,
            old_parties,
            new_parties,
        )?;
        Ok(setup.encode()?)
    }
}
