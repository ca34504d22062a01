//! Handle-level session lifecycle
//!
//! Creation from a setup message plus whatever secret input the protocol
//! requires, the output/input/receiver message loop, one-shot finish, and
//! free. One API shape across every protocol variant; the secret input's
//! registry type tag decides how a sign session interprets its handle.

use tracing::info;
use tss_engine::{
    key_exporter, KeyExportSession, KeyImportSession, KeygenSession, MigrationSession,
    ProtocolDriver, QuorumSession, RefreshInput, SessionOutput, SetupMessage, SignSession,
};

use crate::registry::{Handle, Object, Registry};
use crate::{Error, Result};

/// What `session_finish` produced; the variant follows the protocol the
/// session was created for.
#[derive(Debug)]
pub enum FinishResult {
    /// Handle to a new keyshare; null when a quorum-change party left the
    /// quorum and so receives nothing
    Keyshare(Handle),
    /// Signature bytes: compressed R followed by s
    Signature(Vec<u8>),
    /// Serialized presignature; feed to `presignature_from_bytes` to use
    Presignature(Vec<u8>),
    /// Raw secret reconstructed by a key-export receiver
    Secret(Vec<u8>),
}

fn decode_setup(setup: &[u8]) -> Result<SetupMessage> {
    if setup.is_empty() {
        return Err(Error::NullInput);
    }
    Ok(SetupMessage::decode(setup)?)
}

fn require_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::NullInput);
    }
    Ok(())
}

fn chain_code_array(root_chain_code: Option<&[u8]>) -> Result<Option<[u8; 32]>> {
    match root_chain_code {
        None => Ok(None),
        Some(bytes) => {
            let array: [u8; 32] = bytes.try_into().map_err(|_| Error::InvalidBufferSize)?;
            Ok(Some(array))
        }
    }
}

impl Registry {
    /// Creates a key generation session for `id` from an encoded setup.
    pub fn keygen_session_from_setup(&self, setup: &[u8], id: &str) -> Result<Handle> {
        require_id(id)?;
        let setup = decode_setup(setup)?;
        let driver = KeygenSession::from_setup(setup, id)?;
        Ok(self.insert(Object::Session(Box::new(driver))))
    }

    /// Creates a key refresh session. `old_keyshare` may be a keyshare or
    /// a refresh-share handle.
    pub fn key_refresh_session_from_setup(
        &self,
        setup: &[u8],
        id: &str,
        old_keyshare: Handle,
    ) -> Result<Handle> {
        require_id(id)?;
        let setup = decode_setup(setup)?;

        let old = {
            let entry = self
                .objects
                .get(&old_keyshare.0)
                .ok_or(Error::InvalidHandle)?;
            match entry.value() {
                Object::Keyshare(share) => RefreshInput::Keyshare(share.clone()),
                Object::RefreshShare(share) => RefreshInput::RefreshShare(share.clone()),
                _ => return Err(Error::InvalidHandleType),
            }
        };

        let driver = tss_engine::RefreshSession::from_setup(setup, id, old)?;
        Ok(self.insert(Object::Session(Box::new(driver))))
    }

    /// Creates a key migration session from this party's additive secret
    /// coefficient and the publicly expected key material.
    pub fn key_migration_session_from_setup(
        &self,
        setup: &[u8],
        id: &str,
        public_key: &[u8],
        root_chain_code: Option<&[u8]>,
        secret_coefficient: &[u8],
    ) -> Result<Handle> {
        require_id(id)?;
        if public_key.is_empty() || secret_coefficient.is_empty() {
            return Err(Error::NullInput);
        }
        if secret_coefficient.len() != 32 {
            return Err(Error::InvalidBufferSize);
        }
        let chain = chain_code_array(root_chain_code)?;
        let setup = decode_setup(setup)?;

        let driver = MigrationSession::from_setup(setup, id, public_key, chain, secret_coefficient)?;
        Ok(self.insert(Object::Session(Box::new(driver))))
    }

    /// Creates a quorum change session. Parties joining the quorum pass
    /// `Handle::NULL`; parties in the old set pass their keyshare.
    pub fn qc_session_from_setup(&self, setup: &[u8], id: &str, keyshare: Handle) -> Result<Handle> {
        require_id(id)?;
        let setup = decode_setup(setup)?;

        let share = if keyshare.is_null() {
            None
        } else {
            Some(self.keyshare(keyshare)?)
        };

        let driver = QuorumSession::from_setup(setup, id, share)?;
        Ok(self.insert(Object::Session(Box::new(driver))))
    }

    /// Creates a signing session. `share_or_presign` is either a keyshare
    /// (full sign or pre-sign, by setup kind) or a presignature (finish
    /// phase); the registry type tag decides. A presignature is consumed
    /// by the session that takes it and cannot be presented twice.
    pub fn sign_session_from_setup(
        &self,
        setup: &[u8],
        id: &str,
        share_or_presign: Handle,
    ) -> Result<Handle> {
        require_id(id)?;
        let setup = decode_setup(setup)?;

        enum Input {
            Share(Box<tss_engine::Keyshare>),
            Presig(Box<tss_engine::Presignature>),
        }

        let input = {
            let mut entry = self
                .objects
                .get_mut(&share_or_presign.0)
                .ok_or(Error::InvalidHandle)?;
            match entry.value_mut() {
                Object::Keyshare(share) => Input::Share(share.clone()),
                Object::Presignature { presig, consumed } => {
                    if *consumed {
                        return Err(Error::HandleInUse);
                    }
                    *consumed = true;
                    Input::Presig(presig.clone())
                }
                _ => return Err(Error::InvalidHandleType),
            }
        };

        let driver = match &input {
            Input::Share(share) => SignSession::from_keyshare(setup, id, share),
            Input::Presig(presig) => SignSession::from_presignature(setup, id, presig),
        };

        let driver = match driver {
            Ok(driver) => driver,
            Err(e) => {
                // a failed creation must not burn the presignature
                if let Input::Presig(_) = input {
                    if let Some(mut entry) = self.objects.get_mut(&share_or_presign.0) {
                        if let Object::Presignature { consumed, .. } = entry.value_mut() {
                            *consumed = false;
                        }
                    }
                }
                return Err(e.into());
            }
        };

        Ok(self.insert(Object::Session(Box::new(driver))))
    }

    /// Creates the key import initiator session; returns its handle and
    /// the setup message every importer joins with. The initiator is the
    /// first entry of `ids` and holds the raw private key.
    pub fn key_import_initiator_new(
        &self,
        private_key: &[u8],
        root_chain_code: Option<&[u8]>,
        threshold: u8,
        ids: &[&str],
    ) -> Result<(Handle, Vec<u8>)> {
        if private_key.is_empty() || ids.is_empty() {
            return Err(Error::NullInput);
        }
        if private_key.len() != 32 {
            return Err(Error::InvalidBufferSize);
        }
        let chain = chain_code_array(root_chain_code)?;

        let (driver, setup) = KeyImportSession::initiator(private_key, chain, threshold, ids)?;
        let setup_bytes = setup.encode()?;
        let handle = self.insert(Object::Session(Box::new(driver)));
        Ok((handle, setup_bytes))
    }

    /// Joins a key import as a plain importer.
    pub fn key_importer_new(&self, setup: &[u8], id: &str) -> Result<Handle> {
        require_id(id)?;
        let setup = decode_setup(setup)?;
        let driver = KeyImportSession::importer(setup, id)?;
        Ok(self.insert(Object::Session(Box::new(driver))))
    }

    /// Creates the key export receiver session; returns its handle and
    /// the setup message the exporters consume.
    pub fn key_export_receiver_new(
        &self,
        keyshare: Handle,
        ids: &[&str],
    ) -> Result<(Handle, Vec<u8>)> {
        if ids.is_empty() {
            return Err(Error::NullInput);
        }
        let share = self.keyshare(keyshare)?;
        let (driver, setup) = KeyExportSession::receiver(&share, ids)?;
        let setup_bytes = setup.encode()?;
        let handle = self.insert(Object::Session(Box::new(driver)));
        Ok((handle, setup_bytes))
    }

    /// One-shot exporter: produces the contribution message for the
    /// receiver named in the setup, and that receiver's name. No session
    /// is allocated; exporters learn nothing.
    pub fn key_exporter(
        &self,
        keyshare: Handle,
        id: &str,
        setup: &[u8],
    ) -> Result<(Vec<u8>, String)> {
        require_id(id)?;
        let setup = decode_setup(setup)?;
        let share = self.keyshare(keyshare)?;
        Ok(key_exporter(&setup, id, &share)?)
    }

    /// Drains the next outbound message from a running session; `None`
    /// when nothing is pending. Call repeatedly until empty before
    /// delivering, a round may emit several messages.
    pub fn session_output(&self, session: Handle) -> Result<Option<Vec<u8>>> {
        let mut entry = self.objects.get_mut(&session.0).ok_or(Error::InvalidHandle)?;
        match entry.value_mut() {
            Object::Session(driver) => Ok(driver.output_message()?),
            _ => Err(Error::InvalidHandleType),
        }
    }

    /// Enumerates the recipients of a message this session produced.
    /// Probe with `index` from 0 upward; `None` ends the enumeration and
    /// recipients are contiguous, so stop at the first empty result.
    pub fn session_message_receiver(
        &self,
        session: Handle,
        message: &[u8],
        index: usize,
    ) -> Result<Option<String>> {
        if message.is_empty() {
            return Err(Error::NullInput);
        }
        let entry = self.objects.get(&session.0).ok_or(Error::InvalidHandle)?;
        match entry.value() {
            Object::Session(driver) => Ok(driver.message_receiver(message, index)?),
            _ => Err(Error::InvalidHandleType),
        }
    }

    /// Feeds one inbound message. Returns `true` exactly when the session
    /// transitions to finished; `session_finish` becomes valid then.
    pub fn session_input(&self, session: Handle, message: &[u8]) -> Result<bool> {
        if message.is_empty() {
            return Err(Error::NullInput);
        }
        let mut entry = self.objects.get_mut(&session.0).ok_or(Error::InvalidHandle)?;
        match entry.value_mut() {
            Object::Session(driver) => Ok(driver.input_message(message)?),
            _ => Err(Error::InvalidHandleType),
        }
    }

    /// Finalizes the session and extracts its result. Valid exactly once;
    /// the session's round state is released unconditionally and every
    /// later call fails with an invalid-state error. The handle itself
    /// still requires `session_free`.
    pub fn session_finish(&self, session: Handle) -> Result<FinishResult> {
        let output = {
            let mut entry = self.objects.get_mut(&session.0).ok_or(Error::InvalidHandle)?;
            match entry.value_mut() {
                Object::Session(driver) => driver.finish()?,
                _ => return Err(Error::InvalidHandleType),
            }
        };

        Ok(match output {
            SessionOutput::Keyshare(share) => {
                let handle = self.insert(Object::Keyshare(share));
                info!(keyshare = %handle, "session finished into a keyshare");
                FinishResult::Keyshare(handle)
            }
            SessionOutput::NoKeyshare => FinishResult::Keyshare(Handle::NULL),
            SessionOutput::Signature(sig) => FinishResult::Signature(sig),
            SessionOutput::Presignature(presig) => FinishResult::Presignature(presig.to_bytes()?),
            SessionOutput::Secret(secret) => FinishResult::Secret(secret),
        })
    }

    /// Releases the session handle. Safe from any lifecycle state; a
    /// handle already freed is an invalid-handle error, never a panic.
    pub fn session_free(&self, session: Handle) -> Result<()> {
        self.free_as(session, &["session"])
    }
}
