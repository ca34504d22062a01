//! Handle-level keyshare operations
//!
//! Conversions between keyshare handles and opaque byte buffers,
//! retrieval of public key, key id and chain code, child-key derivation,
//! and the refresh-share re-encoding consumed by key refresh.

use tss_engine::{Keyshare, RefreshShare};

use crate::registry::{Handle, Object, Registry};
use crate::{Error, Result};

impl Registry {
    /// Registers a keyshare reconstructed from `keyshare_to_bytes` output.
    pub fn keyshare_from_bytes(&self, buf: &[u8]) -> Result<Handle> {
        if buf.is_empty() {
            return Err(Error::NullInput);
        }
        let share = Keyshare::from_bytes(buf)?;
        Ok(self.insert(Object::Keyshare(Box::new(share))))
    }

    /// Serializes a keyshare handle into an opaque buffer.
    pub fn keyshare_to_bytes(&self, share: Handle) -> Result<Vec<u8>> {
        Ok(self.keyshare(share)?.to_bytes()?)
    }

    /// Compressed public key of the shared key.
    pub fn keyshare_public_key(&self, share: Handle) -> Result<Vec<u8>> {
        Ok(self.keyshare(share)?.public_key())
    }

    /// Key id, equal on every party holding a share of the same key.
    pub fn keyshare_key_id(&self, share: Handle) -> Result<Vec<u8>> {
        Ok(self.keyshare(share)?.key_id().to_vec())
    }

    /// Chain code, when the key carries one.
    pub fn keyshare_chain_code(&self, share: Handle) -> Result<Option<[u8; 32]>> {
        Ok(self.keyshare(share)?.chain_code())
    }

    /// Derives a child public key along a non-hardened path, e.g.
    /// `m/0/1/42`. Non-interactive and deterministic.
    pub fn keyshare_derive_child_public_key(&self, share: Handle, path: &str) -> Result<Vec<u8>> {
        if path.is_empty() {
            return Err(Error::NullInput);
        }
        Ok(self.keyshare(share)?.derive_child_public_key(path)?)
    }

    /// Serializes a keyshare into the refresh-share format consumed by
    /// `key_refresh_session_from_setup`. Distinct from `keyshare_to_bytes`.
    pub fn keyshare_to_refresh_bytes(&self, share: Handle) -> Result<Vec<u8>> {
        Ok(self.keyshare(share)?.to_refresh_bytes()?)
    }

    /// Registers a refresh share from `keyshare_to_refresh_bytes` output.
    pub fn refresh_share_from_bytes(&self, buf: &[u8]) -> Result<Handle> {
        if buf.is_empty() {
            return Err(Error::NullInput);
        }
        let share = RefreshShare::from_bytes(buf)?;
        Ok(self.insert(Object::RefreshShare(Box::new(share))))
    }

    /// Serializes a refresh-share handle back into bytes.
    pub fn refresh_share_to_bytes(&self, share: Handle) -> Result<Vec<u8>> {
        let entry = self.objects.get(&share.0).ok_or(Error::InvalidHandle)?;
        match entry.value() {
            Object::RefreshShare(share) => Ok(share.to_bytes()?),
            _ => Err(Error::InvalidHandleType),
        }
    }

    /// Releases a keyshare or refresh-share handle; secret memory is
    /// wiped on drop.
    pub fn keyshare_free(&self, share: Handle) -> Result<()> {
        self.free_as(share, &["keyshare", "refresh-share"])
    }
}
