//! Handle-level presignature operations
//!
//! A presignature handle is single-use: the sign-finish session that
//! takes it marks it consumed, and presenting it to a second session is a
//! handle-in-use error. Reuse across processes cannot be policed here and
//! is undefined; holders should free the handle as soon as a finish
//! session took it.

use tss_engine::Presignature;

use crate::registry::{Handle, Object, Registry};
use crate::{Error, Result};

impl Registry {
    /// Registers a presignature from serialized bytes.
    pub fn presignature_from_bytes(&self, buf: &[u8]) -> Result<Handle> {
        if buf.is_empty() {
            return Err(Error::NullInput);
        }
        let presig = Presignature::from_bytes(buf)?;
        Ok(self.insert(Object::Presignature {
            presig: Box::new(presig),
            consumed: false,
        }))
    }

    /// Serializes a presignature handle back into bytes.
    pub fn presignature_to_bytes(&self, presign: Handle) -> Result<Vec<u8>> {
        let entry = self.objects.get(&presign.0).ok_or(Error::InvalidHandle)?;
        match entry.value() {
            Object::Presignature { presig, .. } => Ok(presig.to_bytes()?),
            _ => Err(Error::InvalidHandleType),
        }
    }

    /// Session id the presignature is bound to; the matching sign-finish
    /// setup is built from it. Derivable from the bytes alone, no live
    /// session required.
    pub fn presignature_session_id(&self, presign: Handle) -> Result<[u8; 32]> {
        let entry = self.objects.get(&presign.0).ok_or(Error::InvalidHandle)?;
        match entry.value() {
            Object::Presignature { presig, .. } => Ok(presig.session_id()),
            _ => Err(Error::InvalidHandleType),
        }
    }

    /// Releases a presignature handle; secret memory is wiped on drop.
    pub fn presignature_free(&self, presign: Handle) -> Result<()> {
        self.free_as(presign, &["presignature"])
    }
}
