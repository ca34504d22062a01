//! Typed handle registry
//!
//! Maps opaque, strictly-positive integer handles to the native objects
//! the orchestration layer owns: sessions, keyshares, refresh shares, and
//! presignatures. Ids are handed out monotonically and never reused, so a
//! stale handle fails deterministically instead of aliasing a newer
//! object. Callers never see anything but the integer.

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use tss_engine::{Keyshare, Presignature, ProtocolDriver, RefreshShare};

use crate::{Error, Result};

/// Opaque handle to one registry object. Zero is the null handle and
/// refers to no object; it is accepted only where a protocol explicitly
/// allows "no secret input" (a party joining a quorum).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub(crate) u32);

impl Handle {
    /// The "no object" handle.
    pub const NULL: Handle = Handle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) enum Object {
    Session(Box<dyn ProtocolDriver>),
    Keyshare(Box<Keyshare>),
    RefreshShare(Box<RefreshShare>),
    Presignature {
        presig: Box<Presignature>,
        consumed: bool,
    },
}

impl Object {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Object::Session(_) => "session",
            Object::Keyshare(_) => "keyshare",
            Object::RefreshShare(_) => "refresh-share",
            Object::Presignature { .. } => "presignature",
        }
    }
}

/// The handle table. `Send + Sync`: distinct handles may be driven from
/// different threads, while each individual session must be driven by one
/// logical thread at a time (caller contract).
pub struct Registry {
    pub(crate) objects: DashMap<u32, Object>,
    next_id: AtomicU32,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    pub(crate) fn insert(&self, object: Object) -> Handle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(handle = id, kind = object.kind(), "registry insert");
        self.objects.insert(id, object);
        Handle(id)
    }

    /// Copies the keyshare behind a handle out of the table.
    pub(crate) fn keyshare(&self, handle: Handle) -> Result<Keyshare> {
        let entry = self.objects.get(&handle.0).ok_or(Error::InvalidHandle)?;
        match entry.value() {
            Object::Keyshare(share) => Ok((**share).clone()),
            _ => Err(Error::InvalidHandleType),
        }
    }

    /// Removes an object whose type matches `expected`; wrong-type frees
    /// leave the object in place.
    pub(crate) fn free_as(&self, handle: Handle, expected: &[&'static str]) -> Result<()> {
        {
            let entry = self.objects.get(&handle.0).ok_or(Error::InvalidHandle)?;
            if !expected.contains(&entry.value().kind()) {
                return Err(Error::InvalidHandleType);
            }
        }
        self.objects.remove(&handle.0).ok_or(Error::InvalidHandle)?;
        tracing::debug!(handle = handle.0, "registry free");
        Ok(())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handle_is_not_registered() {
        let registry = Registry::new();
        assert!(Handle::NULL.is_null());
        assert!(matches!(
            registry.keyshare(Handle::NULL),
            Err(Error::InvalidHandle)
        ));
    }

    #[test]
    fn handles_are_monotone_and_never_reused() {
        let registry = Registry::new();
        let share = sample_keyshare();
        let a = registry.insert(Object::Keyshare(Box::new(share.clone())));
        registry.free_as(a, &["keyshare"]).unwrap();
        let b = registry.insert(Object::Keyshare(Box::new(share)));
        assert_ne!(a, b);
        assert!(matches!(registry.keyshare(a), Err(Error::InvalidHandle)));
    }

    #[test]
    fn double_free_is_an_invalid_handle_error() {
        let registry = Registry::new();
        let handle = registry.insert(Object::Keyshare(Box::new(sample_keyshare())));
        registry.free_as(handle, &["keyshare"]).unwrap();
        assert!(matches!(
            registry.free_as(handle, &["keyshare"]),
            Err(Error::InvalidHandle)
        ));
    }

    fn sample_keyshare() -> Keyshare {
        let bytes = keygen_single();
        Keyshare::from_bytes(&bytes).unwrap()
    }

    // a 2-of-2 keygen run inline to get a real keyshare for registry tests
    fn keygen_single() -> Vec<u8> {
        use tss_engine::{KeygenSession, SessionOutput, SetupMessage};

        let setup = SetupMessage::keygen(2, None, &["a", "b"]).unwrap();
        let mut s1 = KeygenSession::from_setup(setup.clone(), "a").unwrap();
        let mut s2 = KeygenSession::from_setup(setup, "b").unwrap();

        let mut done = (false, false);
        while !(done.0 && done.1) {
            let mut traffic: Vec<(usize, Vec<u8>)> = Vec::new();
            while let Some(m) = s1.output_message().unwrap() {
                traffic.push((1, m));
            }
            while let Some(m) = s2.output_message().unwrap() {
                traffic.push((0, m));
            }
            for (to, m) in traffic {
                if to == 0 {
                    done.0 = s1.input_message(&m).unwrap() || done.0;
                } else {
                    done.1 = s2.input_message(&m).unwrap() || done.1;
                }
            }
        }

        match s1.finish().unwrap() {
            SessionOutput::Keyshare(share) => share.to_bytes().unwrap(),
            _ => unreachable!("keygen finishes into a keyshare"),
        }
    }
}
