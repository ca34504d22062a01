//! # TSS Sessions
//!
//! Session orchestration for threshold-signature protocols.
//!
//! This crate is the layer between callers and the cryptographic engine:
//! - A typed [`Registry`] of opaque integer handles owning every native
//!   object (sessions, keyshares, refresh shares, presignatures)
//! - A uniform session lifecycle — create from setup, drain `output`,
//!   resolve recipients, feed `input`, one-shot `finish`, `free` — across
//!   keygen, refresh, migration, quorum change, signing, pre-signing,
//!   key import, and key export
//! - A generic message [`router`](crate::router) that drives any set of
//!   local sessions to completion without assuming a fan-out
//! - A fault-attributing error model: a failed verification aborts the
//!   session and names the misbehaving party's index
//!
//! ## Example
//!
//! ```rust,ignore
//! use tss_sessions::{setup, router, Registry};
//!
//! let registry = Registry::new();
//! let msg = setup::keygen_setup_msg(2, None, &["p1", "p2", "p3"])?;
//! let parties = ["p1", "p2", "p3"]
//!     .iter()
//!     .map(|id| {
//!         let session = registry.keygen_session_from_setup(&msg, id)?;
//!         Ok(router::RouterParty::new(*id, session))
//!     })
//!     .collect::<tss_sessions::Result<Vec<_>>>()?;
//! let shares = router::run_protocol(&registry, parties)?;
//! ```

pub mod error;
mod keyshare;
mod presign;
pub mod registry;
pub mod router;
pub mod session;
pub mod setup;

pub use error::{Error, Result};
pub use registry::{Handle, Registry};
pub use router::{run_protocol, RouterParty, SessionOutcome};
pub use session::FinishResult;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
