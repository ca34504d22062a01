//! # TSS Engine
//!
//! Message-driven protocol drivers for threshold-signature sessions.
//!
//! This crate is the cryptographic collaborator behind the session
//! orchestration layer. It provides:
//! - Distributed Key Generation, key refresh, and key migration
//! - Two-phase threshold Schnorr signing (pre-sign + finish)
//! - Quorum change onto a new party set
//! - Key import from, and export to, a raw private key
//!
//! ## Protocol model
//!
//! Every driver is a synchronous, CPU-bound state machine exposing the
//! same four capabilities: drain outbound messages, resolve a message's
//! recipients, consume inbound messages, and finalize into a result
//! (keyshare, signature, presignature, or exported secret). Message
//! transport between parties is someone else's job.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tss_engine::{KeygenSession, ProtocolDriver, SetupMessage};
//!
//! let setup = SetupMessage::keygen(2, None, &["p1", "p2", "p3"])?;
//! let mut session = KeygenSession::from_setup(setup, "p1")?;
//! while let Some(msg) = session.output_message()? {
//!     // deliver to every receiver the driver enumerates
//! }
//! ```

pub mod driver;
pub mod error;
pub mod keygen;
pub mod keyshare;
pub(crate) mod proto;
pub mod quorum;
pub mod setup;
pub mod sign;
pub mod transfer;

pub use driver::{ProtocolDriver, SessionOutput};
pub use error::{Error, Result};
pub use keygen::{KeygenSession, MigrationSession, RefreshInput, RefreshSession};
pub use keyshare::{Keyshare, RefreshShare};
pub use quorum::QuorumSession;
pub use setup::{KeyId, SessionId, SetupKind, SetupMessage};
pub use sign::{Presignature, SignSession};
pub use transfer::{key_exporter, KeyExportSession, KeyImportSession};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
