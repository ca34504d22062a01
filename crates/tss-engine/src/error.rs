//! Error types for engine operations

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a protocol session
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Setup message is malformed or inconsistent with the session inputs
    #[error("setup message validation: {0}")]
    SetupMessage(String),

    /// Encoding or decoding of an opaque blob failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Derivation path string could not be parsed
    #[error("invalid derivation path")]
    InvalidDerivationPath,

    /// Child key derivation failed
    #[error("child key derivation error: {0}")]
    Derivation(String),

    /// Operation called out of lifecycle order
    #[error("invalid session state")]
    InvalidSessionState,

    /// Key generation failed for a reason not attributable to one peer
    #[error("key generation error: {0}")]
    Keygen(String),

    /// Signature generation failed for a reason not attributable to one peer
    #[error("sign generation error: {0}")]
    SignGen(String),

    /// Key export reconstruction failed
    #[error("key export error: {0}")]
    KeyExport(String),

    /// A peer's contribution failed verification; `party` is its index in
    /// the setup message's party list
    #[error("protocol abort by party {party}")]
    Abort { party: usize },
}

impl From<bincode::error::EncodeError> for Error {
    fn from(e: bincode::error::EncodeError) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for Error {
    fn from(e: bincode::error::DecodeError) -> Self {
        Error::Serialization(e.to_string())
    }
}
