//! Error taxonomy for the orchestration layer
//!
//! Every operation returns either a success value or one of these kinds;
//! nothing is swallowed. A session that errored stays freeable, and the
//! abort kind carries the index of the party whose contribution failed so
//! callers can decide on exclusion or retry themselves — the core never
//! retries.

use thiserror::Error;

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by registry, session, and lifecycle operations
#[derive(Debug, Error)]
pub enum Error {
    /// Handle not found in the registry (never issued, or already freed)
    #[error("invalid handle, not found in the registry")]
    InvalidHandle,

    /// Handle is exclusively held by another operation, e.g. a consumed
    /// presignature presented to a second finish session
    #[error("handle is already in use")]
    HandleInUse,

    /// Handle refers to an object of a different type
    #[error("handle is not of the expected type")]
    InvalidHandleType,

    /// A required byte or string input was null or empty
    #[error("required input is null or empty")]
    NullInput,

    /// A fixed-size input had the wrong length
    #[error("buffer has an invalid size")]
    InvalidBufferSize,

    /// Operation called out of lifecycle order
    #[error("invalid session state")]
    InvalidSessionState,

    /// Encoding or decoding of an opaque blob failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Derivation path string could not be parsed
    #[error("invalid derivation path")]
    InvalidDerivationPath,

    /// Child key derivation failed
    #[error("child key derivation error: {0}")]
    Derivation(String),

    /// Setup message is malformed or inconsistent with the session inputs
    #[error("setup message validation: {0}")]
    SetupMessage(String),

    /// An output parameter was expected to be empty but was not
    #[error("passed non-empty output buffer")]
    NonEmptyOutputBuffer,

    /// Signature generation failed for a reason not attributable to one peer
    #[error("sign generation error: {0}")]
    SignGen(String),

    /// Key generation failed for a reason not attributable to one peer
    #[error("key generation error: {0}")]
    Keygen(String),

    /// Key export reconstruction failed
    #[error("key export error: {0}")]
    KeyExport(String),

    /// A peer's contribution failed verification; `party` is its index in
    /// the setup message's party list
    #[error("protocol abort by party {party}")]
    Abort { party: usize },

    /// The router completed a full pass with no output, delivery, or
    /// finish; the protocol cannot make progress with the driven sessions
    #[error("no session made progress in a full router pass")]
    Stalled,
}

impl From<tss_engine::Error> for Error {
    fn from(e: tss_engine::Error) -> Self {
        use tss_engine::Error as Engine;
        match e {
            Engine::SetupMessage(msg) => Error::SetupMessage(msg),
            Engine::Serialization(msg) => Error::Serialization(msg),
            Engine::InvalidDerivationPath => Error::InvalidDerivationPath,
            Engine::Derivation(msg) => Error::Derivation(msg),
            Engine::InvalidSessionState => Error::InvalidSessionState,
            Engine::Keygen(msg) => Error::Keygen(msg),
            Engine::SignGen(msg) => Error::SignGen(msg),
            Engine::KeyExport(msg) => Error::KeyExport(msg),
            Engine::Abort { party } => Error::Abort { party },
        }
    }
}
