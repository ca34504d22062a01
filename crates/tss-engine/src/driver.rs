//! The four primitive capabilities the orchestration layer drives a
//! session through: drain outbound messages, resolve recipients, consume
//! inbound messages, finalize.

use crate::keyshare::Keyshare;
use crate::sign::Presignature;
use crate::Result;

/// What a finished session produced.
pub enum SessionOutput {
    /// A new keyshare (keygen, refresh, migration, quorum change, import)
    Keyshare(Box<Keyshare>),
    /// Quorum-change outcome for a party that left the quorum
    NoKeyshare,
    /// Signature bytes: compressed R followed by s
    Signature(Vec<u8>),
    /// Message-independent first-phase signing material
    Presignature(Box<Presignature>),
    /// Raw secret reconstructed by a key-export receiver
    Secret(Vec<u8>),
}

/// A per-party protocol state machine.
///
/// Implementations buffer out-of-order rounds internally; the caller only
/// moves opaque messages between sessions. `finish` is one-shot: it
/// releases round state unconditionally and every later call fails with an
/// invalid-state error.
pub trait ProtocolDriver: Send + Sync {
    /// Next queued outbound message, or `None` when the queue is empty.
    /// Draining does not advance protocol state; calling after the session
    /// finished is an invalid-state error.
    fn output_message(&mut self) -> Result<Option<Vec<u8>>>;

    /// Enumerates the recipients of a message this session produced,
    /// contiguously from index 0; `None` terminates the enumeration.
    fn message_receiver(&self, message: &[u8], index: usize) -> Result<Option<String>>;

    /// Feeds one inbound message. Returns `true` exactly on the transition
    /// to the finished state; calls after that point are invalid-state
    /// errors.
    fn input_message(&mut self, message: &[u8]) -> Result<bool>;

    /// Extracts the session result. Valid exactly once after
    /// `input_message` returned `true`.
    fn finish(&mut self) -> Result<SessionOutput>;
}
