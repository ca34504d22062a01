//! Signing message types

use serde::{Deserialize, Serialize};

/// Round 1: nonce commitment and the sender's keyshare rank
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SignRound1 {
    /// Party index within the original keygen set; fixes the evaluation
    /// point the Lagrange weighting uses
    pub rank: u8,
    /// R_i = k_i * G, compressed SEC1
    pub big_r: Vec<u8>,
}

/// Round 2: partial signature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SignRound2 {
    pub partial: Vec<u8>,
}
