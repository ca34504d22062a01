//! Keygen-family message types

use serde::{Deserialize, Serialize};

/// Round 1: Feldman commitments plus this party's chain-code contribution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct KeygenRound1 {
    /// Commitments to every polynomial coefficient, compressed SEC1
    pub commitments: Vec<Vec<u8>>,
    /// Entropy folded into the shared chain code
    pub chain_contrib: [u8; 32],
}

/// Round 2: secret share for the addressed party
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct KeygenRound2 {
    pub share: Vec<u8>,
}

/// Refresh round 1: commitments to the non-constant coefficients of a
/// zero polynomial
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RefreshRound1 {
    pub commitments: Vec<Vec<u8>>,
}

/// Refresh round 2: zero-polynomial share for the addressed party
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RefreshRound2 {
    pub share: Vec<u8>,
}

/// Migration round 1: commitments to the resharing of this party's
/// additive coefficient, plus the public parameters it expects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MigrateRound1 {
    pub commitments: Vec<Vec<u8>>,
    pub public_key: Vec<u8>,
    pub chain_code: Option<[u8; 32]>,
}

/// Migration round 2: reshared coefficient share for the addressed party
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MigrateRound2 {
    pub share: Vec<u8>,
}
