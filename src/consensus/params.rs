//! Consensus parameters.
//!
//! Deployments load these from a TOML section next to the rest of the node
//! configuration; defaults match a small production committee. Parameters
//! are validated once when the engine is constructed — an invalid set is a
//! typed error, never a partially initialized engine.

use serde::Deserialize;

use crate::ids::BitSet;

/// Errors from parameter validation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParametersError {
    #[error("poll sample size k must be in 1..={max} (got {k})")]
    InvalidK { k: usize, max: usize },
    #[error("alpha must satisfy k/2 < alpha <= k (k = {k}, alpha = {alpha})")]
    InvalidAlpha { k: usize, alpha: usize },
    #[error(
        "beta thresholds must satisfy 0 < beta_virtuous <= beta_rogue \
         (beta_virtuous = {beta_virtuous}, beta_rogue = {beta_rogue})"
    )]
    InvalidBeta { beta_virtuous: u64, beta_rogue: u64 },
}

/// Tuning knobs for the consensus engine and its conflict graph.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Parameters {
    /// Number of peers sampled per poll.
    pub k: usize,
    /// Minimum votes in a poll for a transaction to count it as successful.
    /// Must be a majority of `k`.
    pub alpha: usize,
    /// Consecutive successful polls required to accept a conflict-free
    /// transaction.
    pub beta_virtuous: u64,
    /// Consecutive successful polls required to accept a transaction with
    /// known conflicts. At least `beta_virtuous`.
    pub beta_rogue: u64,
    /// Prefix for metric names exported by this engine instance.
    pub namespace: String,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters {
            k: 20,
            alpha: 14,
            beta_virtuous: 15,
            beta_rogue: 20,
            namespace: "firn".to_string(),
        }
    }
}

impl Parameters {
    /// Check the parameter set is internally consistent.
    pub fn valid(&self) -> Result<(), ParametersError> {
        if self.k == 0 || self.k > BitSet::CAPACITY {
            return Err(ParametersError::InvalidK {
                k: self.k,
                max: BitSet::CAPACITY,
            });
        }
        if self.alpha <= self.k / 2 || self.alpha > self.k {
            return Err(ParametersError::InvalidAlpha {
                k: self.k,
                alpha: self.alpha,
            });
        }
        if self.beta_virtuous == 0 || self.beta_virtuous > self.beta_rogue {
            return Err(ParametersError::InvalidBeta {
                beta_virtuous: self.beta_virtuous,
                beta_rogue: self.beta_rogue,
            });
        }
        Ok(())
    }
}
