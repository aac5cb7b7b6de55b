//! Configuration for a consensus decision.
//!
//! All knobs live in an explicit struct passed to the controller at
//! construction — there are no environment fallbacks and no implicit default
//! model pool. The consensus threshold itself (strict majority, >50%) is
//! fixed by the protocol and deliberately not configurable.

use serde::{Deserialize, Serialize};

/// Hard ceiling on refinement rounds.
pub const MAX_ROUNDS_LIMIT: u32 = 9;

/// Default number of rounds before a forced decision.
pub const DEFAULT_MAX_ROUNDS: u32 = 4;

/// Default capacity of the per-decision rationale history window.
pub const DEFAULT_SLIDING_WINDOW: usize = 2;

/// Configuration for one [`RoundController`](crate::controller::RoundController).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Models queried each round. Required — an empty pool is rejected
    /// when a decision starts.
    pub model_pool: Vec<String>,

    /// Total rounds before the controller forces a plurality decision.
    /// Clamped to `0..=9`; `0` behaves like `1` (a controller must issue at
    /// least one round to have anything to decide on) except the round-1
    /// unanimity gate is skipped.
    pub max_rounds: u32,

    /// How many rounds of aggregated rationale are carried into refinement
    /// prompts.
    pub sliding_window_size: usize,

    /// Max tokens requested per model query, if the client honors it.
    pub max_tokens: Option<u32>,
}

impl ConsensusConfig {
    /// Create a config for the given model pool with protocol defaults.
    pub fn new(model_pool: Vec<String>) -> Self {
        Self {
            model_pool,
            max_rounds: DEFAULT_MAX_ROUNDS,
            sliding_window_size: DEFAULT_SLIDING_WINDOW,
            max_tokens: None,
        }
    }

    /// Set the round budget, clamped to the protocol range.
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds.min(MAX_ROUNDS_LIMIT);
        self
    }

    /// Set the rationale window capacity.
    pub fn with_sliding_window(mut self, size: usize) -> Self {
        self.sliding_window_size = size;
        self
    }

    /// Set the per-query token budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Rounds the controller will actually run: at least one.
    pub fn effective_rounds(&self) -> u32 {
        self.max_rounds.min(MAX_ROUNDS_LIMIT).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConsensusConfig::new(vec!["model-a".to_string()]);
        assert_eq!(config.max_rounds, 4);
        assert_eq!(config.sliding_window_size, 2);
        assert!(config.max_tokens.is_none());
    }

    #[test]
    fn test_max_rounds_clamped() {
        let config = ConsensusConfig::new(vec![]).with_max_rounds(50);
        assert_eq!(config.max_rounds, 9);
    }

    #[test]
    fn test_zero_rounds_still_runs_one() {
        let config = ConsensusConfig::new(vec![]).with_max_rounds(0);
        assert_eq!(config.effective_rounds(), 1);
    }
}
