//! Crate-level error taxonomy.
//!
//! Per-model failures (unparseable responses, unknown action tags) never
//! surface here — they exclude the offending model from the round and are
//! logged at the parse site. Only hard errors that make the whole decision
//! impossible or nonsensical reach the caller.

use crate::action::ActionTag;

/// Error type for consensus decisions.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// The controller was constructed with an empty model pool.
    #[error("model pool is empty")]
    EmptyModelPool,

    /// All rounds exhausted without a single parseable proposal.
    #[error("no valid proposals after {rounds} round(s)")]
    NoValidProposals { rounds: u32 },

    /// Batch members proposed action sequences of different lengths.
    /// Silently merging these would produce a nonsensical batch.
    #[error("batch sequence length mismatch: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    /// Batch members proposed different action types at the same position.
    #[error("batch sequence type mismatch at position {position}: expected {expected}, got {got}")]
    TypeMismatch {
        position: usize,
        expected: ActionTag,
        got: ActionTag,
    },

    /// The schema registry has no entry for an action.
    #[error("no schema registered for action '{0}'")]
    UnknownAction(ActionTag),
}

/// Result type for consensus operations.
pub type ConsensusResult<T> = Result<T, ConsensusError>;
