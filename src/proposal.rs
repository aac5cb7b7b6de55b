//! Proposal types — one model's parsed answer for a round, and the merged
//! proposal a cluster collapses into.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::{ActionTag, BatchItem};

/// A model's wait directive: a plain flag, or a number of turns to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WaitValue {
    Flag(bool),
    Turns(u64),
}

impl WaitValue {
    /// Whether this directive asks to block at all. `Turns(0)` is
    /// equivalent to `Flag(false)`.
    pub fn is_blocking(&self) -> bool {
        match self {
            WaitValue::Flag(b) => *b,
            WaitValue::Turns(n) => *n > 0,
        }
    }
}

/// One model's parsed action choice for the current round.
///
/// Immutable once parsed; discarded after the round completes (only the
/// rationale may survive into the history window).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    /// The proposed action.
    pub action: ActionTag,

    /// Raw parameter values, keyed by parameter name.
    pub params: BTreeMap<String, Value>,

    /// Free-text rationale for the choice.
    pub reasoning: String,

    /// Optional wait directive. Never present when the action is itself
    /// `wait`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<WaitValue>,

    /// Whether the model wants the current todo auto-completed after this
    /// action. Never present when the action is itself `complete_todo`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_complete_todo: Option<bool>,

    /// Optional request to condense conversation history to this many
    /// entries. Always positive when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condense: Option<u64>,

    /// Parsed sub-actions for batch proposals; empty otherwise.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_actions: Vec<BatchItem>,

    /// Which model produced this proposal.
    pub source_model: String,
}

impl Proposal {
    /// Minimal constructor for a non-batch proposal.
    pub fn new(action: ActionTag, source_model: &str) -> Self {
        Self {
            action,
            params: BTreeMap::new(),
            reasoning: String::new(),
            wait: None,
            auto_complete_todo: None,
            condense: None,
            sub_actions: Vec::new(),
            source_model: source_model.to_string(),
        }
    }

    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }

    pub fn with_reasoning(mut self, reasoning: &str) -> Self {
        self.reasoning = reasoning.to_string();
        self
    }

    pub fn with_wait(mut self, wait: WaitValue) -> Self {
        self.wait = Some(wait);
        self
    }

    pub fn with_sub_actions(mut self, items: Vec<BatchItem>) -> Self {
        self.sub_actions = items;
        self
    }
}

/// A single executable decision merged from a cluster of proposals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedProposal {
    pub action: ActionTag,
    pub params: BTreeMap<String, Value>,
    /// First non-empty rationale found among cluster members.
    pub reasoning: String,
    /// Merged wait directive. Defaults to `false` when no member supplied
    /// one — models are assumed non-blocking unless they say otherwise.
    pub wait: WaitValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_complete_todo: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condense: Option<u64>,
    /// Merged sub-actions for batch decisions; empty otherwise.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_actions: Vec<BatchItem>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wait_value_untagged_serde() {
        let flag: WaitValue = serde_json::from_value(json!(true)).unwrap();
        assert_eq!(flag, WaitValue::Flag(true));

        let turns: WaitValue = serde_json::from_value(json!(3)).unwrap();
        assert_eq!(turns, WaitValue::Turns(3));
    }

    #[test]
    fn test_wait_blocking() {
        assert!(WaitValue::Flag(true).is_blocking());
        assert!(WaitValue::Turns(2).is_blocking());
        assert!(!WaitValue::Flag(false).is_blocking());
        assert!(!WaitValue::Turns(0).is_blocking());
    }

    #[test]
    fn test_proposal_builder() {
        let p = Proposal::new(ActionTag::ExecuteShell, "model-a")
            .with_param("command", json!("ls -la"))
            .with_reasoning("list the workspace")
            .with_wait(WaitValue::Flag(false));

        assert_eq!(p.action, ActionTag::ExecuteShell);
        assert_eq!(p.params["command"], json!("ls -la"));
        assert_eq!(p.wait, Some(WaitValue::Flag(false)));
        assert_eq!(p.source_model, "model-a");
    }
}
