//! Action tags and batch sub-actions.
//!
//! Actions form a closed set: every proposal names one of these tags, and
//! anything else is rejected at parse time with an unknown-action failure.
//! There is no runtime registration of new tags — callers who need custom
//! parameter schemas supply their own [`SchemaRegistry`](crate::schema::SchemaRegistry)
//! keyed by this enum instead.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of actions a model may propose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTag {
    /// Re-assess the situation before acting.
    Orient,
    /// Block until an external condition changes.
    Wait,
    /// Send a message to another agent or the user.
    SendMessage,
    /// Spawn a child agent with its own objective.
    SpawnAgent,
    /// Run a shell command.
    ExecuteShell,
    /// Mark a todo item as done.
    CompleteTodo,
    /// Declare the current task finished.
    FinishTask,
    /// Execute a sequence of sub-actions in order.
    BatchSync,
    /// Execute a set of sub-actions concurrently.
    BatchAsync,
}

impl ActionTag {
    /// Parse a wire-format tag. Returns `None` for anything outside the set.
    pub fn parse(s: &str) -> Option<ActionTag> {
        match s {
            "orient" => Some(ActionTag::Orient),
            "wait" => Some(ActionTag::Wait),
            "send_message" => Some(ActionTag::SendMessage),
            "spawn_agent" => Some(ActionTag::SpawnAgent),
            "execute_shell" => Some(ActionTag::ExecuteShell),
            "complete_todo" => Some(ActionTag::CompleteTodo),
            "finish_task" => Some(ActionTag::FinishTask),
            "batch_sync" => Some(ActionTag::BatchSync),
            "batch_async" => Some(ActionTag::BatchAsync),
            _ => None,
        }
    }

    /// The wire-format name of this tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionTag::Orient => "orient",
            ActionTag::Wait => "wait",
            ActionTag::SendMessage => "send_message",
            ActionTag::SpawnAgent => "spawn_agent",
            ActionTag::ExecuteShell => "execute_shell",
            ActionTag::CompleteTodo => "complete_todo",
            ActionTag::FinishTask => "finish_task",
            ActionTag::BatchSync => "batch_sync",
            ActionTag::BatchAsync => "batch_async",
        }
    }

    /// Whether this tag wraps a list of sub-actions.
    pub fn is_batch(&self) -> bool {
        matches!(self, ActionTag::BatchSync | ActionTag::BatchAsync)
    }

    /// All known tags.
    pub fn all() -> &'static [ActionTag] {
        &[
            ActionTag::Orient,
            ActionTag::Wait,
            ActionTag::SendMessage,
            ActionTag::SpawnAgent,
            ActionTag::ExecuteShell,
            ActionTag::CompleteTodo,
            ActionTag::FinishTask,
            ActionTag::BatchSync,
            ActionTag::BatchAsync,
        ]
    }
}

impl std::fmt::Display for ActionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One sub-action inside a batch proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    /// Sub-action tag. Batches cannot nest — a batch tag here is rejected
    /// at parse time.
    pub action: ActionTag,
    /// Sub-action parameters.
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

impl BatchItem {
    pub fn new(action: ActionTag) -> Self {
        Self {
            action,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        self.params.insert(key.to_string(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        for tag in ActionTag::all() {
            assert_eq!(ActionTag::parse(tag.as_str()), Some(*tag));
        }
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(ActionTag::parse("summon_demon"), None);
        assert_eq!(ActionTag::parse(""), None);
        assert_eq!(ActionTag::parse("Execute_Shell"), None);
    }

    #[test]
    fn test_is_batch() {
        assert!(ActionTag::BatchSync.is_batch());
        assert!(ActionTag::BatchAsync.is_batch());
        assert!(!ActionTag::ExecuteShell.is_batch());
    }

    #[test]
    fn test_serde_wire_format() {
        let json = serde_json::to_string(&ActionTag::ExecuteShell).unwrap();
        assert_eq!(json, "\"execute_shell\"");
        let parsed: ActionTag = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ActionTag::ExecuteShell);
    }

    #[test]
    fn test_display_matches_wire() {
        assert_eq!(ActionTag::BatchAsync.to_string(), "batch_async");
    }
}
