//! Action schemas and the schema registry.
//!
//! The registry describes, per action, which parameters exist and which
//! agreement rule governs each. The engine applies those rules during
//! clustering and merging but never defines new ones at runtime.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::action::ActionTag;
use crate::rules::AgreementRule;

/// Priority assigned to actions the registry does not know. Sorts last in
/// tie-breaking.
pub const UNKNOWN_PRIORITY: u32 = 999;

/// Schema for one action: its parameters, agreement rules, and tie-break
/// priority (lower wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSchema {
    pub action: ActionTag,
    pub required_params: Vec<String>,
    pub optional_params: Vec<String>,
    pub consensus_rules: BTreeMap<String, AgreementRule>,
    pub priority: u32,
}

impl ActionSchema {
    pub fn new(action: ActionTag, priority: u32) -> Self {
        Self {
            action,
            required_params: Vec::new(),
            optional_params: Vec::new(),
            consensus_rules: BTreeMap::new(),
            priority,
        }
    }

    pub fn required(mut self, name: &str, rule: AgreementRule) -> Self {
        self.required_params.push(name.to_string());
        self.consensus_rules.insert(name.to_string(), rule);
        self
    }

    pub fn optional(mut self, name: &str, rule: AgreementRule) -> Self {
        self.optional_params.push(name.to_string());
        self.consensus_rules.insert(name.to_string(), rule);
        self
    }

    /// The rule governing a parameter, if declared.
    pub fn rule_for(&self, param: &str) -> Option<&AgreementRule> {
        self.consensus_rules.get(param)
    }

    /// Required parameters first, then optional — the merge order.
    pub fn declared_params(&self) -> impl Iterator<Item = &String> {
        self.required_params
            .iter()
            .chain(self.optional_params.iter())
    }
}

/// Lookup interface the engine consumes. Implemented by the in-crate
/// [`StaticRegistry`] and by callers with their own action schemas.
pub trait SchemaRegistry: Send + Sync {
    /// Schema for an action, or `None` when the registry has no entry.
    fn lookup(&self, action: ActionTag) -> Option<&ActionSchema>;

    /// Tie-break priority for an action; unknown actions sort last.
    fn priority(&self, action: ActionTag) -> u32 {
        self.lookup(action)
            .map(|s| s.priority)
            .unwrap_or(UNKNOWN_PRIORITY)
    }
}

/// In-memory registry keyed by action tag.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    schemas: BTreeMap<ActionTag, ActionSchema>,
}

impl StaticRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in action set with its default parameter schemas.
    pub fn builtin() -> Self {
        use AgreementRule::*;

        let mut registry = Self::default();
        registry.insert(
            ActionSchema::new(ActionTag::Orient, 10)
                .required("focus", SemanticSimilarity { threshold: 0.85 })
                .optional("observations", UnionMerge),
        );
        registry.insert(
            ActionSchema::new(ActionTag::Wait, 20)
                .optional("duration_turns", Percentile { n: 50 }),
        );
        registry.insert(
            ActionSchema::new(ActionTag::SendMessage, 30)
                .required("recipient", ExactMatch)
                .required("content", SemanticSimilarity { threshold: 0.80 }),
        );
        registry.insert(
            ActionSchema::new(ActionTag::ExecuteShell, 40)
                .required("command", ExactMatch)
                .optional("working_dir", ExactMatch)
                .optional("timeout_secs", Percentile { n: 75 }),
        );
        registry.insert(
            ActionSchema::new(ActionTag::SpawnAgent, 50)
                .required("role", ExactMatch)
                .required("objective", SemanticSimilarity { threshold: 0.85 })
                .optional("context", StructuralMerge),
        );
        registry.insert(
            ActionSchema::new(ActionTag::CompleteTodo, 60)
                .required("todo_id", ExactMatch)
                .optional("note", SemanticSimilarity { threshold: 0.80 }),
        );
        registry.insert(
            ActionSchema::new(ActionTag::FinishTask, 70)
                .required("summary", SemanticSimilarity { threshold: 0.90 })
                .optional("artifacts", UnionMerge),
        );
        // Batch actions have no per-parameter rules: their sub-action lists
        // are fingerprinted and merged as sequences. Priority comes from the
        // sub-actions, not these entries.
        registry.insert(
            ActionSchema::new(ActionTag::BatchSync, UNKNOWN_PRIORITY)
                .required("actions", BatchSequenceMerge),
        );
        registry.insert(
            ActionSchema::new(ActionTag::BatchAsync, UNKNOWN_PRIORITY)
                .required("actions", BatchSequenceMerge),
        );
        registry
    }

    pub fn insert(&mut self, schema: ActionSchema) {
        self.schemas.insert(schema.action, schema);
    }
}

impl SchemaRegistry for StaticRegistry {
    fn lookup(&self, action: ActionTag) -> Option<&ActionSchema> {
        self.schemas.get(&action)
    }
}
