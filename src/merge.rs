//! Parameter merger — collapses one cluster into a single merged proposal.
//!
//! Every parameter declared by the action's schema merges under its
//! agreement rule; a rule failure on an ordinary parameter falls back to a
//! mode vote and never surfaces. Batch sequences are the exception:
//! structurally incompatible sequences are a hard error, because silently
//! merging them would produce a nonsensical batch.

use serde_json::Value;
use tracing::{debug, warn};

use crate::action::{ActionTag, BatchItem};
use crate::error::{ConsensusError, ConsensusResult};
use crate::fingerprint::Cluster;
use crate::proposal::{MergedProposal, Proposal, WaitValue};
use crate::rules::{mode_value, AgreementRule, CostLedger, RuleError, RuleEvaluator};
use crate::schema::SchemaRegistry;

/// Merges clusters under the registry's per-parameter agreement rules.
pub struct ParameterMerger<'a> {
    registry: &'a dyn SchemaRegistry,
    evaluator: &'a dyn RuleEvaluator,
}

impl<'a> ParameterMerger<'a> {
    pub fn new(registry: &'a dyn SchemaRegistry, evaluator: &'a dyn RuleEvaluator) -> Self {
        Self {
            registry,
            evaluator,
        }
    }

    /// Produce the single merged proposal for a cluster, plus the embedding
    /// cost accumulated by rule applications.
    pub async fn merge(
        &self,
        cluster: &Cluster,
    ) -> ConsensusResult<(MergedProposal, CostLedger)> {
        let mut ledger = CostLedger::default();
        let action = cluster.representative().action;

        let (params, sub_actions) = if action.is_batch() {
            let items = self.merge_batch(action, &cluster.members)?;
            let actions_json = serde_json::to_value(&items).unwrap_or(Value::Array(vec![]));
            let mut params = std::collections::BTreeMap::new();
            params.insert("actions".to_string(), actions_json);
            (params, items)
        } else {
            (
                self.merge_params(action, &cluster.members, &mut ledger)
                    .await?,
                Vec::new(),
            )
        };

        let merged = MergedProposal {
            action,
            params,
            reasoning: first_reasoning(&cluster.members),
            wait: self.merge_wait(&cluster.members),
            auto_complete_todo: merge_auto_complete(&cluster.members),
            condense: merge_condense(&cluster.members),
            sub_actions,
        };

        Ok((merged, ledger))
    }

    async fn merge_params(
        &self,
        action: ActionTag,
        members: &[Proposal],
        ledger: &mut CostLedger,
    ) -> ConsensusResult<std::collections::BTreeMap<String, Value>> {
        let schema = self
            .registry
            .lookup(action)
            .ok_or(ConsensusError::UnknownAction(action))?;

        let mut merged = std::collections::BTreeMap::new();
        for name in schema.declared_params() {
            let values: Vec<Value> = members
                .iter()
                .filter_map(|m| m.params.get(name).cloned())
                .collect();
            if values.is_empty() {
                continue;
            }

            // Undeclared rules merge by mode — the least surprising default.
            let rule = schema
                .rule_for(name)
                .copied()
                .unwrap_or(AgreementRule::ModeSelection);

            let value = match self.evaluator.apply(rule, &values, ledger).await {
                Ok(value) => value,
                Err(error) => {
                    debug!(
                        param = name.as_str(),
                        rule = rule.name(),
                        %error,
                        "rule failed; falling back to mode vote"
                    );
                    match mode_value(&values) {
                        Some(value) => value,
                        None => continue,
                    }
                }
            };
            merged.insert(name.clone(), value);
        }
        Ok(merged)
    }

    fn merge_batch(
        &self,
        action: ActionTag,
        members: &[Proposal],
    ) -> ConsensusResult<Vec<BatchItem>> {
        // Async batches are order-insensitive: align members by sorting
        // their items by tag before the positional merge.
        let sequences: Vec<Vec<BatchItem>> = members
            .iter()
            .map(|m| {
                let mut items = m.sub_actions.clone();
                if action == ActionTag::BatchAsync {
                    items.sort_by_key(|i| i.action);
                }
                items
            })
            .collect();
        let refs: Vec<&[BatchItem]> = sequences.iter().map(|s| s.as_slice()).collect();

        match self.evaluator.merge_sequences(&refs) {
            Ok(items) => Ok(items),
            Err(RuleError::LengthMismatch { expected, got }) => {
                Err(ConsensusError::LengthMismatch { expected, got })
            }
            Err(RuleError::TypeMismatch {
                position,
                expected,
                got,
            }) => Err(ConsensusError::TypeMismatch {
                position,
                expected,
                got,
            }),
            Err(error) => {
                debug!(%error, "sequence merge failed; falling back to per-position mode");
                Ok(mode_merge_sequences(&refs))
            }
        }
    }

    fn merge_wait(&self, members: &[Proposal]) -> WaitValue {
        let values: Vec<WaitValue> = members.iter().filter_map(|m| m.wait).collect();
        if values.is_empty() {
            warn!("no cluster member supplied wait; defaulting to non-blocking");
            return WaitValue::Flag(false);
        }
        match self.evaluator.merge_wait(&values) {
            Ok(value) => value,
            Err(_) => mode_wait(&values),
        }
    }
}

/// Per-position mode merge for sequences whose types agree but whose
/// parameters do not. At each position the most common sub-action type wins,
/// then each of its parameters resolves by a per-key mode vote.
fn mode_merge_sequences(sequences: &[&[BatchItem]]) -> Vec<BatchItem> {
    let max_len = sequences.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut merged = Vec::with_capacity(max_len);

    for position in 0..max_len {
        let at_position: Vec<&BatchItem> = sequences
            .iter()
            .filter_map(|s| s.get(position))
            .collect();

        let Some(winning_tag) = mode_tag(&at_position) else {
            continue;
        };
        let with_tag: Vec<&BatchItem> = at_position
            .iter()
            .filter(|i| i.action == winning_tag)
            .copied()
            .collect();

        let mut keys: Vec<&String> = Vec::new();
        for item in &with_tag {
            for key in item.params.keys() {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }

        let mut params = std::collections::BTreeMap::new();
        for key in keys {
            let values: Vec<Value> = with_tag
                .iter()
                .filter_map(|i| i.params.get(key).cloned())
                .collect();
            if let Some(value) = mode_value(&values) {
                params.insert(key.clone(), value);
            }
        }
        merged.push(BatchItem {
            action: winning_tag,
            params,
        });
    }
    merged
}

fn mode_tag(items: &[&BatchItem]) -> Option<ActionTag> {
    let mut best: Option<(ActionTag, usize)> = None;
    for item in items {
        let count = items.iter().filter(|i| i.action == item.action).count();
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((item.action, count)),
        }
    }
    best.map(|(tag, _)| tag)
}

fn mode_wait(values: &[WaitValue]) -> WaitValue {
    let mut best: Option<(WaitValue, usize)> = None;
    for candidate in values {
        let count = values.iter().filter(|v| *v == candidate).count();
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((*candidate, count)),
        }
    }
    best.map(|(v, _)| v).unwrap_or(WaitValue::Flag(false))
}

/// Conservative auto-complete merge: any explicit `false` vetoes, any
/// explicit `true` otherwise carries, silence stays silent.
fn merge_auto_complete(members: &[Proposal]) -> Option<bool> {
    let values: Vec<bool> = members.iter().filter_map(|m| m.auto_complete_todo).collect();
    if values.is_empty() {
        None
    } else if values.iter().any(|v| !v) {
        Some(false)
    } else {
        Some(true)
    }
}

/// Mode vote among members that asked to condense; omitted when none did.
fn merge_condense(members: &[Proposal]) -> Option<u64> {
    let values: Vec<u64> = members.iter().filter_map(|m| m.condense).collect();
    if values.is_empty() {
        return None;
    }
    let mut best: Option<(u64, usize)> = None;
    for candidate in &values {
        let count = values.iter().filter(|v| *v == candidate).count();
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((*candidate, count)),
        }
    }
    best.map(|(v, _)| v)
}

fn first_reasoning(members: &[Proposal]) -> String {
    members
        .iter()
        .map(|m| m.reasoning.trim())
        .find(|r| !r.is_empty())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::cluster_proposals;
    use crate::rules::StandardRuleEvaluator;
    use crate::schema::StaticRegistry;
    use serde_json::json;

    fn shell(command: &str, model: &str) -> Proposal {
        Proposal::new(ActionTag::ExecuteShell, model)
            .with_param("command", json!(command))
            .with_reasoning("inspect workspace")
    }

    fn single_cluster(proposals: Vec<Proposal>) -> Cluster {
        let registry = StaticRegistry::builtin();
        let mut clusters = cluster_proposals(proposals, &registry);
        assert_eq!(clusters.len(), 1, "test proposals must form one cluster");
        clusters.remove(0)
    }

    #[tokio::test]
    async fn test_merge_exact_agreement() {
        let registry = StaticRegistry::builtin();
        let evaluator = StandardRuleEvaluator::new();
        let merger = ParameterMerger::new(&registry, &evaluator);

        let cluster = single_cluster(vec![shell("ls -la", "m1"), shell("ls -la", "m2")]);
        let (merged, _) = merger.merge(&cluster).await.unwrap();

        assert_eq!(merged.action, ActionTag::ExecuteShell);
        assert_eq!(merged.params["command"], json!("ls -la"));
        assert_eq!(merged.reasoning, "inspect workspace");
    }

    #[tokio::test]
    async fn test_merge_wait_defaults_false_with_no_input() {
        let registry = StaticRegistry::builtin();
        let evaluator = StandardRuleEvaluator::new();
        let merger = ParameterMerger::new(&registry, &evaluator);

        let cluster = single_cluster(vec![shell("ls", "m1"), shell("ls", "m2")]);
        let (merged, _) = merger.merge(&cluster).await.unwrap();
        assert_eq!(merged.wait, WaitValue::Flag(false));
    }

    #[tokio::test]
    async fn test_merge_wait_mode_fallback_on_split() {
        let registry = StaticRegistry::builtin();
        let evaluator = StandardRuleEvaluator::new();
        let merger = ParameterMerger::new(&registry, &evaluator);

        let cluster = single_cluster(vec![
            shell("ls", "m1").with_wait(WaitValue::Flag(true)),
            shell("ls", "m2").with_wait(WaitValue::Flag(true)),
            shell("ls", "m3").with_wait(WaitValue::Flag(false)),
        ]);
        let (merged, _) = merger.merge(&cluster).await.unwrap();
        assert_eq!(merged.wait, WaitValue::Flag(true));
    }

    #[tokio::test]
    async fn test_merge_auto_complete_false_vetoes() {
        let registry = StaticRegistry::builtin();
        let evaluator = StandardRuleEvaluator::new();
        let merger = ParameterMerger::new(&registry, &evaluator);

        let mut a = shell("ls", "m1");
        a.auto_complete_todo = Some(true);
        let mut b = shell("ls", "m2");
        b.auto_complete_todo = Some(false);

        let cluster = single_cluster(vec![a, b]);
        let (merged, _) = merger.merge(&cluster).await.unwrap();
        assert_eq!(merged.auto_complete_todo, Some(false));
    }

    #[tokio::test]
    async fn test_merge_auto_complete_omitted_when_absent() {
        let registry = StaticRegistry::builtin();
        let evaluator = StandardRuleEvaluator::new();
        let merger = ParameterMerger::new(&registry, &evaluator);

        let cluster = single_cluster(vec![shell("ls", "m1"), shell("ls", "m2")]);
        let (merged, _) = merger.merge(&cluster).await.unwrap();
        assert_eq!(merged.auto_complete_todo, None);
    }

    #[tokio::test]
    async fn test_merge_skips_param_nobody_supplied() {
        let registry = StaticRegistry::builtin();
        let evaluator = StandardRuleEvaluator::new();
        let merger = ParameterMerger::new(&registry, &evaluator);

        let cluster = single_cluster(vec![shell("ls", "m1"), shell("ls", "m2")]);
        let (merged, _) = merger.merge(&cluster).await.unwrap();
        assert!(!merged.params.contains_key("working_dir"));
    }

    #[tokio::test]
    async fn test_merge_batch_structural_error_propagates() {
        let registry = StaticRegistry::builtin();
        let evaluator = StandardRuleEvaluator::new();
        let merger = ParameterMerger::new(&registry, &evaluator);

        // Hand-built cluster with incompatible sequences: one vs two items.
        let a = Proposal::new(ActionTag::BatchSync, "m1")
            .with_sub_actions(vec![BatchItem::new(ActionTag::Orient)]);
        let b = Proposal::new(ActionTag::BatchSync, "m2").with_sub_actions(vec![
            BatchItem::new(ActionTag::Orient),
            BatchItem::new(ActionTag::ExecuteShell),
        ]);
        let cluster = Cluster {
            count: 2,
            fingerprint: crate::fingerprint::fingerprint(&a, &registry),
            members: vec![a, b],
        };

        let err = merger.merge(&cluster).await.unwrap_err();
        assert!(matches!(err, ConsensusError::LengthMismatch { .. }));
    }

    #[tokio::test]
    async fn test_merge_batch_param_divergence_falls_back_to_mode() {
        let registry = StaticRegistry::builtin();
        let evaluator = StandardRuleEvaluator::new();
        let merger = ParameterMerger::new(&registry, &evaluator);

        let item = |cmd: &str| {
            BatchItem::new(ActionTag::ExecuteShell).with_param("command", json!(cmd))
        };
        let proposals = vec![
            Proposal::new(ActionTag::BatchSync, "m1").with_sub_actions(vec![item("ls")]),
            Proposal::new(ActionTag::BatchSync, "m2").with_sub_actions(vec![item("ls")]),
            Proposal::new(ActionTag::BatchSync, "m3").with_sub_actions(vec![item("pwd")]),
        ];
        let cluster = single_cluster(proposals);
        let (merged, _) = merger.merge(&cluster).await.unwrap();

        assert_eq!(merged.sub_actions.len(), 1);
        assert_eq!(merged.sub_actions[0].params["command"], json!("ls"));
        assert_eq!(merged.params["actions"][0]["params"]["command"], json!("ls"));
    }

    #[tokio::test]
    async fn test_merge_timeout_percentile() {
        let registry = StaticRegistry::builtin();
        let evaluator = StandardRuleEvaluator::new();
        let merger = ParameterMerger::new(&registry, &evaluator);

        // Hand-built cluster: divergent percentile values fingerprint apart
        // (spec §4.2, raw-value signature), so cluster_proposals would split
        // them; the merge path itself is what's under test here.
        let a = shell("ls", "m1").with_param("timeout_secs", json!(10));
        let b = shell("ls", "m2").with_param("timeout_secs", json!(10));
        let c = shell("ls", "m3").with_param("timeout_secs", json!(30));
        let cluster = Cluster {
            count: 3,
            fingerprint: crate::fingerprint::fingerprint(&a, &registry),
            members: vec![a, b, c],
        };
        let (merged, _) = merger.merge(&cluster).await.unwrap();
        // 75th percentile of [10, 10, 30], nearest rank.
        assert_eq!(merged.params["timeout_secs"], json!(30));
    }
}
