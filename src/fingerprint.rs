//! Fingerprint and cluster engine.
//!
//! Proposals cluster by a fingerprint computed from their action and a
//! per-parameter *normalized* signature, so paraphrased answers land in the
//! same cluster. Batch actions bypass parameter signatures entirely and
//! fingerprint on their sub-action tag sequence instead.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::action::ActionTag;
use crate::embedding::{cosine_similarity, lexical_overlap, Embedder};
use crate::proposal::Proposal;
use crate::rules::{AgreementRule, CostLedger, DEFAULT_LEXICAL_FALLBACK_SCALE};
use crate::schema::SchemaRegistry;

/// Equality key used to cluster proposals within a round.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Fingerprint {
    /// Ordinary action: tag plus normalized parameter signature.
    Action {
        tag: ActionTag,
        signature: BTreeMap<String, Value>,
    },
    /// Synchronous batch: ordered sub-action tags. Order is semantically
    /// meaningful — two batches with the same tags in a different order are
    /// different clusters.
    BatchSync { tags: Vec<ActionTag> },
    /// Asynchronous batch: sorted sub-action tags. Order is not meaningful.
    BatchAsync { tags: Vec<ActionTag> },
}

/// Compute the fingerprint for a proposal under the registry's rules.
pub fn fingerprint(proposal: &Proposal, registry: &dyn SchemaRegistry) -> Fingerprint {
    match proposal.action {
        ActionTag::BatchSync => Fingerprint::BatchSync {
            tags: proposal.sub_actions.iter().map(|i| i.action).collect(),
        },
        ActionTag::BatchAsync => {
            let mut tags: Vec<ActionTag> =
                proposal.sub_actions.iter().map(|i| i.action).collect();
            tags.sort();
            Fingerprint::BatchAsync { tags }
        }
        tag => {
            let schema = registry.lookup(tag);
            let mut signature = BTreeMap::new();
            // Missing parameters are simply omitted — absence never
            // contributes to a mismatch.
            for (name, value) in &proposal.params {
                let rule = schema.and_then(|s| s.rule_for(name));
                signature.insert(name.clone(), normalize_param(value, rule));
            }
            Fingerprint::Action { tag, signature }
        }
    }
}

/// Normalize one parameter value for signature comparison.
fn normalize_param(value: &Value, rule: Option<&AgreementRule>) -> Value {
    match rule {
        Some(AgreementRule::SemanticSimilarity { threshold }) => match value.as_str() {
            Some(text) => Value::String(key_term_digest(text, *threshold)),
            None => value.clone(),
        },
        Some(AgreementRule::UnionMerge) => match value.as_array() {
            Some(items) => {
                let mut sorted: Vec<Value> = items.iter().map(canonicalize).collect();
                sorted.sort_by_key(|v| v.to_string());
                Value::Array(sorted)
            }
            None => value.clone(),
        },
        Some(AgreementRule::StructuralMerge) => canonicalize(value),
        // exact_match, percentile, mode_selection, undeclared: raw value.
        _ => value.clone(),
    }
}

/// Normalized key-term digest of a string. Two strings with the same digest
/// are treated as equal regardless of literal text — this is how paraphrases
/// cluster together.
///
/// High thresholds (>= 0.95) demand near-literal agreement, so only repeated
/// whitespace is stripped; lower thresholds also drop punctuation.
pub fn key_term_digest(text: &str, threshold: f64) -> String {
    let lowered = text.to_lowercase();
    let cleaned: String = if threshold >= 0.95 {
        lowered
    } else {
        lowered
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect()
    };

    let mut tokens: Vec<&str> = cleaned
        .split_whitespace()
        .filter(|t| t.len() > 3)
        .collect();
    tokens.sort_unstable();
    tokens.truncate(5);
    tokens.join("_")
}

/// Recursively key-sort nested maps for order-independent comparison.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(&String, &Value)> = map.iter().collect();
            sorted.sort_by_key(|(k, _)| k.as_str());
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), canonicalize(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Group of proposals sharing a fingerprint. Rebuilt every round; never
/// persisted.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub count: usize,
    pub members: Vec<Proposal>,
    pub fingerprint: Fingerprint,
}

impl Cluster {
    /// The first member encountered when grouping — stable, not
    /// content-selected.
    pub fn representative(&self) -> &Proposal {
        &self.members[0]
    }
}

/// Group proposals into clusters of equivalent proposals, sorted by
/// descending count. The sort is stable: equal-count clusters keep their
/// encounter order (final tie-breaking for selection happens in scoring).
pub fn cluster_proposals(proposals: Vec<Proposal>, registry: &dyn SchemaRegistry) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();

    for proposal in proposals {
        let fp = fingerprint(&proposal, registry);
        match clusters.iter_mut().find(|c| c.fingerprint == fp) {
            Some(cluster) => {
                cluster.members.push(proposal);
                cluster.count += 1;
            }
            None => clusters.push(Cluster {
                count: 1,
                members: vec![proposal],
                fingerprint: fp,
            }),
        }
    }

    clusters.sort_by(|a, b| b.count.cmp(&a.count));
    debug!(clusters = clusters.len(), "clustered round proposals");
    clusters
}

/// Pairwise equivalence check between two proposals, independent of full
/// clustering. Parameters governed by `exact_match` must be literally equal;
/// parameters governed by `semantic_similarity(t)` must reach cosine
/// similarity `t` (or the scaled lexical approximation without an embedder).
/// A value present on one side and missing on the other is a mismatch; both
/// missing is a match.
pub async fn proposals_match(
    a: &Proposal,
    b: &Proposal,
    registry: &dyn SchemaRegistry,
    embedder: Option<&dyn Embedder>,
    ledger: &mut CostLedger,
) -> bool {
    if a.action != b.action {
        return false;
    }

    if a.action.is_batch() {
        return fingerprint(a, registry) == fingerprint(b, registry);
    }

    let schema = match registry.lookup(a.action) {
        Some(schema) => schema,
        None => return a.params == b.params,
    };

    for name in schema.declared_params() {
        let (va, vb) = (a.params.get(name), b.params.get(name));
        match schema.rule_for(name) {
            Some(AgreementRule::ExactMatch) => match (va, vb) {
                (None, None) => {}
                (Some(x), Some(y)) if x == y => {}
                _ => return false,
            },
            Some(AgreementRule::SemanticSimilarity { threshold }) => match (va, vb) {
                (None, None) => {}
                (Some(x), Some(y)) => {
                    let similar = match (x.as_str(), y.as_str()) {
                        (Some(sx), Some(sy)) => {
                            semantic_similar(sx, sy, *threshold, embedder, ledger).await
                        }
                        _ => x == y,
                    };
                    if !similar {
                        return false;
                    }
                }
                _ => return false,
            },
            // Other rules do not constrain pairwise equivalence.
            _ => {}
        }
    }

    true
}

/// Semantic comparison of two strings: embedding cosine when a service is
/// reachable, scaled lexical overlap otherwise (including when embedding
/// calls fail mid-comparison).
async fn semantic_similar(
    a: &str,
    b: &str,
    threshold: f64,
    embedder: Option<&dyn Embedder>,
    ledger: &mut CostLedger,
) -> bool {
    if let Some(embedder) = embedder {
        if let (Ok(ea), Ok(eb)) = (embedder.embed(a).await, embedder.embed(b).await) {
            ledger.record_embedding(a.len());
            ledger.record_embedding(b.len());
            return cosine_similarity(&ea, &eb) >= threshold;
        }
    }
    lexical_overlap(a, b) >= DEFAULT_LEXICAL_FALLBACK_SCALE * threshold
}
