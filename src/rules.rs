//! Agreement rules and the per-parameter merge evaluator.
//!
//! Each schema parameter is governed by one [`AgreementRule`] that decides
//! both how values are compared during clustering and how a cluster's values
//! collapse into one merged value. The [`RuleEvaluator`] trait is the seam
//! to the evaluator; [`StandardRuleEvaluator`] is the in-crate
//! implementation, optionally backed by an embedding service for semantic
//! rules.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::action::{ActionTag, BatchItem};
use crate::embedding::{cosine_similarity, lexical_overlap, Embedder};
use crate::proposal::WaitValue;

/// Default scaling applied to a semantic threshold when falling back to
/// lexical overlap. Empirical, not derived — kept configurable on
/// [`StandardRuleEvaluator`].
pub const DEFAULT_LEXICAL_FALLBACK_SCALE: f64 = 0.8;

/// Per-parameter agreement policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AgreementRule {
    /// Values must be literally equal.
    ExactMatch,
    /// String values compared by embedding cosine similarity.
    SemanticSimilarity { threshold: f64 },
    /// Most common value wins.
    ModeSelection,
    /// Array values merge into their deduplicated union.
    UnionMerge,
    /// Object values merge recursively, key by key.
    StructuralMerge,
    /// Numeric values collapse to the nth percentile.
    Percentile { n: u8 },
    /// Batch-only: merge ordered sub-action sequences position by position.
    /// Routed through [`RuleEvaluator::merge_sequences`], never `apply`.
    BatchSequenceMerge,
}

impl AgreementRule {
    pub fn name(&self) -> &'static str {
        match self {
            AgreementRule::ExactMatch => "exact_match",
            AgreementRule::SemanticSimilarity { .. } => "semantic_similarity",
            AgreementRule::ModeSelection => "mode_selection",
            AgreementRule::UnionMerge => "union_merge",
            AgreementRule::StructuralMerge => "structural_merge",
            AgreementRule::Percentile { .. } => "percentile",
            AgreementRule::BatchSequenceMerge => "batch_sequence_merge",
        }
    }
}

/// Error from applying an agreement rule.
///
/// For non-batch rules every variant is recoverable: the merger falls back
/// to a mode vote. The sequence variants are structural and propagate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("no consensus among {0} values")]
    NoConsensus(usize),

    #[error("sequence length mismatch: expected {expected}, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("sequence type mismatch at position {position}: expected {expected}, got {got}")]
    TypeMismatch {
        position: usize,
        expected: ActionTag,
        got: ActionTag,
    },

    #[error("rule {rule} cannot merge a value of type {got}")]
    WrongType { rule: &'static str, got: &'static str },

    #[error("no values to merge")]
    Empty,
}

/// Running tally of embedding usage threaded through rule applications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostLedger {
    /// Number of embedding calls issued.
    pub embedding_calls: u64,
    /// Total characters sent for embedding.
    pub embedded_chars: u64,
}

impl CostLedger {
    pub fn record_embedding(&mut self, chars: usize) {
        self.embedding_calls += 1;
        self.embedded_chars += chars as u64;
    }

    /// Fold another ledger into this one.
    pub fn absorb(&mut self, other: CostLedger) {
        self.embedding_calls += other.embedding_calls;
        self.embedded_chars += other.embedded_chars;
    }
}

/// The generic per-parameter merge evaluator.
#[async_trait]
pub trait RuleEvaluator: Send + Sync {
    /// Apply a non-batch rule across the non-missing values for one
    /// parameter. Errors are recoverable — the caller falls back to mode.
    async fn apply(
        &self,
        rule: AgreementRule,
        values: &[Value],
        ledger: &mut CostLedger,
    ) -> Result<Value, RuleError>;

    /// Merge wait directives across cluster members.
    fn merge_wait(&self, values: &[WaitValue]) -> Result<WaitValue, RuleError>;

    /// Merge ordered sub-action sequences. `LengthMismatch` and
    /// `TypeMismatch` are structural and must propagate; `NoConsensus`
    /// means positions agree on type but not parameters.
    fn merge_sequences(&self, sequences: &[&[BatchItem]]) -> Result<Vec<BatchItem>, RuleError>;
}

/// Standard evaluator implementing every built-in rule locally.
pub struct StandardRuleEvaluator {
    embedder: Option<Arc<dyn Embedder>>,
    lexical_scale: f64,
}

impl StandardRuleEvaluator {
    /// Evaluator with no embedding service: semantic rules use the lexical
    /// overlap approximation.
    pub fn new() -> Self {
        Self {
            embedder: None,
            lexical_scale: DEFAULT_LEXICAL_FALLBACK_SCALE,
        }
    }

    /// Evaluator backed by an embedding service.
    pub fn with_embedder(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder: Some(embedder),
            lexical_scale: DEFAULT_LEXICAL_FALLBACK_SCALE,
        }
    }

    /// Override the lexical fallback threshold scaling.
    pub fn with_lexical_scale(mut self, scale: f64) -> Self {
        self.lexical_scale = scale;
        self
    }

    async fn apply_semantic(
        &self,
        threshold: f64,
        values: &[Value],
        ledger: &mut CostLedger,
    ) -> Result<Value, RuleError> {
        let strings: Vec<&str> = values
            .iter()
            .map(|v| {
                v.as_str().ok_or(RuleError::WrongType {
                    rule: "semantic_similarity",
                    got: value_type_name(v),
                })
            })
            .collect::<Result<_, _>>()?;

        let anchor = strings[0];
        for other in &strings[1..] {
            let similar = match &self.embedder {
                Some(embedder) => {
                    let a = embedder
                        .embed(anchor)
                        .await
                        .map_err(|_| RuleError::NoConsensus(values.len()))?;
                    ledger.record_embedding(anchor.len());
                    let b = embedder
                        .embed(other)
                        .await
                        .map_err(|_| RuleError::NoConsensus(values.len()))?;
                    ledger.record_embedding(other.len());
                    cosine_similarity(&a, &b) >= threshold
                }
                None => lexical_overlap(anchor, other) >= self.lexical_scale * threshold,
            };
            if !similar {
                return Err(RuleError::NoConsensus(values.len()));
            }
        }

        // All values are mutually similar to the anchor; the anchor (first
        // value in cluster member order) is the canonical merged value.
        Ok(values[0].clone())
    }
}

impl Default for StandardRuleEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleEvaluator for StandardRuleEvaluator {
    async fn apply(
        &self,
        rule: AgreementRule,
        values: &[Value],
        ledger: &mut CostLedger,
    ) -> Result<Value, RuleError> {
        if values.is_empty() {
            return Err(RuleError::Empty);
        }

        match rule {
            AgreementRule::ExactMatch => {
                if values.iter().all(|v| v == &values[0]) {
                    Ok(values[0].clone())
                } else {
                    Err(RuleError::NoConsensus(values.len()))
                }
            }
            AgreementRule::SemanticSimilarity { threshold } => {
                self.apply_semantic(threshold, values, ledger).await
            }
            AgreementRule::ModeSelection => {
                mode_value(values).ok_or(RuleError::NoConsensus(values.len()))
            }
            AgreementRule::UnionMerge => {
                let mut union: Vec<Value> = Vec::new();
                for v in values {
                    let items = v.as_array().ok_or(RuleError::WrongType {
                        rule: "union_merge",
                        got: value_type_name(v),
                    })?;
                    for item in items {
                        if !union.contains(item) {
                            union.push(item.clone());
                        }
                    }
                }
                Ok(Value::Array(union))
            }
            AgreementRule::StructuralMerge => {
                let objects: Vec<&Map<String, Value>> = values
                    .iter()
                    .map(|v| {
                        v.as_object().ok_or(RuleError::WrongType {
                            rule: "structural_merge",
                            got: value_type_name(v),
                        })
                    })
                    .collect::<Result<_, _>>()?;
                Ok(Value::Object(structural_merge(&objects)))
            }
            AgreementRule::Percentile { n } => {
                let mut numeric: Vec<(f64, &Value)> = Vec::with_capacity(values.len());
                for v in values {
                    let f = v.as_f64().ok_or(RuleError::WrongType {
                        rule: "percentile",
                        got: value_type_name(v),
                    })?;
                    numeric.push((f, v));
                }
                numeric.sort_by(|a, b| a.0.total_cmp(&b.0));

                // Nearest-rank percentile over the sorted values.
                let rank = ((f64::from(n.min(100)) / 100.0) * numeric.len() as f64).ceil();
                let idx = (rank as usize).max(1) - 1;
                Ok(numeric[idx.min(numeric.len() - 1)].1.clone())
            }
            AgreementRule::BatchSequenceMerge => Err(RuleError::WrongType {
                rule: "batch_sequence_merge",
                got: "parameter value (use merge_sequences)",
            }),
        }
    }

    fn merge_wait(&self, values: &[WaitValue]) -> Result<WaitValue, RuleError> {
        match values.first() {
            None => Err(RuleError::Empty),
            Some(first) if values.iter().all(|v| v == first) => Ok(*first),
            Some(_) => Err(RuleError::NoConsensus(values.len())),
        }
    }

    fn merge_sequences(&self, sequences: &[&[BatchItem]]) -> Result<Vec<BatchItem>, RuleError> {
        let first = sequences.first().ok_or(RuleError::Empty)?;
        let expected = first.len();

        for seq in &sequences[1..] {
            if seq.len() != expected {
                return Err(RuleError::LengthMismatch {
                    expected,
                    got: seq.len(),
                });
            }
        }

        for position in 0..expected {
            let expected_tag = first[position].action;
            for seq in &sequences[1..] {
                if seq[position].action != expected_tag {
                    return Err(RuleError::TypeMismatch {
                        position,
                        expected: expected_tag,
                        got: seq[position].action,
                    });
                }
            }
        }

        // Types align everywhere; parameters must too, or the caller falls
        // back to per-position mode merging.
        let mut merged = Vec::with_capacity(expected);
        for position in 0..expected {
            let anchor = &first[position];
            if sequences[1..]
                .iter()
                .any(|seq| seq[position].params != anchor.params)
            {
                debug!(position, "sequence parameters diverge");
                return Err(RuleError::NoConsensus(sequences.len()));
            }
            merged.push(anchor.clone());
        }
        Ok(merged)
    }
}

/// Most common value by exact equality; ties resolve to the earliest
/// encountered. `None` only for empty input.
pub fn mode_value(values: &[Value]) -> Option<Value> {
    let mut best: Option<(&Value, usize)> = None;
    for candidate in values {
        let count = values.iter().filter(|v| *v == candidate).count();
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((candidate, count)),
        }
    }
    best.map(|(v, _)| v.clone())
}

/// Recursive key-wise merge of objects: keys present anywhere survive,
/// nested objects merge recursively, scalar conflicts resolve by mode.
fn structural_merge(objects: &[&Map<String, Value>]) -> Map<String, Value> {
    let mut keys: Vec<&String> = Vec::new();
    for obj in objects {
        for key in obj.keys() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }

    let mut merged = Map::new();
    for key in keys {
        let present: Vec<&Value> = objects.iter().filter_map(|o| o.get(key)).collect();
        let all_objects: Option<Vec<&Map<String, Value>>> =
            present.iter().map(|v| v.as_object()).collect();
        let value = match all_objects {
            Some(nested) if !nested.is_empty() => Value::Object(structural_merge(&nested)),
            _ => {
                let owned: Vec<Value> = present.into_iter().cloned().collect();
                mode_value(&owned).unwrap_or(Value::Null)
            }
        };
        merged.insert(key.clone(), value);
    }
    merged
}

fn value_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
