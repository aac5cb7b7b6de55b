//! The round controller — drives the propose/refine/decide protocol.
//!
//! Each round fans out one query per pool member, parses whatever comes
//! back, clusters the proposals, and checks the round's consensus gate:
//! unanimity in round one, strict majority afterwards. When the round
//! budget runs out without consensus, the largest cluster of the last
//! round that produced any proposals wins by plurality.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{ChatMessage, ModelClient, QueryOptions};
use crate::config::ConsensusConfig;
use crate::error::{ConsensusError, ConsensusResult};
use crate::fingerprint::{cluster_proposals, Cluster};
use crate::merge::ParameterMerger;
use crate::parser::parse_proposal;
use crate::prompts::{build_refinement_prompt, initial_prompt, round_rationale_snapshot};
use crate::proposal::{MergedProposal, Proposal};
use crate::rules::{CostLedger, RuleEvaluator};
use crate::schema::SchemaRegistry;
use crate::scoring::{confidence, select_winner};
use crate::temperature::TemperatureScheduler;

/// How a decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// The round's consensus gate was met.
    Consensus,
    /// The round budget ran out; the best cluster was forced through.
    Forced,
}

/// The outcome of one full protocol run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub kind: DecisionKind,
    pub proposal: MergedProposal,
    pub confidence: f64,
    pub rounds_completed: u32,
    pub decided_at: DateTime<Utc>,
    /// Embedding usage accumulated while merging.
    pub cost: CostLedger,
}

/// Drives one decision at a time over a fixed model pool.
pub struct RoundController {
    client: Arc<dyn ModelClient>,
    registry: Arc<dyn SchemaRegistry>,
    evaluator: Arc<dyn RuleEvaluator>,
    scheduler: TemperatureScheduler,
    config: ConsensusConfig,
}

impl RoundController {
    pub fn new(
        client: Arc<dyn ModelClient>,
        registry: Arc<dyn SchemaRegistry>,
        evaluator: Arc<dyn RuleEvaluator>,
        config: ConsensusConfig,
    ) -> Self {
        Self {
            client,
            registry,
            evaluator,
            scheduler: TemperatureScheduler::default(),
            config,
        }
    }

    pub fn with_scheduler(mut self, scheduler: TemperatureScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Run the protocol to a single decision for `task`.
    pub async fn decide(&self, task: &str) -> ConsensusResult<Decision> {
        if self.config.model_pool.is_empty() {
            return Err(ConsensusError::EmptyModelPool);
        }

        let total_rounds = self.config.effective_rounds();
        // A zero-round budget still runs one round, but that round decides
        // by majority instead of unanimity.
        let unanimity_gate = self.config.max_rounds > 0;

        let mut history: VecDeque<String> = VecDeque::new();
        let mut prompt = initial_prompt(task);
        let mut last_contested: Option<(Vec<Cluster>, usize, u32)> = None;

        for round in 1..=total_rounds {
            let proposals = self.run_round(&prompt, round).await;
            let total = proposals.len();
            info!(round, proposals = total, "round collected");

            if total == 0 {
                warn!(round, "no valid proposals this round");
                continue;
            }

            let clusters = cluster_proposals(proposals.clone(), self.registry.as_ref());
            let top_count = clusters[0].count;
            let decided = if round == 1 && unanimity_gate {
                top_count == total
            } else {
                top_count * 2 > total
            };

            if decided {
                info!(round, agreement = top_count, total, "consensus reached");
                return self
                    .finish(
                        DecisionKind::Consensus,
                        &clusters[0],
                        total,
                        round,
                    )
                    .await;
            }

            debug!(round, clusters = clusters.len(), "no consensus");
            if round < total_rounds {
                // Every proposal goes into the prompt verbatim, clustered or
                // not: a paraphrase that landed in someone else's cluster is
                // still a distinct argument worth reviewing.
                history.push_back(round_rationale_snapshot(round, &proposals));
                while history.len() > self.config.sliding_window_size {
                    history.pop_front();
                }
                let window: Vec<String> = history.iter().cloned().collect();
                prompt = build_refinement_prompt(
                    task,
                    &proposals,
                    &window,
                    round + 1 == total_rounds,
                );
            }
            last_contested = Some((clusters, total, round));
        }

        // Budget exhausted: force the best cluster from the last round that
        // produced anything at all.
        let (clusters, total, round) = last_contested
            .ok_or(ConsensusError::NoValidProposals {
                rounds: total_rounds,
            })?;
        let (_, winner) = select_winner(&clusters, total, self.registry.as_ref())
            .ok_or(ConsensusError::NoValidProposals {
                rounds: total_rounds,
            })?;
        info!(
            round,
            agreement = winner.count,
            total,
            "forcing plurality decision at exhaustion"
        );
        self.finish(DecisionKind::Forced, winner, total, total_rounds)
            .await
    }

    /// Fan out one query per pool member and collect the parseable answers.
    /// Query and parse failures cost one proposal each, never the round.
    async fn run_round(&self, prompt: &str, round: u32) -> Vec<Proposal> {
        let queries = self.config.model_pool.iter().map(|model| {
            let options = QueryOptions {
                temperature: self.scheduler.temperature(model, round),
                max_tokens: self.config.max_tokens,
            };
            let messages = vec![ChatMessage::user(prompt)];
            async move {
                match self.client.query(model, &messages, options).await {
                    Ok(raw) => parse_proposal(&raw, model),
                    Err(error) => {
                        warn!(model = model.as_str(), round, %error, "model query failed");
                        None
                    }
                }
            }
        });

        join_all(queries).await.into_iter().flatten().collect()
    }

    async fn finish(
        &self,
        kind: DecisionKind,
        winner: &Cluster,
        total: usize,
        rounds_completed: u32,
    ) -> ConsensusResult<Decision> {
        let merger = ParameterMerger::new(self.registry.as_ref(), self.evaluator.as_ref());
        let (proposal, cost) = merger.merge(winner).await?;

        Ok(Decision {
            id: Uuid::new_v4().to_string(),
            kind,
            proposal,
            confidence: confidence(winner.count, total, rounds_completed),
            rounds_completed,
            decided_at: Utc::now(),
            cost,
        })
    }
}
