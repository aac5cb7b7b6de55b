//! Multi-model consensus engine.
//!
//! Queries a pool of language models for the next action, clusters their
//! proposals by a normalized fingerprint, and runs a bounded
//! propose/refine/decide protocol: unanimity decides round one, a strict
//! majority decides later rounds, and exhaustion forces the best plurality
//! cluster through with a reduced confidence score.
//!
//! The engine is a library with three seams: a [`client::ModelClient`] for
//! transport, a [`schema::SchemaRegistry`] for the action vocabulary, and an
//! optional [`embedding::Embedder`] for semantic parameter comparison.

pub mod action;
pub mod client;
pub mod config;
pub mod controller;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod merge;
pub mod parser;
pub mod prompts;
pub mod proposal;
pub mod rules;
pub mod schema;
pub mod scoring;
pub mod temperature;

pub use action::{ActionTag, BatchItem};
pub use client::{ChatMessage, ModelClient, QueryError, QueryOptions};
pub use config::ConsensusConfig;
pub use controller::{Decision, DecisionKind, RoundController};
pub use embedding::Embedder;
pub use error::{ConsensusError, ConsensusResult};
pub use fingerprint::{cluster_proposals, Cluster, Fingerprint};
pub use merge::ParameterMerger;
pub use proposal::{MergedProposal, Proposal, WaitValue};
pub use rules::{AgreementRule, CostLedger, RuleEvaluator, StandardRuleEvaluator};
pub use schema::{ActionSchema, SchemaRegistry, StaticRegistry};
pub use scoring::{confidence, select_winner, SelectionKind};
pub use temperature::TemperatureScheduler;
