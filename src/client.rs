//! Model client seam.
//!
//! The engine is transport-agnostic: callers supply a [`ModelClient`] that
//! knows how to reach their models. A failed or timed-out query costs the
//! engine one proposal for the round, never the round itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One chat message in a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

/// Per-query sampling options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub temperature: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Error from a single model query.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
    #[error("model query failed: {0}")]
    Failed(String),

    #[error("model query timed out after {0}s")]
    Timeout(u64),
}

/// Transport to the model pool. Implementations must be safe to query
/// concurrently; the engine fans out one query per pool member each round.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn query(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: QueryOptions,
    ) -> Result<String, QueryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let m = ChatMessage::system("you are a planner");
        assert_eq!(m.role, "system");
        let m = ChatMessage::user("what next?");
        assert_eq!(m.role, "user");
        assert_eq!(m.content, "what next?");
    }

    #[test]
    fn test_query_options_serde_omits_absent_max_tokens() {
        let opts = QueryOptions {
            temperature: 1.2,
            max_tokens: None,
        };
        let json = serde_json::to_string(&opts).unwrap();
        assert!(!json.contains("max_tokens"));
    }
}
