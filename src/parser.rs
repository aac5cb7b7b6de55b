//! Response parser — raw model text to structured proposals.
//!
//! Models are asked for a JSON object but routinely wrap it in markdown
//! fences or prose. Extraction is tolerant of that decoration; validation is
//! not tolerant of unknown action tags or missing required fields. A
//! response that fails either step yields `None` (logged, never thrown) so
//! the caller owns partial-failure handling for the round.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::action::{ActionTag, BatchItem};
use crate::proposal::{Proposal, WaitValue};

/// Why a response could not become a proposal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("no valid JSON object found in response")]
    InvalidJson,

    #[error("unknown action tag '{0}'")]
    UnknownAction(String),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' must be {expected}")]
    WrongFieldType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("batch sub-actions cannot nest batches")]
    NestedBatch,
}

/// Extract the first valid JSON object from possibly-decorated text.
///
/// Tries, in order: the whole text, fenced code blocks, and balanced-brace
/// substrings. Returns `None` when no parseable object exists.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    for block in fenced_blocks(trimmed) {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(block) {
            return Some(value);
        }
    }

    let bytes = trimmed.as_bytes();
    let mut start = 0;
    while let Some(offset) = trimmed[start..].find('{') {
        let open = start + offset;
        if let Some(end) = balanced_end(&trimmed[open..]) {
            let candidate = &trimmed[open..open + end];
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(candidate) {
                return Some(value);
            }
        }
        // Advance past this brace and keep scanning.
        start = open + 1;
        if start >= bytes.len() {
            break;
        }
    }

    None
}

/// Contents of every ``` fenced block, language hint stripped.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after_fence = &rest[open + 3..];
        let Some(close) = after_fence.find("```") else {
            break;
        };
        let body = &after_fence[..close];
        // Drop a language hint like `json` on the fence line.
        let body = match body.find('\n') {
            Some(nl) if body[..nl].trim().chars().all(|c| c.is_alphanumeric()) => &body[nl + 1..],
            _ => body,
        };
        blocks.push(body.trim());
        rest = &after_fence[close + 3..];
    }
    blocks
}

/// Byte length of the balanced JSON object starting at the first character
/// (which must be `{`), honoring strings and escapes.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a raw model response, logging and returning `None` on any failure
/// so one bad model never aborts a round.
pub fn parse_proposal(raw: &str, source_model: &str) -> Option<Proposal> {
    match try_parse_proposal(raw, source_model) {
        Ok(proposal) => Some(proposal),
        Err(error) => {
            warn!(model = source_model, %error, "discarding unparseable model response");
            None
        }
    }
}

/// Strict parse with a structured failure reason.
pub fn try_parse_proposal(raw: &str, source_model: &str) -> Result<Proposal, ParseError> {
    let value = extract_json(raw).ok_or(ParseError::InvalidJson)?;
    let obj = value.as_object().ok_or(ParseError::InvalidJson)?;

    let action_str = obj
        .get("action")
        .ok_or(ParseError::MissingField("action"))?
        .as_str()
        .ok_or(ParseError::WrongFieldType {
            field: "action",
            expected: "a string",
        })?;
    let action = ActionTag::parse(action_str)
        .ok_or_else(|| ParseError::UnknownAction(action_str.to_string()))?;

    let params: BTreeMap<String, Value> = obj
        .get("params")
        .ok_or(ParseError::MissingField("params"))?
        .as_object()
        .ok_or(ParseError::WrongFieldType {
            field: "params",
            expected: "an object",
        })?
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let reasoning = obj
        .get("reasoning")
        .ok_or(ParseError::MissingField("reasoning"))?
        .as_str()
        .ok_or(ParseError::WrongFieldType {
            field: "reasoning",
            expected: "a string",
        })?
        .to_string();

    // Free-text bug reports ride along in responses; they go to the log
    // sink and nowhere else.
    if let Some(report) = obj.get("bug_report").and_then(Value::as_str) {
        if !report.trim().is_empty() {
            warn!(target: "bug_report", model = source_model, report, "model filed a bug report");
        }
    }

    let sub_actions = if action.is_batch() {
        parse_batch_items(obj.get("params").and_then(|p| p.get("actions")))?
    } else {
        Vec::new()
    };

    let wait = match obj.get("wait") {
        // The wait action never carries a wait directive of its own.
        Some(_) if action == ActionTag::Wait => {
            debug!(model = source_model, "dropping wait directive on wait action");
            None
        }
        Some(Value::Bool(b)) => Some(WaitValue::Flag(*b)),
        Some(Value::Number(n)) => match n.as_u64() {
            Some(turns) => Some(WaitValue::Turns(turns)),
            None => {
                warn!(model = source_model, "dropping negative or fractional wait value");
                None
            }
        },
        Some(_) => {
            warn!(model = source_model, "dropping wait value of wrong type");
            None
        }
        None => None,
    };

    let auto_complete_todo = match obj.get("auto_complete_todo") {
        Some(_) if action == ActionTag::CompleteTodo => {
            debug!(
                model = source_model,
                "dropping auto_complete_todo on complete_todo action"
            );
            None
        }
        Some(Value::Bool(b)) => Some(*b),
        Some(_) => {
            warn!(model = source_model, "dropping auto_complete_todo of wrong type");
            None
        }
        None => None,
    };

    let condense = match obj.get("condense") {
        Some(Value::Number(n)) => match n.as_u64() {
            Some(count) if count > 0 => Some(count),
            _ => {
                warn!(model = source_model, "dropping non-positive condense value");
                None
            }
        },
        Some(_) => {
            warn!(model = source_model, "dropping condense value of wrong type");
            None
        }
        None => None,
    };

    Ok(Proposal {
        action,
        params,
        reasoning,
        wait,
        auto_complete_todo,
        condense,
        sub_actions,
        source_model: source_model.to_string(),
    })
}

fn parse_batch_items(value: Option<&Value>) -> Result<Vec<BatchItem>, ParseError> {
    let items = value
        .ok_or(ParseError::MissingField("params.actions"))?
        .as_array()
        .ok_or(ParseError::WrongFieldType {
            field: "params.actions",
            expected: "an array",
        })?;

    let mut parsed = Vec::with_capacity(items.len());
    for item in items {
        let obj = item.as_object().ok_or(ParseError::WrongFieldType {
            field: "params.actions[]",
            expected: "an object",
        })?;
        let tag_str = obj
            .get("action")
            .and_then(Value::as_str)
            .ok_or(ParseError::MissingField("params.actions[].action"))?;
        let action = ActionTag::parse(tag_str)
            .ok_or_else(|| ParseError::UnknownAction(tag_str.to_string()))?;
        if action.is_batch() {
            return Err(ParseError::NestedBatch);
        }
        let params = match obj.get("params") {
            Some(v) => v
                .as_object()
                .ok_or(ParseError::WrongFieldType {
                    field: "params.actions[].params",
                    expected: "an object",
                })?
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => BTreeMap::new(),
        };
        parsed.push(BatchItem { action, params });
    }
    Ok(parsed)
}
