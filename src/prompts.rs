//! Prompt construction for the proposal and refinement rounds.
//!
//! Refinement prompts list peer proposals verbatim but never number them or
//! report vote counts: the executor that eventually receives the winning
//! action cannot see this discussion, so nothing in a proposal may refer to
//! it, and surfacing tallies would anchor models on popularity instead of
//! merit.

use std::fmt::Write as _;

use crate::proposal::Proposal;

const RESPONSE_FORMAT: &str = r#"Respond with a single JSON object and nothing else:
{
  "action": "<action name>",
  "params": { ... },
  "reasoning": "<one or two sentences>"
}

Optional top-level fields:
- "wait": true, false, or a number of turns to wait after acting
- "auto_complete_todo": true or false
- "condense": a positive number of history entries to keep

For batch_sync or batch_async, "params" must contain "actions": a list of
{"action": ..., "params": ...} objects. Batches cannot nest."#;

/// The round-one prompt: the task plus the response contract.
pub fn initial_prompt(task: &str) -> String {
    format!(
        "You are one of several independent planners deciding the single \
         next action for an agent.\n\nTask:\n{task}\n\n{RESPONSE_FORMAT}"
    )
}

/// A refinement-round prompt: restates the task, lists the previous round's
/// proposals, and appends recent round rationales.
pub fn build_refinement_prompt(
    task: &str,
    proposals: &[Proposal],
    history: &[String],
    final_round: bool,
) -> String {
    let mut prompt = String::new();
    let _ = write!(
        prompt,
        "You are one of several independent planners deciding the single \
         next action for an agent. The group has not converged yet.\n\n\
         Task:\n{task}\n\nProposals currently on the table:\n"
    );

    for proposal in proposals {
        let params =
            serde_json::to_string(&proposal.params).unwrap_or_else(|_| "{}".to_string());
        let _ = writeln!(prompt, "- {} {}", proposal.action, params);
        if !proposal.reasoning.trim().is_empty() {
            let _ = writeln!(prompt, "  rationale: {}", proposal.reasoning.trim());
        }
    }

    if !history.is_empty() {
        prompt.push_str("\nRationales from recent rounds:\n");
        for entry in history {
            let _ = writeln!(prompt, "{entry}");
        }
    }

    prompt.push_str(
        "\nReview the proposals as a skeptical peer. Adopt one if its \
         reasoning holds up, improve it if it is close, or argue for a \
         different action if they are all wrong. Do not refer to other \
         proposals in your response; it must stand entirely on its own.\n",
    );
    if final_round {
        prompt.push_str(
            "This is the last round. Commit to the single best action; an \
             undecided answer is worse than an imperfect one.\n",
        );
    }

    let _ = write!(prompt, "\n{RESPONSE_FORMAT}");
    prompt
}

/// One round's rationales, condensed for the history window.
pub fn round_rationale_snapshot(round: u32, proposals: &[Proposal]) -> String {
    let mut snapshot = format!("Round {round}:");
    let mut any = false;
    for proposal in proposals {
        let rationale = proposal.reasoning.trim();
        if rationale.is_empty() {
            continue;
        }
        any = true;
        let _ = write!(snapshot, "\n  {} -- {}", proposal.action, rationale);
    }
    if !any {
        snapshot.push_str("\n  (no rationales given)");
    }
    snapshot
}
