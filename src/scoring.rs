//! Winner selection and confidence scoring.
//!
//! A cluster wins a round outright with a strict majority. At protocol
//! exhaustion the largest cluster wins by plurality, with ties broken in a
//! fixed order: action priority, then willingness to wait, then reluctance
//! to auto-complete. Every component sorts ascending, so the more
//! conservative cluster wins a tie.

use crate::fingerprint::Cluster;
use crate::proposal::{Proposal, WaitValue};
use crate::schema::{SchemaRegistry, UNKNOWN_PRIORITY};

/// How a winning cluster earned its win.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionKind {
    /// Strict majority of the round's valid proposals.
    Majority,
    /// Largest cluster at exhaustion, after tie-breaking.
    Plurality,
}

/// Pick the winning cluster among a round's clusters, if any.
///
/// `total` is the number of valid proposals in the round. Returns `None`
/// only when `clusters` is empty.
pub fn select_winner<'a>(
    clusters: &'a [Cluster],
    total: usize,
    registry: &dyn SchemaRegistry,
) -> Option<(SelectionKind, &'a Cluster)> {
    let first = clusters.first()?;
    if first.count * 2 > total {
        return Some((SelectionKind::Majority, first));
    }

    let max_count = first.count;
    let winner = clusters
        .iter()
        .filter(|c| c.count == max_count)
        .min_by_key(|c| tie_break_key(c, registry))?;
    Some((SelectionKind::Plurality, winner))
}

/// Ascending tie-break key: (priority, wait score, auto-complete score).
/// `min_by_key` keeps the first cluster on full ties, preserving the
/// deterministic encounter order from clustering.
fn tie_break_key(cluster: &Cluster, registry: &dyn SchemaRegistry) -> (u32, (i64, i64), (i64, i64)) {
    (
        cluster_priority(cluster, registry),
        wait_score(&cluster.members),
        auto_complete_score(&cluster.members),
    )
}

/// A batch inherits the priority of its most disruptive sub-action; an
/// empty batch sorts last.
fn cluster_priority(cluster: &Cluster, registry: &dyn SchemaRegistry) -> u32 {
    let representative = cluster.representative();
    if representative.action.is_batch() {
        representative
            .sub_actions
            .iter()
            .map(|i| registry.priority(i.action))
            .max()
            .unwrap_or(UNKNOWN_PRIORITY)
    } else {
        registry.priority(representative.action)
    }
}

/// Component-wise sum of each member's wait inclination. Lower means more
/// willing to wait: an explicit wait scores (0, 0), silence (0, 1), a
/// positive turn count (0, 1 + n), an explicit refusal (1, 0).
fn wait_score(members: &[Proposal]) -> (i64, i64) {
    let mut score = (0i64, 0i64);
    for member in members {
        let (a, b) = match member.wait {
            Some(WaitValue::Flag(true)) => (0, 0),
            None => (0, 1),
            // The parser accepts any u64; saturate so an absurd turn count
            // cannot wrap into looking maximally eager.
            Some(WaitValue::Turns(n)) if n > 0 => {
                (0, i64::try_from(n).map_or(i64::MAX, |n| n.saturating_add(1)))
            }
            Some(WaitValue::Turns(_)) | Some(WaitValue::Flag(false)) => (1, 0),
        };
        score.0 += a;
        score.1 = score.1.saturating_add(b);
    }
    score
}

/// Component-wise sum of each member's auto-complete reluctance. Lower
/// means more reluctant: an explicit refusal scores (0, 0), silence (0, 1),
/// an explicit request (1, 0).
fn auto_complete_score(members: &[Proposal]) -> (i64, i64) {
    let mut score = (0i64, 0i64);
    for member in members {
        let (a, b) = match member.auto_complete_todo {
            Some(false) => (0, 0),
            None => (0, 1),
            Some(true) => (1, 0),
        };
        score.0 += a;
        score.1 += b;
    }
    score
}

/// Confidence in a decision: agreement ratio plus an agreement bonus,
/// minus a lateness penalty for decisions past round 3. Clamped to
/// [0.1, 1.0].
pub fn confidence(count: usize, total: usize, round: u32) -> f64 {
    if total == 0 {
        return 0.1;
    }
    let ratio = count as f64 / total as f64;
    let bonus = if ratio > 0.8 {
        0.15
    } else if ratio > 0.6 {
        0.10
    } else if ratio > 0.5 {
        0.05
    } else {
        0.0
    };
    let lateness = if round > 3 {
        f64::from(round - 3) * 0.1
    } else {
        0.0
    };
    (ratio + bonus - lateness).clamp(0.1, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionTag;
    use crate::fingerprint::cluster_proposals;
    use crate::proposal::Proposal;
    use crate::schema::StaticRegistry;
    use serde_json::json;

    fn shell(command: &str, model: &str) -> Proposal {
        Proposal::new(ActionTag::ExecuteShell, model).with_param("command", json!(command))
    }

    #[test]
    fn test_majority_wins_outright() {
        let registry = StaticRegistry::builtin();
        let clusters = cluster_proposals(
            vec![shell("ls", "m1"), shell("ls", "m2"), shell("pwd", "m3")],
            &registry,
        );
        let (kind, winner) = select_winner(&clusters, 3, &registry).unwrap();
        assert_eq!(kind, SelectionKind::Majority);
        assert_eq!(winner.representative().params["command"], json!("ls"));
    }

    #[test]
    fn test_plurality_at_even_split() {
        let registry = StaticRegistry::builtin();
        let clusters = cluster_proposals(
            vec![shell("ls", "m1"), shell("pwd", "m2")],
            &registry,
        );
        let (kind, _) = select_winner(&clusters, 2, &registry).unwrap();
        assert_eq!(kind, SelectionKind::Plurality);
    }

    #[test]
    fn test_tie_break_prefers_lower_priority_action() {
        let registry = StaticRegistry::builtin();
        let orient = || {
            Proposal::new(ActionTag::Orient, "m1")
                .with_param("focus", json!("survey the failing tests first"))
        };

        // Same winner regardless of encounter order.
        let clusters = cluster_proposals(vec![shell("ls", "m2"), orient()], &registry);
        let (kind, winner) = select_winner(&clusters, 2, &registry).unwrap();
        assert_eq!(kind, SelectionKind::Plurality);
        assert_eq!(winner.representative().action, ActionTag::Orient);

        let clusters = cluster_proposals(vec![orient(), shell("ls", "m2")], &registry);
        let (_, winner) = select_winner(&clusters, 2, &registry).unwrap();
        assert_eq!(winner.representative().action, ActionTag::Orient);
    }

    #[test]
    fn test_tie_break_prefers_waiting_cluster() {
        let registry = StaticRegistry::builtin();
        let waiting = shell("ls", "m1").with_wait(WaitValue::Flag(true));
        let refusing = shell("pwd", "m2").with_wait(WaitValue::Flag(false));
        let clusters = cluster_proposals(vec![refusing, waiting], &registry);

        let (_, winner) = select_winner(&clusters, 2, &registry).unwrap();
        assert_eq!(winner.representative().params["command"], json!("ls"));
    }

    #[test]
    fn test_tie_break_huge_turn_count_stays_less_eager() {
        let registry = StaticRegistry::builtin();
        let short = shell("ls", "m1").with_wait(WaitValue::Turns(2));
        let absurd = shell("pwd", "m2").with_wait(WaitValue::Turns(u64::MAX));
        let clusters = cluster_proposals(vec![absurd, short], &registry);

        // A wrapping cast would score the huge count as maximally eager to
        // wait; the shorter wait must keep winning the tie.
        let (_, winner) = select_winner(&clusters, 2, &registry).unwrap();
        assert_eq!(winner.representative().params["command"], json!("ls"));
    }

    #[test]
    fn test_tie_break_prefers_not_auto_completing() {
        let registry = StaticRegistry::builtin();
        let mut eager = shell("ls", "m1");
        eager.auto_complete_todo = Some(true);
        let mut reluctant = shell("pwd", "m2");
        reluctant.auto_complete_todo = Some(false);
        let clusters = cluster_proposals(vec![eager, reluctant], &registry);

        let (_, winner) = select_winner(&clusters, 2, &registry).unwrap();
        assert_eq!(winner.representative().params["command"], json!("pwd"));
    }

    #[test]
    fn test_batch_priority_from_most_disruptive_sub_action() {
        let registry = StaticRegistry::builtin();
        use crate::action::BatchItem;
        let batch = Proposal::new(ActionTag::BatchSync, "m1").with_sub_actions(vec![
            BatchItem::new(ActionTag::Orient),
            BatchItem::new(ActionTag::ExecuteShell),
        ]);
        let clusters = cluster_proposals(vec![batch, shell("ls", "m2")], &registry);

        // Batch priority is 40 (execute_shell), same as the bare shell
        // cluster; clustering order then keeps the first encountered.
        let (_, winner) = select_winner(&clusters, 2, &registry).unwrap();
        assert_eq!(winner.representative().action, ActionTag::BatchSync);
    }

    #[test]
    fn test_no_winner_without_clusters() {
        let registry = StaticRegistry::builtin();
        assert!(select_winner(&[], 0, &registry).is_none());
    }

    #[test]
    fn test_confidence_unanimous_round_one() {
        assert!((confidence(3, 3, 1) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_majority_bonus() {
        // 2 of 3: ratio 0.667, bonus 0.10.
        let c = confidence(2, 3, 2);
        assert!((c - (2.0 / 3.0 + 0.10)).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_lateness_penalty() {
        // 1 of 3 at round 4: ratio 0.333, no bonus, minus 0.1.
        let c = confidence(1, 3, 4);
        assert!((c - (1.0 / 3.0 - 0.1)).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_floor() {
        assert_eq!(confidence(1, 9, 9), 0.1);
        assert_eq!(confidence(0, 0, 1), 0.1);
    }
}
