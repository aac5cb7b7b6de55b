//! Per-round sampling temperature schedule.
//!
//! Round one samples hot to diversify proposals; each refinement round
//! cools by a fifth of the family maximum, down to a floor that keeps some
//! exploration alive even late in the protocol.

/// Model families that tolerate a wider temperature range. Matched
/// case-insensitively against the start of the model identifier.
const HIGH_RANGE_PREFIXES: [&str; 5] = ["gemini", "gpt", "grok", "mistral", "qwen"];

const HIGH_MAX: f64 = 2.0;
const HIGH_FLOOR: f64 = 0.4;
const STANDARD_MAX: f64 = 1.0;
const STANDARD_FLOOR: f64 = 0.2;

/// Maps a (model, round) pair to a sampling temperature.
#[derive(Debug, Clone)]
pub struct TemperatureScheduler {
    high_range_prefixes: Vec<String>,
}

impl Default for TemperatureScheduler {
    fn default() -> Self {
        Self {
            high_range_prefixes: HIGH_RANGE_PREFIXES.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl TemperatureScheduler {
    /// Scheduler with a caller-supplied set of high-range family prefixes.
    pub fn with_prefixes(prefixes: Vec<String>) -> Self {
        Self {
            high_range_prefixes: prefixes.into_iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Temperature for `model` in 1-based `round`, rounded to one decimal.
    pub fn temperature(&self, model: &str, round: u32) -> f64 {
        let (max, floor) = if self.is_high_range(model) {
            (HIGH_MAX, HIGH_FLOOR)
        } else {
            (STANDARD_MAX, STANDARD_FLOOR)
        };
        let decayed = max - f64::from(round.saturating_sub(1)) * 0.2 * max;
        let t = decayed.max(floor);
        (t * 10.0).round() / 10.0
    }

    fn is_high_range(&self, model: &str) -> bool {
        let lowered = model.to_lowercase();
        self.high_range_prefixes
            .iter()
            .any(|p| lowered.starts_with(p.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_one_is_hottest() {
        let s = TemperatureScheduler::default();
        assert_eq!(s.temperature("gpt-5", 1), 2.0);
        assert_eq!(s.temperature("claude-sonnet", 1), 1.0);
    }

    #[test]
    fn test_linear_decay_per_round() {
        let s = TemperatureScheduler::default();
        assert_eq!(s.temperature("gemini-pro", 2), 1.6);
        assert_eq!(s.temperature("gemini-pro", 3), 1.2);
        assert_eq!(s.temperature("claude-sonnet", 2), 0.8);
        assert_eq!(s.temperature("claude-sonnet", 3), 0.6);
    }

    #[test]
    fn test_floor_is_respected() {
        let s = TemperatureScheduler::default();
        assert_eq!(s.temperature("grok-4", 9), 0.4);
        assert_eq!(s.temperature("claude-sonnet", 9), 0.2);
    }

    #[test]
    fn test_prefix_match_is_case_insensitive() {
        let s = TemperatureScheduler::default();
        assert_eq!(s.temperature("GPT-5-mini", 1), 2.0);
        assert_eq!(s.temperature("Qwen3-coder", 1), 2.0);
    }

    #[test]
    fn test_custom_prefixes() {
        let s = TemperatureScheduler::with_prefixes(vec!["llama".to_string()]);
        assert_eq!(s.temperature("llama-70b", 1), 2.0);
        assert_eq!(s.temperature("gpt-5", 1), 1.0);
    }
}
