//! Embedding collaborator interface and local similarity math.
//!
//! The engine never caches embeddings — callers who want caching wrap their
//! own [`Embedder`]. When no embedder is available, semantic comparisons
//! fall back to a lexical top-term overlap approximation.

use async_trait::async_trait;

/// Error from the embedding service.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("embedding service unavailable: {0}")]
    Unavailable(String),
}

/// External embedding service used by semantic-similarity comparisons.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Cosine similarity, computed locally. Returns `0.0` when either vector is
/// empty or the lengths mismatch.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Jaccard overlap of the two strings' significant terms (lowercased,
/// alphanumeric, longer than 3 characters). Two strings with no significant
/// terms at all compare as identical.
pub fn lexical_overlap(a: &str, b: &str) -> f64 {
    let terms_a = significant_terms(a);
    let terms_b = significant_terms(b);

    if terms_a.is_empty() && terms_b.is_empty() {
        return 1.0;
    }

    let intersection = terms_a.iter().filter(|t| terms_b.contains(*t)).count();
    let union = terms_a.len() + terms_b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

fn significant_terms(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut terms: Vec<String> = cleaned
        .split_whitespace()
        .filter(|t| t.len() > 3)
        .map(|t| t.to_string())
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![0.5, 0.5, 0.7];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_lexical_overlap_paraphrase() {
        let a = "inspect the workspace directory contents";
        let b = "contents of the workspace directory, inspect carefully";
        assert!(lexical_overlap(a, b) > 0.6);
    }

    #[test]
    fn test_lexical_overlap_disjoint() {
        let a = "compile release benchmarks";
        let b = "inspect workspace directory";
        assert_eq!(lexical_overlap(a, b), 0.0);
    }

    #[test]
    fn test_lexical_overlap_short_tokens_ignored() {
        // All tokens <= 3 chars: nothing significant on either side.
        assert_eq!(lexical_overlap("ls -la", "ls -lh"), 1.0);
    }
}
