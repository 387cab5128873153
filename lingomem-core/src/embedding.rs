//! Embedding provider contract
//!
//! The provider is a process-wide service with an explicit lifecycle: built
//! at startup from configuration and passed by reference to indexer and
//! matcher. Implementations must be safe under concurrent `embed` calls or
//! serialise internally.

use async_trait::async_trait;

use crate::error::Result;

/// Maps text to fixed-dimension, L2-normalised float vectors, batched
///
/// Deterministic on `(id, text)`. Empty or whitespace-only input yields a
/// zero vector, which the cascade treats as non-matching.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier recorded in artifact metadata; a mismatch on load
    /// invalidates the artifact set
    fn id(&self) -> &'static str;

    /// Output dimension
    fn dimensions(&self) -> usize;

    /// Longest input in characters; longer texts are truncated, not rejected
    fn max_input_chars(&self) -> usize {
        16_384
    }

    /// Encode a batch; the output has one row per input, each of
    /// `dimensions()` floats
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Cosine similarity of two same-length vectors
///
/// On L2-normalised inputs this equals the inner product; the guard against
/// zero norms makes empty-source sentinel vectors score 0 against anything.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na <= f32::EPSILON || nb <= f32::EPSILON {
        return 0.0;
    }
    dot / (na * nb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identity() {
        let v = vec![0.6, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        let z = vec![0.0, 0.0];
        let v = vec![1.0, 0.0];
        assert_eq!(cosine_similarity(&z, &v), 0.0);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }
}
