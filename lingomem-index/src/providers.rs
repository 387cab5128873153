//! ABOUTME: Local embedding providers with deterministic feature hashing
//!
//! Two self-contained encoders stand in for the model runtimes behind the
//! same contract: a fast low-dimension profile and a deep high-dimension
//! profile. Both hash character/word n-grams of the normalised text into a
//! fixed-width vector and L2-normalise the result, so near-identical strings
//! land near-identically in the space. Deterministic on `(id, text)`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;

use lingomem_core::config::EmbeddingProviderKind;
use lingomem_core::embedding::EmbeddingProvider;
use lingomem_core::error::Result;

/// Feature-hashing encoder over character (and optionally word) n-grams
#[derive(Debug)]
pub struct HashedNgramEmbedding {
    id: &'static str,
    dimensions: usize,
    /// Inclusive range of character n-gram sizes
    char_ngram_min: usize,
    char_ngram_max: usize,
    /// Whether word unigrams join the feature set
    word_features: bool,
    max_input_chars: usize,
}

impl HashedNgramEmbedding {
    /// Fast profile: 256 dimensions, character trigrams only
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            id: "fast-v1",
            dimensions: 256,
            char_ngram_min: 3,
            char_ngram_max: 3,
            word_features: false,
            max_input_chars: 8_192,
        }
    }

    /// Deep profile: 1024 dimensions, character 2–4-grams plus word unigrams
    #[must_use]
    pub const fn deep() -> Self {
        Self {
            id: "deep-v1",
            dimensions: 1024,
            char_ngram_min: 2,
            char_ngram_max: 4,
            word_features: true,
            max_input_chars: 32_768,
        }
    }

    /// Case-fold, strip punctuation, collapse whitespace
    fn normalise(&self, text: &str) -> String {
        let truncated: String = text.chars().take(self.max_input_chars).collect();
        let mut out = String::with_capacity(truncated.len());
        let mut last_space = true;
        for ch in truncated.chars() {
            if ch.is_alphanumeric() {
                out.extend(ch.to_lowercase());
                last_space = false;
            } else if !last_space {
                out.push(' ');
                last_space = true;
            }
        }
        out.trim_end().to_string()
    }

    fn hash_feature(&self, feature: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.id.hash(&mut hasher);
        feature.hash(&mut hasher);
        hasher.finish()
    }

    /// Accumulate one hashed feature into the vector (sign from the hash)
    fn accumulate(&self, vector: &mut [f32], feature: &str) {
        let h = self.hash_feature(feature);
        #[allow(clippy::cast_possible_truncation)]
        let idx = (h % self.dimensions as u64) as usize;
        let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
        vector[idx] += sign;
    }

    /// Encode a single text; empty or whitespace-only input yields zeros
    fn encode_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let normalised = self.normalise(text);
        if normalised.is_empty() {
            return vector;
        }

        let chars: Vec<char> = normalised.chars().collect();
        for n in self.char_ngram_min..=self.char_ngram_max {
            if chars.len() < n {
                continue;
            }
            for window in chars.windows(n) {
                let gram: String = window.iter().collect();
                self.accumulate(&mut vector, &gram);
            }
        }

        if self.word_features {
            for word in normalised.split_whitespace() {
                self.accumulate(&mut vector, word);
            }
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashedNgramEmbedding {
    fn id(&self) -> &'static str {
        self.id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.encode_one(t)).collect())
    }
}

/// Build the configured process-wide provider
#[must_use]
pub fn provider_for(kind: EmbeddingProviderKind) -> Arc<dyn EmbeddingProvider> {
    match kind {
        EmbeddingProviderKind::Fast => Arc::new(HashedNgramEmbedding::fast()),
        EmbeddingProviderKind::Deep => Arc::new(HashedNgramEmbedding::deep()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lingomem_core::embedding::cosine_similarity;

    #[tokio::test]
    async fn test_deterministic() {
        let provider = HashedNgramEmbedding::fast();
        let a = provider.embed(&["Hello, world.".to_string()]).await.unwrap();
        let b = provider.embed(&["Hello, world.".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_unit_norm() {
        let provider = HashedNgramEmbedding::deep();
        let out = provider.embed(&["some sample text".to_string()]).await.unwrap();
        let norm: f32 = out[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_empty_input_is_zero_vector() {
        let provider = HashedNgramEmbedding::fast();
        let out = provider.embed(&[String::new(), "   ".to_string()]).await.unwrap();
        assert!(out[0].iter().all(|&v| v == 0.0));
        assert!(out[1].iter().all(|&v| v == 0.0));
    }

    #[tokio::test]
    async fn test_punctuation_invariance() {
        // "Hello, world." and "Hello World!" normalise identically, so the
        // semantic tier can place them at similarity 1.0
        let provider = HashedNgramEmbedding::fast();
        let out = provider
            .embed(&["Hello, world.".to_string(), "Hello World!".to_string()])
            .await
            .unwrap();
        let sim = cosine_similarity(&out[0], &out[1]);
        assert!(sim > 0.999, "similarity was {sim}");
    }

    #[tokio::test]
    async fn test_distinct_texts_diverge() {
        let provider = HashedNgramEmbedding::fast();
        let out = provider
            .embed(&[
                "The quick brown fox".to_string(),
                "Completely unrelated sentence about databases".to_string(),
            ])
            .await
            .unwrap();
        let sim = cosine_similarity(&out[0], &out[1]);
        assert!(sim < 0.7, "similarity was {sim}");
    }

    #[tokio::test]
    async fn test_oversized_input_truncates() {
        let provider = HashedNgramEmbedding::fast();
        let huge = "x".repeat(2 * 1024 * 1024);
        let out = provider.embed(&[huge]).await.unwrap();
        assert_eq!(out[0].len(), 256);
    }
}
