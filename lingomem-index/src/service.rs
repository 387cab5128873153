//! Embedding service wrapper shared by indexer and matcher

use std::sync::Arc;

use lingomem_core::embedding::EmbeddingProvider;
use lingomem_core::error::{Result, TmError};
use tracing::debug;

/// Thin wrapper around the process-wide embedding provider
///
/// Gives callers single-text convenience over the provider's batch API and a
/// stable place to hang future optimisation layers.
#[derive(Clone)]
pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
}

impl std::fmt::Debug for EmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("provider", &self.provider.id())
            .field("dimensions", &self.provider.dimensions())
            .finish()
    }
}

impl EmbeddingService {
    #[must_use]
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { provider }
    }

    /// Generate one embedding
    ///
    /// # Errors
    ///
    /// Returns `Embedding` when the provider fails or returns nothing
    pub async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        debug!("generating embedding for text of length {}", text.len());
        let texts = vec![text.to_string()];
        let mut embeddings = self.provider.embed(&texts).await?;
        embeddings
            .pop()
            .ok_or_else(|| TmError::Embedding("provider returned no embedding".to_string()))
    }

    /// Generate embeddings for a batch
    ///
    /// # Errors
    ///
    /// Returns `Embedding` when the provider fails
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let embeddings = self.provider.embed(texts).await?;
        if embeddings.len() != texts.len() {
            return Err(TmError::Embedding(format!(
                "provider returned {} embeddings for {} inputs",
                embeddings.len(),
                texts.len()
            )));
        }
        Ok(embeddings)
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    #[must_use]
    pub fn provider_id(&self) -> &'static str {
        self.provider.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::HashedNgramEmbedding;

    #[tokio::test]
    async fn test_embed_single_dimension() {
        let service = EmbeddingService::new(Arc::new(HashedNgramEmbedding::fast()));
        let embedding = service.embed_single("bonjour").await.unwrap();
        assert_eq!(embedding.len(), 256);
        assert_eq!(service.provider_id(), "fast-v1");
    }

    #[tokio::test]
    async fn test_embed_batch_preserves_order() {
        let service = EmbeddingService::new(Arc::new(HashedNgramEmbedding::fast()));
        let texts = vec!["one".to_string(), "two".to_string()];
        let out = service.embed_batch(&texts).await.unwrap();
        assert_eq!(out.len(), 2);
        let single = service.embed_single("two").await.unwrap();
        assert_eq!(out[1], single);
    }
}
