//! Embedding provider trait for generating vector embeddings from text.

use async_trait::async_trait;

use crate::error::ProviderResult;

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends (Vertex AI, OpenAI, ...)
/// behind a unified async interface. The default
/// [`embed_batch`](EmbeddingProvider::embed_batch) implementation calls
/// [`embed`](EmbeddingProvider::embed) sequentially; backends that support
/// native batching should override it.
///
/// [`model_id`](EmbeddingProvider::model_id) is recorded in every persisted
/// index and compared at query time, so two providers that produce vectors in
/// different spaces must never report the same id.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs, in input order.
    async fn embed_batch(&self, texts: &[&str]) -> ProviderResult<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Identifier of the embedding model, e.g. `vertex:textembedding-gecko@001`.
    fn model_id(&self) -> &str;
}
