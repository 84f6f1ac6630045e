//! The embedding index: chunk vectors plus their content, searchable by cosine similarity.
//!
//! An [`Index`] keeps two parallel stores: the vector store (chunk id → vector)
//! and the content store (chunk id → [`Chunk`]). Position `i` in one always
//! belongs to position `i` in the other, so neither store can hold an entry the
//! other lacks. Insertion order is preserved and used to break score ties.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RagConfig;
use crate::document::{Chunk, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::provider::with_timeout;

/// Header describing how an index was built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexManifest {
    /// Identifier of the embedding model that produced every vector.
    pub embedding_model: String,
    /// Dimension of every vector.
    pub dimensions: usize,
    /// Number of entries in each store.
    pub entry_count: usize,
    /// When the index was built.
    pub created_at: DateTime<Utc>,
}

/// An in-memory embedding index.
#[derive(Debug, Clone)]
pub struct Index {
    embedding_model: String,
    dimensions: usize,
    created_at: DateTime<Utc>,
    vectors: Vec<Vec<f32>>,
    norms: Vec<f32>,
    chunks: Vec<Chunk>,
    ids: HashSet<String>,
}

impl Index {
    /// Create an empty index for vectors of `dimensions` produced by `embedding_model`.
    pub fn new(embedding_model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            embedding_model: embedding_model.into(),
            dimensions,
            created_at: Utc::now(),
            vectors: Vec::new(),
            norms: Vec::new(),
            chunks: Vec::new(),
            ids: HashSet::new(),
        }
    }

    /// Reassemble an index from its persisted parts, validating every invariant.
    pub(crate) fn from_parts(
        manifest: &IndexManifest,
        entries: Vec<(Chunk, Vec<f32>)>,
    ) -> std::result::Result<Self, String> {
        if entries.len() != manifest.entry_count {
            return Err(format!(
                "manifest lists {} entries but {} were stored",
                manifest.entry_count,
                entries.len()
            ));
        }

        let mut index = Self::new(manifest.embedding_model.clone(), manifest.dimensions);
        index.created_at = manifest.created_at;
        for (chunk, vector) in entries {
            index.push(chunk, vector).map_err(|e| e.to_string())?;
        }
        Ok(index)
    }

    /// Append a chunk and its vector.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingDimensionMismatch`] for a vector of the wrong
    /// length and [`RagError::Configuration`] for a duplicate chunk id.
    pub fn push(&mut self, chunk: Chunk, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(RagError::EmbeddingDimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
                context: format!("chunk '{}'", chunk.id),
            });
        }
        if !self.ids.insert(chunk.id.clone()) {
            return Err(RagError::Configuration(format!("duplicate chunk id '{}'", chunk.id)));
        }
        self.norms.push(l2_norm(&vector));
        self.vectors.push(vector);
        self.chunks.push(chunk);
        Ok(())
    }

    /// The header describing this index.
    pub fn manifest(&self) -> IndexManifest {
        IndexManifest {
            embedding_model: self.embedding_model.clone(),
            dimensions: self.dimensions,
            entry_count: self.chunks.len(),
            created_at: self.created_at,
        }
    }

    /// Identifier of the embedding model the index was built with.
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    /// Vector dimension.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunks in insertion order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Vectors in insertion order, parallel to [`chunks`](Self::chunks).
    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    /// Rank every entry against `query` and return the best `top_k`.
    ///
    /// Scores are cosine similarities. Equal scores keep insertion order, and a
    /// `top_k` larger than the index returns every entry.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingDimensionMismatch`] if `query` has the wrong length.
    pub fn search_vector(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        if query.len() != self.dimensions {
            return Err(RagError::EmbeddingDimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
                context: "query vector".to_string(),
            });
        }

        let query_norm = l2_norm(query);
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .zip(&self.norms)
            .enumerate()
            .map(|(i, (vector, norm))| (i, cosine_similarity(vector, *norm, query, query_norm)))
            .collect();

        // Stable sort: ties stay in insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| SearchResult { chunk: self.chunks[i].clone(), score })
            .collect())
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity with precomputed norms. Returns 0.0 if either vector has
/// zero magnitude.
fn cosine_similarity(a: &[f32], norm_a: f32, b: &[f32], norm_b: f32) -> f32 {
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (norm_a * norm_b)
}

/// Builds, persists, loads and searches [`Index`]es with one embedding provider.
///
/// # Example
///
/// ```rust,ignore
/// use finrag_rag::{EmbeddingIndex, RagConfig};
///
/// let embedding_index = EmbeddingIndex::new(provider, &RagConfig::default());
/// let index = embedding_index.build(chunks).await?;
/// embedding_index.persist(&index, "index".as_ref())?;
/// let results = embedding_index.search(&index, "What is the invoice total?", 4).await?;
/// ```
#[derive(Clone)]
pub struct EmbeddingIndex {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    timeout: Duration,
}

impl EmbeddingIndex {
    /// Create an embedding index using the batch size and timeout from `config`.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &RagConfig) -> Self {
        Self {
            provider,
            batch_size: config.embed_batch_size.max(1),
            timeout: config.provider_timeout,
        }
    }

    /// The embedding provider.
    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Embed every chunk, in order, and assemble an index.
    ///
    /// # Errors
    ///
    /// Fails the whole build with [`RagError::Embedding`] if any provider call
    /// fails, or [`RagError::EmbeddingDimensionMismatch`] if a vector has the
    /// wrong dimension or the provider returns the wrong number of vectors.
    pub async fn build(&self, chunks: Vec<Chunk>) -> Result<Index> {
        let dimensions = self.provider.dimensions();
        let model = self.provider.model_id().to_string();
        let mut index = Index::new(model.clone(), dimensions);
        let total = chunks.len();

        let mut pending = chunks.into_iter().peekable();
        let mut offset = 0;
        while pending.peek().is_some() {
            let batch: Vec<Chunk> = pending.by_ref().take(self.batch_size).collect();
            let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();

            let vectors =
                with_timeout(&model, self.timeout, self.provider.embed_batch(&texts))
                    .await
                    .map_err(|source| RagError::Embedding {
                        context: format!("chunk batch starting at '{}'", batch[0].id),
                        source,
                    })?;

            if vectors.len() != batch.len() {
                return Err(RagError::EmbeddingDimensionMismatch {
                    expected: batch.len(),
                    actual: vectors.len(),
                    context: format!(
                        "vector count for chunk batch starting at '{}'",
                        batch[0].id
                    ),
                });
            }

            offset += batch.len();
            for (chunk, vector) in batch.into_iter().zip(vectors) {
                index.push(chunk, vector)?;
            }

            debug!(embedded = offset, total, "embedded chunk batch");
        }

        info!(model = %model, dimensions, entry_count = index.len(), "built embedding index");
        Ok(index)
    }

    /// Write `index` to `location`. See [`crate::persist::persist_index`].
    pub fn persist(&self, index: &Index, location: &Path) -> Result<()> {
        crate::persist::persist_index(index, location)
    }

    /// Read an index from `location` and check it matches this provider.
    ///
    /// # Errors
    ///
    /// [`RagError::IndexNotFound`], [`RagError::IndexCorrupt`], or
    /// [`RagError::EmbeddingModelMismatch`].
    pub fn load(&self, location: &Path) -> Result<Index> {
        let index = crate::persist::load_index(location)?;
        self.ensure_compatible(&index)?;
        Ok(index)
    }

    /// Reject indexes built with a different embedding model or dimension.
    pub fn ensure_compatible(&self, index: &Index) -> Result<()> {
        if index.embedding_model() != self.provider.model_id() {
            return Err(RagError::EmbeddingModelMismatch {
                index_model: index.embedding_model().to_string(),
                provider_model: self.provider.model_id().to_string(),
            });
        }
        if index.dimensions() != self.provider.dimensions() {
            return Err(RagError::EmbeddingDimensionMismatch {
                expected: index.dimensions(),
                actual: self.provider.dimensions(),
                context: "provider dimension versus index manifest".to_string(),
            });
        }
        Ok(())
    }

    /// Embed `query` and return the `top_k` most similar chunks.
    pub async fn search(
        &self,
        index: &Index,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        self.ensure_compatible(index)?;

        let model = self.provider.model_id();
        let embedding = with_timeout(model, self.timeout, self.provider.embed(query))
            .await
            .map_err(|source| RagError::Embedding { context: "query".to_string(), source })?;

        let results = index.search_vector(&embedding, top_k)?;
        debug!(result_count = results.len(), top_k, "index search completed");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn chunk(id: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            text: format!("text of {id}"),
            metadata: BTreeMap::new(),
            document_id: "doc".to_string(),
        }
    }

    #[test]
    fn push_rejects_wrong_dimension() {
        let mut index = Index::new("m", 3);
        let err = index.push(chunk("a"), vec![1.0, 0.0]).unwrap_err();
        assert!(matches!(err, RagError::EmbeddingDimensionMismatch { expected: 3, actual: 2, .. }));
        assert!(index.is_empty());
    }

    #[test]
    fn push_rejects_duplicate_ids() {
        let mut index = Index::new("m", 2);
        index.push(chunk("a"), vec![1.0, 0.0]).unwrap();
        assert!(index.push(chunk("a"), vec![0.0, 1.0]).is_err());
        assert_eq!(index.len(), 1);
        assert_eq!(index.vectors().len(), index.chunks().len());
    }

    #[test]
    fn ties_keep_insertion_order() {
        let mut index = Index::new("m", 2);
        index.push(chunk("first"), vec![1.0, 0.0]).unwrap();
        index.push(chunk("second"), vec![2.0, 0.0]).unwrap();
        index.push(chunk("other"), vec![0.0, 1.0]).unwrap();

        let results = index.search_vector(&[1.0, 0.0], 2).unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[test]
    fn top_k_larger_than_index_returns_everything() {
        let mut index = Index::new("m", 2);
        index.push(chunk("a"), vec![1.0, 0.0]).unwrap();
        index.push(chunk("b"), vec![0.0, 1.0]).unwrap();
        assert_eq!(index.search_vector(&[1.0, 1.0], 50).unwrap().len(), 2);
    }

    #[test]
    fn zero_vector_scores_zero() {
        let mut index = Index::new("m", 2);
        index.push(chunk("a"), vec![0.0, 0.0]).unwrap();
        let results = index.search_vector(&[1.0, 0.0], 1).unwrap();
        assert_eq!(results[0].score, 0.0);
    }

    #[test]
    fn query_dimension_is_checked() {
        let index = Index::new("m", 4);
        assert!(index.search_vector(&[1.0], 1).is_err());
    }
}
