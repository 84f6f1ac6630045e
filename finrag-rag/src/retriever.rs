//! The retrieval seam between the orchestrator and its backends.

use std::sync::Arc;

use async_trait::async_trait;

use crate::document::SearchResult;
use crate::error::Result;
use crate::index::{EmbeddingIndex, Index};

/// Finds the chunks most relevant to a question.
///
/// Results are ordered by decreasing score and hold at most `top_k` entries.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve up to `top_k` chunks for `question`.
    async fn retrieve(&self, question: &str, top_k: usize) -> Result<Vec<SearchResult>>;

    /// Short backend name for logs and readiness output.
    fn backend(&self) -> &'static str;
}

/// Retrieval over an [`Index`] loaded from local storage.
#[derive(Clone)]
pub struct LocalIndexRetriever {
    embedding_index: EmbeddingIndex,
    index: Arc<Index>,
}

impl LocalIndexRetriever {
    /// Search `index` with the provider behind `embedding_index`.
    pub fn new(embedding_index: EmbeddingIndex, index: Arc<Index>) -> Self {
        Self { embedding_index, index }
    }

    /// The loaded index.
    pub fn index(&self) -> &Arc<Index> {
        &self.index
    }
}

#[async_trait]
impl Retriever for LocalIndexRetriever {
    async fn retrieve(&self, question: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        self.embedding_index.search(&self.index, question, top_k).await
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}
