//! The service lifecycle: indexing runs and question answering.
//!
//! A [`RagOrchestrator`] starts `Uninitialized`. [`initialize`](RagOrchestrator::initialize)
//! loads the retrieval backend once and moves to `Ready` or `Degraded`; a
//! degraded orchestrator stays that way until [`reinitialize`](RagOrchestrator::reinitialize)
//! is called. Queries are only served while `Ready`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::chunking::split_documents;
use crate::config::RagConfig;
use crate::document::Answer;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::{AnswerGenerator, GenerationProvider};
use crate::index::{EmbeddingIndex, Index};
use crate::ingest::{DocumentIngester, IngestReport};
use crate::persist::IndexLock;
use crate::retriever::{LocalIndexRetriever, Retriever};

/// Answer returned when retrieval finds nothing above the similarity threshold.
pub const NO_CONTEXT_ANSWER: &str =
    "I don't know. No relevant passages were found in the indexed documents.";

/// How long a load waits before looking again for an index that is missing.
///
/// Persisting replaces an index with two renames, so a reader in another
/// process can briefly find no index at the location.
pub const INDEX_SWAP_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Where query-time context comes from.
#[derive(Clone)]
pub enum RetrievalBackend {
    /// An index built by [`RagOrchestrator::index`] and persisted at `location`.
    LocalIndex {
        /// Directory holding the persisted index.
        location: PathBuf,
    },
    /// A managed corpus provisioned outside this process. It has no local
    /// format and cannot be built by [`RagOrchestrator::index`].
    Managed(Arc<dyn Retriever>),
}

impl std::fmt::Debug for RetrievalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalIndex { location } => {
                f.debug_struct("LocalIndex").field("location", location).finish()
            }
            Self::Managed(retriever) => {
                f.debug_tuple("Managed").field(&retriever.backend()).finish()
            }
        }
    }
}

/// Observable lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OrchestratorState {
    /// No load has been attempted.
    Uninitialized,
    /// Queries are served.
    Ready,
    /// The last load failed; queries are rejected until reinitialised.
    Degraded {
        /// Why the load failed.
        detail: String,
    },
}

enum Lifecycle {
    Uninitialized,
    Ready(Arc<dyn Retriever>),
    Degraded(String),
}

impl Lifecycle {
    fn observe(&self) -> OrchestratorState {
        match self {
            Self::Uninitialized => OrchestratorState::Uninitialized,
            Self::Ready(_) => OrchestratorState::Ready,
            Self::Degraded(detail) => OrchestratorState::Degraded { detail: detail.clone() },
        }
    }
}

/// Result of an indexing run.
#[derive(Debug)]
pub enum IndexOutcome {
    /// The source directory held nothing loadable. Nothing was persisted.
    Empty {
        /// What was seen and skipped.
        report: IngestReport,
    },
    /// A new index was persisted.
    Built {
        /// What was loaded and skipped.
        report: IngestReport,
        /// Number of chunks embedded and stored.
        chunk_count: usize,
        /// Where the index was written.
        location: PathBuf,
    },
}

async fn blocking<T, F>(context: &'static str, task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| RagError::io(context, std::io::Error::other(e.to_string())))?
}

async fn load_local(embedding_index: &EmbeddingIndex, location: &Path) -> Result<Index> {
    let loader = embedding_index.clone();
    let location = location.to_path_buf();
    blocking("load index", move || loader.load(&location)).await
}

/// Owns the retrieval backend and the generator, and enforces that an index
/// exists before any question is answered.
///
/// Build one per process and share it behind an `Arc`.
pub struct RagOrchestrator {
    config: RagConfig,
    embedding_index: Option<EmbeddingIndex>,
    generator: AnswerGenerator,
    ingester: Arc<DocumentIngester>,
    backend: RetrievalBackend,
    state: RwLock<Lifecycle>,
}

impl RagOrchestrator {
    /// Create a builder.
    pub fn builder() -> RagOrchestratorBuilder {
        RagOrchestratorBuilder::default()
    }

    /// The configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// The configured retrieval backend.
    pub fn backend(&self) -> &RetrievalBackend {
        &self.backend
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> OrchestratorState {
        self.state.read().await.observe()
    }

    /// Load the retrieval backend if no load has been attempted yet.
    ///
    /// A failed load is not retried here; see [`reinitialize`](Self::reinitialize).
    pub async fn initialize(&self) -> OrchestratorState {
        let mut state = self.state.write().await;
        if matches!(*state, Lifecycle::Uninitialized) {
            *state = self.load_backend().await;
        }
        state.observe()
    }

    /// Reload the retrieval backend regardless of the current state.
    ///
    /// Picks up an index rebuilt since the last load. In-flight queries finish
    /// against the backend they started with.
    pub async fn reinitialize(&self) -> OrchestratorState {
        let loaded = self.load_backend().await;
        let mut state = self.state.write().await;
        *state = loaded;
        info!(state = ?state.observe(), "orchestrator reinitialized");
        state.observe()
    }

    async fn load_backend(&self) -> Lifecycle {
        match self.try_load_backend().await {
            Ok(retriever) => {
                info!(backend = retriever.backend(), "retrieval backend ready");
                Lifecycle::Ready(retriever)
            }
            Err(e) => {
                error!(error = %e, "failed to load retrieval backend; serving degraded");
                Lifecycle::Degraded(e.to_string())
            }
        }
    }

    async fn try_load_backend(&self) -> Result<Arc<dyn Retriever>> {
        match &self.backend {
            RetrievalBackend::Managed(retriever) => Ok(Arc::clone(retriever)),
            RetrievalBackend::LocalIndex { location } => {
                let embedding_index = self.local_embedding_index()?.clone();
                let index = match load_local(&embedding_index, location).await {
                    Err(RagError::IndexNotFound { .. }) => {
                        debug!(location = %location.display(), "index missing; looking again");
                        tokio::time::sleep(INDEX_SWAP_RETRY_DELAY).await;
                        load_local(&embedding_index, location).await?
                    }
                    loaded => loaded?,
                };
                info!(entry_count = index.len(), model = index.embedding_model(), "loaded index");
                Ok(Arc::new(LocalIndexRetriever::new(embedding_index, Arc::new(index))))
            }
        }
    }

    fn local_embedding_index(&self) -> Result<&EmbeddingIndex> {
        self.embedding_index.as_ref().ok_or_else(|| {
            RagError::Configuration("the local index backend needs an embedding provider".into())
        })
    }

    /// Ingest `source_dir`, chunk, embed and persist a fresh index.
    ///
    /// Runs under the advisory lock for the index location. The serving state
    /// of this orchestrator is not touched.
    ///
    /// # Errors
    ///
    /// - [`RagError::Configuration`] for a managed backend
    /// - [`RagError::IndexBusy`] if another run holds the lock
    /// - any ingest, embedding or persistence failure; nothing valid is left
    ///   behind by a failed run
    pub async fn index(&self, source_dir: &Path) -> Result<IndexOutcome> {
        let location = match &self.backend {
            RetrievalBackend::LocalIndex { location } => location.clone(),
            RetrievalBackend::Managed(retriever) => {
                return Err(RagError::Configuration(format!(
                    "the '{}' backend is provisioned externally and cannot be built locally",
                    retriever.backend()
                )));
            }
        };
        let embedding_index = self.local_embedding_index()?.clone();

        let _lock = IndexLock::acquire(&location)?;
        info!(source = %source_dir.display(), location = %location.display(), "indexing started");

        let ingester = Arc::clone(&self.ingester);
        let source = source_dir.to_path_buf();
        let report = blocking("ingest documents", move || ingester.ingest(&source)).await?;

        if report.is_empty() {
            warn!(
                source = %source_dir.display(),
                files_seen = report.files_seen,
                "no documents to index; nothing persisted"
            );
            return Ok(IndexOutcome::Empty { report });
        }

        let chunks =
            split_documents(&report.documents, self.config.chunk_size, self.config.chunk_overlap)?;
        let chunk_count = chunks.len();
        info!(document_count = report.documents.len(), chunk_count, "split documents");

        let index = embedding_index.build(chunks).await?;

        let target = location.clone();
        blocking("persist index", move || embedding_index.persist(&index, &target)).await?;

        info!(chunk_count, location = %location.display(), "indexing finished");
        Ok(IndexOutcome::Built { report, chunk_count, location })
    }

    /// Answer `question` from retrieved context.
    ///
    /// # Errors
    ///
    /// [`RagError::NotReady`] unless the orchestrator is `Ready`; otherwise the
    /// retrieval or generation failure.
    pub async fn query(&self, question: &str) -> Result<Answer> {
        let retriever = match &*self.state.read().await {
            Lifecycle::Ready(retriever) => Arc::clone(retriever),
            Lifecycle::Uninitialized => {
                return Err(RagError::NotReady {
                    reason: "RAG components not initialized. Please run indexing first.".into(),
                });
            }
            Lifecycle::Degraded(detail) => {
                return Err(RagError::NotReady { reason: detail.clone() });
            }
        };

        let mut context = retriever.retrieve(question, self.config.top_k).await?;
        if let Some(threshold) = self.config.similarity_threshold {
            context.retain(|r| r.score >= threshold);
        }

        if context.is_empty() {
            info!(backend = retriever.backend(), "no context above threshold");
            return Ok(Answer { text: NO_CONTEXT_ANSWER.to_string(), context });
        }

        let answer = self.generator.generate(question, context).await?;
        info!(
            backend = retriever.backend(),
            context_chunks = answer.context.len(),
            "question answered"
        );
        Ok(answer)
    }
}

/// Builder for a [`RagOrchestrator`].
///
/// The generation provider and backend are required; the embedding provider
/// is required for the local index backend.
#[derive(Default)]
pub struct RagOrchestratorBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    generation_provider: Option<Arc<dyn GenerationProvider>>,
    ingester: Option<DocumentIngester>,
    backend: Option<RetrievalBackend>,
}

impl RagOrchestratorBuilder {
    /// Set the configuration. Defaults to [`RagConfig::default`].
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the generation provider.
    pub fn generation_provider(mut self, provider: Arc<dyn GenerationProvider>) -> Self {
        self.generation_provider = Some(provider);
        self
    }

    /// Replace the default PDF and text ingester.
    pub fn ingester(mut self, ingester: DocumentIngester) -> Self {
        self.ingester = Some(ingester);
        self
    }

    /// Set the retrieval backend.
    pub fn backend(mut self, backend: RetrievalBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// [`RagError::Configuration`] if a required component is missing.
    pub fn build(self) -> Result<RagOrchestrator> {
        let config = self.config.unwrap_or_default();
        let generation_provider = self.generation_provider.ok_or_else(|| {
            RagError::Configuration("generation_provider is required".to_string())
        })?;
        let backend = self
            .backend
            .ok_or_else(|| RagError::Configuration("backend is required".to_string()))?;
        let local = matches!(backend, RetrievalBackend::LocalIndex { .. });
        if local && self.embedding_provider.is_none() {
            return Err(RagError::Configuration(
                "embedding_provider is required for the local index backend".to_string(),
            ));
        }

        Ok(RagOrchestrator {
            embedding_index: self.embedding_provider.map(|p| EmbeddingIndex::new(p, &config)),
            generator: AnswerGenerator::new(generation_provider, config.provider_timeout),
            ingester: Arc::new(self.ingester.unwrap_or_default()),
            backend,
            state: RwLock::new(Lifecycle::Uninitialized),
            config,
        })
    }
}
