//! # finrag-rag
//!
//! Retrieval-augmented question answering over financial documents.
//!
//! ## Overview
//!
//! The pipeline has four parts:
//!
//! - [`DocumentIngester`] loads PDFs (one [`Document`] per page) and text files
//!   from a source directory; [`split_documents`] cuts them into overlapping chunks
//! - [`EmbeddingIndex`] embeds chunks, persists the [`Index`] and searches it
//! - [`AnswerGenerator`] turns a question plus retrieved chunks into an [`Answer`]
//! - [`RagOrchestrator`] runs indexing and answers questions once an index is loaded
//!
//! Embedding and generation are pluggable through [`EmbeddingProvider`] and
//! [`GenerationProvider`]. Vertex AI and OpenAI implementations live behind the
//! `vertex` and `openai` features; [`mock`] has deterministic offline ones.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use finrag_rag::mock::{MockEmbeddingProvider, MockGenerationProvider};
//! use finrag_rag::{RagConfig, RagOrchestrator, RetrievalBackend};
//!
//! let orchestrator = RagOrchestrator::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(MockEmbeddingProvider::new(64)))
//!     .generation_provider(Arc::new(MockGenerationProvider::answering("42")))
//!     .backend(RetrievalBackend::LocalIndex { location: "index".into() })
//!     .build()?;
//!
//! orchestrator.index("data".as_ref()).await?;
//! orchestrator.initialize().await;
//! let answer = orchestrator.query("What was operating income in Q3?").await?;
//! ```

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod mock;
pub mod orchestrator;
pub mod persist;
pub mod provider;
pub mod retriever;

#[cfg(feature = "openai")]
pub mod openai;
#[cfg(feature = "vertex")]
pub mod vertex;

pub use chunking::{Chunker, FixedSizeChunker, split_documents};
pub use config::{RagConfig, RagConfigBuilder};
pub use document::{Answer, Chunk, Document, SearchResult};
pub use embedding::EmbeddingProvider;
pub use error::{ProviderError, ProviderResult, RagError, Result};
pub use generation::{AnswerGenerator, GenerationProvider, PROMPT_TEMPLATE};
pub use index::{EmbeddingIndex, Index, IndexManifest};
pub use ingest::{DocumentIngester, DocumentLoader, IngestReport, PdfLoader, TextLoader};
pub use orchestrator::{
    IndexOutcome, NO_CONTEXT_ANSWER, OrchestratorState, RagOrchestrator, RagOrchestratorBuilder,
    RetrievalBackend,
};
pub use persist::{IndexLock, load_index, persist_index};
pub use retriever::{LocalIndexRetriever, Retriever};
