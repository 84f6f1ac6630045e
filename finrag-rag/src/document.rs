//! Data types for documents, chunks, search results and answers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Metadata key holding the path of the file a document was loaded from.
pub const SOURCE_KEY: &str = "source";
/// Metadata key holding the 1-based page number of a PDF page.
pub const PAGE_KEY: &str = "page";
/// Metadata key holding the position of a chunk within its document.
pub const CHUNK_INDEX_KEY: &str = "chunk_index";

/// A unit of source text with metadata, such as one page of a PDF.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique identifier for the document.
    pub id: String,
    /// The text content of the document.
    pub text: String,
    /// Key-value metadata (source path, page number).
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    /// The source path recorded in the metadata, if any.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).map(String::as_str)
    }

    /// The page number recorded in the metadata, if any.
    pub fn page(&self) -> Option<u32> {
        self.metadata.get(PAGE_KEY).and_then(|p| p.parse().ok())
    }
}

/// A bounded slice of a [`Document`]'s text, the unit of embedding and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier for the chunk.
    pub id: String,
    /// The text content of the chunk.
    pub text: String,
    /// Metadata inherited from the parent document plus `chunk_index`.
    pub metadata: BTreeMap<String, String>,
    /// The ID of the parent [`Document`], kept for citations.
    pub document_id: String,
}

impl Chunk {
    /// The source path of the originating document, if known.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).map(String::as_str)
    }

    /// The page of the originating document, if known.
    pub fn page(&self) -> Option<u32> {
        self.metadata.get(PAGE_KEY).and_then(|p| p.parse().ok())
    }
}

/// A retrieved [`Chunk`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// The similarity score (higher is more relevant).
    pub score: f32,
}

/// A generated answer together with the context it was conditioned on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    /// The generated text.
    pub text: String,
    /// The retrieved chunks fed to the generator, in prompt order.
    pub context: Vec<SearchResult>,
}
