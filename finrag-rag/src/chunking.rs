//! Document chunking.
//!
//! Chunk length is measured in Unicode scalar values (`char`s), never bytes, so
//! a chunk boundary can not split a multi-byte character.

use crate::document::{CHUNK_INDEX_KEY, Chunk, Document};
use crate::error::{RagError, Result};

/// A strategy for splitting documents into chunks.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document has empty text.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// Splits text into fixed-size windows of characters with a fixed overlap.
///
/// Every chunk holds at most `chunk_size` characters and consecutive chunks of
/// the same document share exactly `chunk_overlap` characters. Chunk IDs are
/// `{document_id}_{chunk_index}`; each chunk inherits the parent document's
/// metadata plus a `chunk_index` field.
///
/// # Example
///
/// ```rust,ignore
/// use finrag_rag::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(1000, 200)?;
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] unless `chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_overlap >= chunk_size {
            return Err(RagError::Configuration(format!(
                "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self { chunk_size, chunk_overlap })
    }

    /// Maximum chunk length in characters.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Characters shared by consecutive chunks.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let text = &document.text;
        if text.is_empty() {
            return Vec::new();
        }

        // Byte offset of every char boundary, including the end of the text.
        let bounds: Vec<usize> =
            text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();
        let char_count = bounds.len() - 1;
        let step = self.chunk_size - self.chunk_overlap;

        let mut chunks = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.chunk_size).min(char_count);
            let chunk_index = chunks.len();

            let mut metadata = document.metadata.clone();
            metadata.insert(CHUNK_INDEX_KEY.to_string(), chunk_index.to_string());

            chunks.push(Chunk {
                id: format!("{}_{chunk_index}", document.id),
                text: text[bounds[start]..bounds[end]].to_string(),
                metadata,
                document_id: document.id.clone(),
            });

            if end == char_count {
                break;
            }
            start += step;
        }

        chunks
    }
}

/// Split every document in order, concatenating the chunk sequences.
///
/// # Errors
///
/// Returns [`RagError::Configuration`] unless `overlap_length < max_chunk_length`.
pub fn split_documents(
    documents: &[Document],
    max_chunk_length: usize,
    overlap_length: usize,
) -> Result<Vec<Chunk>> {
    let chunker = FixedSizeChunker::new(max_chunk_length, overlap_length)?;
    Ok(documents.iter().flat_map(|document| chunker.chunk(document)).collect())
}
