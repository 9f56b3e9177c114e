//! Types shared across the retrieval path.

use crate::error::RagError;

/// Identifier of a chunk, unique within its knowledge base.
///
/// Assigned sequentially at ingestion time, so it doubles as the chunk's
/// position in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkId(u32);

impl ChunkId {
    /// Creates a ChunkId from a raw value.
    pub fn from_u32(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw value of this ID.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

/// Byte range of a chunk in its origin document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSpan {
    /// Byte offset where the chunk starts
    pub start: usize,
    /// Byte offset one past the chunk's end
    pub end: usize,
}

/// An embedded fragment of source text.
///
/// Immutable once published into a [`VectorIndex`](super::VectorIndex); the
/// embedding is stored unit-normalized.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Identifier, unique within the owning knowledge base
    pub id: ChunkId,
    /// The chunk's text content
    pub content: String,
    /// Unit-normalized embedding of the content
    pub embedding: Vec<f32>,
    /// Byte range in the origin document, when known
    pub span: Option<SourceSpan>,
}

/// One retrieved passage.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    /// The chunk's text content
    pub content: String,
    /// Normalized similarity score in `[0, 1]`
    pub score: f32,
    /// Name of the knowledge base the chunk came from
    pub kb_name: String,
}

/// Reference entry mirroring a match, in the same order as the documents.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    /// Chunk identifier within its knowledge base
    pub id: ChunkId,
    /// Normalized similarity score
    pub score: f32,
    /// Knowledge-base name
    pub kb: String,
    /// Leading excerpt of the chunk content
    pub excerpt: String,
}

/// Closed metadata record accompanying a query result.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMetadata {
    /// Number of returned matches
    pub match_count: usize,
    /// Name of the searched knowledge base (SINGLE mode)
    pub kb_single: Option<String>,
    /// Names of the searched knowledge bases (MULTI mode)
    pub kb_multi: Vec<String>,
    /// References in the same order as the documents
    pub references: Vec<Reference>,
}

/// Result of a retrieval query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Formatted context block for the LLM prompt
    pub context: String,
    /// Matches in the order used to build `context`
    pub documents: Vec<Match>,
    /// Query metadata
    pub metadata: QueryMetadata,
}

/// Validates that an embedding has the expected dimension.
///
/// Returns `Ok(())` on match, or `Err(RagError::DimensionMismatch)` otherwise.
pub fn validate_dimension(expected: usize, actual: usize) -> Result<(), RagError> {
    if actual == expected {
        Ok(())
    } else {
        Err(RagError::DimensionMismatch { expected, actual })
    }
}
