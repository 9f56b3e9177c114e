//! Types for text chunking.

/// A chunk of text with its position in the source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Index of this chunk in the document (0-based)
    pub index: usize,
    /// The text content of this chunk
    pub text: String,
    /// Byte offset where this chunk starts in the original document
    pub start: usize,
    /// Byte offset one past the end of this chunk in the original document
    pub end: usize,
}
