//! Error types for lorebook-core.
//!
//! This module defines error types used across the core library. Each concern
//! (chunking, embedding) has its own error enum; [`RagError`] is the facade
//! error surfaced by the engine's public contract.

use thiserror::Error;

/// Errors that can occur while splitting text into chunks.
#[derive(Debug, Clone, Error)]
pub enum ChunkingError {
    /// Invalid chunking configuration (e.g. overlap >= size)
    #[error("Invalid chunking config: {0}")]
    InvalidConfig(String),
    /// Splitting failed
    #[error("Failed to split text: {0}")]
    SplitFailed(String),
}

/// Errors that can occur during embedding operations.
///
/// The [`Transient`](EmbeddingError::Transient) variant marks failures the
/// adapter will retry (network errors, 429, 5xx); everything else is final.
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    /// Retryable provider failure (network, 429, 5xx)
    #[error("Transient embedding failure: {0}")]
    Transient(String),
    /// Per-call timeout elapsed
    #[error("Embedding request timed out")]
    Timeout,
    /// Non-retryable provider failure
    #[error("Embedding provider failure: {0}")]
    Provider(String),
    /// Provider returned a vector of unexpected dimension
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension pinned at the first successful call
        expected: usize,
        /// Dimension actually returned
        actual: usize,
    },
    /// Cancellation observed before or between attempts
    #[error("Embedding cancelled")]
    Cancelled,
}

/// Errors surfaced by the engine facade.
#[derive(Debug, Clone, Error)]
pub enum RagError {
    /// Empty query, bad mode, or invalid configuration
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Query issued while the engine is disabled
    #[error("Retrieval engine is disabled")]
    Disabled,
    /// SINGLE-mode query with no resolvable active knowledge base
    #[error("No active knowledge base")]
    NoActiveKb,
    /// MULTI-mode query with an empty registry
    #[error("No knowledge base loaded")]
    NoKbLoaded,
    /// Search completed but nothing passed the relevance threshold
    #[error("No relevant content found")]
    NoRelevantContent,
    /// `switch_kb` / `remove_kb` targeting an unknown name
    #[error("Knowledge base not found: {0}")]
    NotFound(String),
    /// `add_kb` colliding with an existing user knowledge base
    #[error("Knowledge base already exists: {0}")]
    AlreadyExists(String),
    /// Embedder returned vectors of unexpected dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected embedding dimension
        expected: usize,
        /// Actual embedding dimension received
        actual: usize,
    },
    /// Cancellation observed
    #[error("Operation cancelled")]
    Cancelled,
    /// Filesystem read/write failed
    #[error("I/O error: {0}")]
    Io(String),
    /// Embedder unavailable after retries
    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),
}

// Conversion implementations for error chaining

impl From<std::io::Error> for RagError {
    fn from(err: std::io::Error) -> Self {
        RagError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RagError {
    fn from(err: serde_json::Error) -> Self {
        RagError::Io(err.to_string())
    }
}

impl From<ChunkingError> for RagError {
    fn from(err: ChunkingError) -> Self {
        RagError::InvalidArgument(err.to_string())
    }
}

impl From<EmbeddingError> for RagError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::DimensionMismatch { expected, actual } => {
                RagError::DimensionMismatch { expected, actual }
            }
            EmbeddingError::Cancelled => RagError::Cancelled,
            other => RagError::EmbeddingFailed(other.to_string()),
        }
    }
}
