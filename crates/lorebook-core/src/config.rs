//! Engine configuration.
//!
//! Defaults follow the documented configuration surface and are exposed as
//! named constants so tests and collaborators reference one source of truth.

use crate::error::RagError;
use std::path::PathBuf;
use std::time::Duration;

/// Maximum characters per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Overlap between consecutive chunks, in characters. Must stay below
/// [`DEFAULT_CHUNK_SIZE`].
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// k for top-k search and the upper bound on returned documents.
pub const DEFAULT_MAX_RETRIEVED_DOCS: usize = 5;

/// Minimum normalized similarity a match must reach to be returned.
///
/// Compared against `(1 + cos θ) / 2` scores, so the range is `[0, 1]`.
pub const DEFAULT_MIN_RELEVANCE_SCORE: f32 = 0.7;

/// Embedder retries on transient failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Initial embedder retry back-off; doubled on each attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(5_000);

/// Per-call embedder timeout.
pub const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Maximum texts per embedder request.
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 512;

/// Default system knowledge-base directory, relative to the working directory.
pub const DEFAULT_KB_DIR: &str = "docs";

/// Default engine state file, relative to the working directory.
pub const DEFAULT_STATE_PATH: &str = "rag-state.json";

/// Configuration for the retrieval engine.
///
/// Construct with [`RagConfig::default`] and override fields as needed.
/// [`RagConfig::validate`] is called by the engine constructor and rejects
/// inconsistent values with [`RagError::InvalidArgument`].
#[derive(Debug, Clone)]
pub struct RagConfig {
    /// Max characters per chunk
    pub chunk_size: usize,
    /// Overlap between consecutive chunks; must be `< chunk_size`
    pub chunk_overlap: usize,
    /// k for top-k, and upper bound on result length
    pub max_retrieved_docs: usize,
    /// Matches scoring strictly below this are dropped; range `[0, 1]`
    pub min_relevance_score: f32,
    /// Embedder transient-failure retries
    pub max_retries: u32,
    /// Initial retry back-off, doubled each attempt
    pub retry_delay: Duration,
    /// Per-call embedder timeout
    pub embed_timeout: Duration,
    /// Maximum texts per embedder request
    pub embed_batch_size: usize,
    /// Directory scanned for system knowledge bases (`.txt` files)
    pub kb_dir: PathBuf,
    /// Path of the persisted engine state file
    pub state_path: PathBuf,
    /// Whether `remove_kb` may clear a system-origin entry
    pub allow_system_remove: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            max_retrieved_docs: DEFAULT_MAX_RETRIEVED_DOCS,
            min_relevance_score: DEFAULT_MIN_RELEVANCE_SCORE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            embed_timeout: DEFAULT_EMBED_TIMEOUT,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            kb_dir: PathBuf::from(DEFAULT_KB_DIR),
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            allow_system_remove: true,
        }
    }
}

impl RagConfig {
    /// Checks the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] when `chunk_overlap >= chunk_size`,
    /// `chunk_size` is zero, the relevance threshold leaves `[0, 1]`,
    /// `max_retrieved_docs` is zero, or `embed_batch_size` is zero.
    pub fn validate(&self) -> Result<(), RagError> {
        if self.chunk_size == 0 {
            return Err(RagError::InvalidArgument(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::InvalidArgument(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if !(0.0..=1.0).contains(&self.min_relevance_score) {
            return Err(RagError::InvalidArgument(format!(
                "min_relevance_score ({}) must be within [0, 1]",
                self.min_relevance_score
            )));
        }
        if self.max_retrieved_docs == 0 {
            return Err(RagError::InvalidArgument(
                "max_retrieved_docs must be greater than 0".to_string(),
            ));
        }
        if self.embed_batch_size == 0 {
            return Err(RagError::InvalidArgument(
                "embed_batch_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
