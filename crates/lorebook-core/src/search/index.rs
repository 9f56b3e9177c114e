//! In-memory vector index for one knowledge base.

use super::types::{validate_dimension, Chunk, ChunkId, SourceSpan};
use crate::embedding::l2_normalize;
use crate::error::RagError;

/// Ordered, append-only store of embedded chunks.
///
/// The index is filled during ingestion and immutable after publication into
/// the registry, so concurrent readers need no synchronization.
///
/// # Score convention
///
/// Embeddings are stored unit-normalized and queries are normalized the same
/// way, making the dot product equal the cosine. Scores are reported as
/// `(1 + cos θ) / 2`, i.e. normalized into `[0, 1]`, so they are directly
/// comparable to the configured relevance threshold.
///
/// Search is a single linear pass over the chunk list. That is deliberate:
/// the corpora this engine targets stay in the tens of thousands of chunks,
/// where a scan outperforms the constant factors of graph-based indexes.
#[derive(Debug, Default)]
pub struct VectorIndex {
    /// Embedding dimension; pinned by the first inserted chunk.
    dimension: Option<usize>,
    chunks: Vec<Chunk>,
}

impl VectorIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk, assigning the next sequential id.
    ///
    /// The embedding is unit-normalized before storage.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DimensionMismatch`] if the embedding's dimension
    /// differs from the dimension pinned by the first inserted chunk.
    pub fn push(
        &mut self,
        content: String,
        mut embedding: Vec<f32>,
        span: Option<SourceSpan>,
    ) -> Result<ChunkId, RagError> {
        match self.dimension {
            Some(dimension) => validate_dimension(dimension, embedding.len())?,
            None => self.dimension = Some(embedding.len()),
        }

        l2_normalize(&mut embedding);

        let id = ChunkId::from_u32(self.chunks.len() as u32);
        self.chunks.push(Chunk {
            id,
            content,
            embedding,
            span,
        });
        Ok(id)
    }

    /// Finds the `k` most similar chunks to `query`.
    ///
    /// The query must be unit-normalized by the caller (the embedder adapter
    /// guarantees this).
    ///
    /// # Returns
    ///
    /// `(chunk_id, score)` pairs sorted by descending score; equal scores
    /// break toward the smaller chunk id. `k` is clamped to the chunk count,
    /// and an empty index yields an empty result rather than an error.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DimensionMismatch`] if the query dimension differs
    /// from the index dimension.
    pub fn top_k(&self, query: &[f32], k: usize) -> Result<Vec<(ChunkId, f32)>, RagError> {
        if self.chunks.is_empty() || k == 0 {
            return Ok(vec![]);
        }
        if let Some(dimension) = self.dimension {
            validate_dimension(dimension, query.len())?;
        }

        let mut scored: Vec<(ChunkId, f32)> = self
            .chunks
            .iter()
            .map(|chunk| {
                let dot: f32 = chunk
                    .embedding
                    .iter()
                    .zip(query.iter())
                    .map(|(&a, &b)| a * b)
                    .sum();
                let score = ((1.0 + dot) / 2.0).clamp(0.0, 1.0);
                (chunk.id, score)
            })
            .collect();

        scored.sort_unstable_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k.min(self.chunks.len()));
        Ok(scored)
    }

    /// Looks up a chunk by id.
    pub fn get(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(id.as_u32() as usize)
    }

    /// Returns the number of stored chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns true when no chunks are stored.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Returns the embedding dimension, once the first chunk pinned it.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Iterates over the stored chunks in insertion order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }
}
