//! Knowledge-base ingestion.
//!
//! End-to-end pipeline for one source document: read the file, split it into
//! chunks, embed the chunks in batches, and assemble the vector index.

use super::{KbOrigin, KnowledgeBase};
use crate::chunking::Splitter;
use crate::config::RagConfig;
use crate::embedding::EmbedderAdapter;
use crate::error::RagError;
use crate::search::{SourceSpan, VectorIndex};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Ingestion pipeline shared by `add_kb` and the system loader.
///
/// Holds the splitter and embedder collaborators through `Arc`, so one
/// builder serves concurrent ingestions.
pub struct KbBuilder {
    splitter: Arc<dyn Splitter>,
    embedder: Arc<EmbedderAdapter>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl KbBuilder {
    /// Creates a builder using the engine configuration's chunking budget.
    pub fn new(
        splitter: Arc<dyn Splitter>,
        embedder: Arc<EmbedderAdapter>,
        config: &RagConfig,
    ) -> Self {
        Self {
            splitter,
            embedder,
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        }
    }

    /// Ingests the document at `path` into a new knowledge base.
    ///
    /// A document that yields zero chunks still produces a valid (empty)
    /// knowledge base.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Io`] when the file cannot be read, and propagates
    /// chunking and embedding failures.
    #[instrument(skip_all, fields(name = %name, path = %path.display()))]
    pub async fn build(
        &self,
        name: &str,
        path: &Path,
        origin: KbOrigin,
        cancel: &CancellationToken,
    ) -> Result<KnowledgeBase, RagError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| RagError::Io(format!("{}: {err}", path.display())))?;

        let chunks = self
            .splitter
            .split(&text, self.chunk_size, self.chunk_overlap)?;

        let mut index = VectorIndex::new();
        if !chunks.is_empty() {
            let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
            let embeddings = self.embedder.embed_batch(&texts, cancel).await?;

            for (chunk, embedding) in chunks.into_iter().zip(embeddings) {
                index.push(
                    chunk.text,
                    embedding,
                    Some(SourceSpan {
                        start: chunk.start,
                        end: chunk.end,
                    }),
                )?;
            }
        }

        debug!(chunks = index.len(), "ingested knowledge base");

        Ok(KnowledgeBase {
            name: name.to_string(),
            source_path: path.to_path_buf(),
            index,
            origin,
        })
    }
}
