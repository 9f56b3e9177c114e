//! Retrieval: the in-memory vector index and the query planner.
//!
//! [`VectorIndex`] holds one knowledge base's chunks and answers top-k
//! similarity queries with normalized cosine scores. The planner dispatches
//! queries in SINGLE or MULTI mode, merges and ranks matches, and assembles
//! the grounded context block handed to the LLM prompt.

pub mod index;
pub mod planner;
pub mod types;

pub use index::VectorIndex;
pub use types::{Chunk, ChunkId, Match, QueryMetadata, QueryResult, Reference, SourceSpan};
