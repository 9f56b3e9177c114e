//! # Lorebook Core
//!
//! Knowledge-base retrieval engine for a conversational assistant. Given a
//! natural-language query, it finds the most semantically relevant passages
//! across one or more knowledge bases, returns them ranked with calibrated
//! relevance scores, and assembles a grounded context block for prompting a
//! downstream LLM.
//!
//! ## Modules
//!
//! - [`engine`] - The [`RagEngine`](engine::RagEngine) facade: KB lifecycle,
//!   engine state, and the query entry point
//! - [`search`] - In-memory vector index and the retrieval planner
//! - [`kb`] - Knowledge-base entries, two-tier registry, ingestion, and the
//!   system directory loader
//! - [`chunking`] - Text splitting behind the `Splitter` seam
//! - [`embedding`] - The consumed `Embedder` capability and its policy
//!   adapter (batching, retries, timeouts, normalization)
//! - [`events`] - Typed lifecycle event bus
//! - [`state`] - Durable engine state with atomic load/save
//! - [`config`] - Configuration surface and defaults
//! - [`error`] - Error types
//!
//! ## Example
//!
//! ```ignore
//! use lorebook_core::config::RagConfig;
//! use lorebook_core::engine::RagEngine;
//! use std::sync::Arc;
//!
//! let engine = RagEngine::new(RagConfig::default(), Arc::new(provider)).await?;
//! engine.add_kb("/data/agent-article.txt").await?;
//!
//! let result = engine.query("What is an agent?").await?;
//! println!("{}", result.context);
//! ```

pub mod chunking;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod events;
pub mod kb;
pub mod search;
pub mod state;
