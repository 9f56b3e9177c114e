//! The embedder capability consumed by the engine.

use crate::error::EmbeddingError;
use async_trait::async_trait;

/// Trait for the external embedding provider.
///
/// Implementations turn a batch of texts into fixed-dimension vectors,
/// preserving input order. All vectors returned over the provider's lifetime
/// must share one dimension; the adapter pins it at the first successful call
/// and rejects later deviations.
///
/// # Transient failures
///
/// Implementations should classify retryable conditions (network errors,
/// HTTP 429, 5xx) as [`EmbeddingError::Transient`] so the adapter's retry
/// policy applies; any other error is treated as final.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the engine shares one provider
/// across concurrent ingestions and queries through an `Arc`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds a batch of texts, returning one vector per input in order.
    async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}
