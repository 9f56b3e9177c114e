//! Adapter wrapping the external embedding provider with engine policy.

use super::{l2_normalize, Embedder};
use crate::config::RagConfig;
use crate::error::EmbeddingError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Policy layer between the engine and the embedding provider.
///
/// Responsibilities:
/// - splits work into requests of at most `embed_batch_size` texts, with one
///   request in flight at a time
/// - applies a per-call timeout
/// - retries transient failures up to `max_retries` times with exponential
///   back-off, honoring the cancellation token between attempts
/// - unit-normalizes every returned vector
/// - pins the embedding dimension at the first successful call and rejects
///   later deviations with [`EmbeddingError::DimensionMismatch`]
pub struct EmbedderAdapter {
    provider: Arc<dyn Embedder>,
    batch_size: usize,
    max_retries: u32,
    retry_delay: Duration,
    timeout: Duration,
    /// Pinned embedding dimension; 0 means not yet pinned.
    dimension: AtomicUsize,
}

impl EmbedderAdapter {
    /// Creates an adapter around `provider` using the engine configuration.
    pub fn new(provider: Arc<dyn Embedder>, config: &RagConfig) -> Self {
        Self {
            provider,
            batch_size: config.embed_batch_size,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            timeout: config.embed_timeout,
            dimension: AtomicUsize::new(0),
        }
    }

    /// Returns the pinned embedding dimension, if any call has succeeded yet.
    pub fn dimension(&self) -> Option<usize> {
        match self.dimension.load(Ordering::Acquire) {
            0 => None,
            d => Some(d),
        }
    }

    /// Embeds `texts`, preserving order.
    ///
    /// Requests are issued sequentially in sub-batches of at most the
    /// configured batch size.
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError::Cancelled`] when the token fires,
    /// [`EmbeddingError::DimensionMismatch`] when the provider deviates from
    /// the pinned dimension, and the final provider error when retries are
    /// exhausted.
    pub async fn embed_batch(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut output = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self.embed_with_retry(batch, cancel).await?;
            for mut vector in vectors {
                self.pin_dimension(vector.len())?;
                l2_normalize(&mut vector);
                output.push(vector);
            }
        }
        Ok(output)
    }

    /// Embeds a single text.
    pub async fn embed_one(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let batch = [text.to_string()];
        let mut vectors = self.embed_batch(&batch, cancel).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Provider("provider returned no vector".to_string()))
    }

    /// Issues one provider request with timeout, retrying transient failures.
    async fn embed_with_retry(
        &self,
        batch: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut delay = self.retry_delay;
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(EmbeddingError::Cancelled);
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(EmbeddingError::Cancelled),
                outcome = tokio::time::timeout(self.timeout, self.provider.embed(batch)) => {
                    match outcome {
                        Ok(inner) => inner,
                        Err(_) => Err(EmbeddingError::Timeout),
                    }
                }
            };

            match result {
                Ok(vectors) => {
                    if vectors.len() != batch.len() {
                        return Err(EmbeddingError::Provider(format!(
                            "provider returned {} vectors for {} inputs",
                            vectors.len(),
                            batch.len()
                        )));
                    }
                    debug!(batch_len = batch.len(), attempt, "embedded batch");
                    return Ok(vectors);
                }
                Err(err @ (EmbeddingError::Transient(_) | EmbeddingError::Timeout))
                    if attempt < self.max_retries =>
                {
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient embedding failure, backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(EmbeddingError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay *= 2;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Pins the dimension on first success and validates it afterwards.
    fn pin_dimension(&self, actual: usize) -> Result<(), EmbeddingError> {
        if actual == 0 {
            return Err(EmbeddingError::Provider(
                "provider returned an empty embedding".to_string(),
            ));
        }
        match self
            .dimension
            .compare_exchange(0, actual, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(pinned) if pinned == actual => Ok(()),
            Err(pinned) => Err(EmbeddingError::DimensionMismatch {
                expected: pinned,
                actual,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    /// Provider double that returns queued responses in order.
    struct ScriptedProvider {
        responses: Mutex<Vec<Result<Vec<Vec<f32>>, EmbeddingError>>>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<Result<Vec<Vec<f32>>, EmbeddingError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: AtomicU32::new(0),
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Embedder for ScriptedProvider {
        async fn embed(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                // Fallback: one constant vector per input.
                return Ok(batch.iter().map(|_| vec![1.0, 0.0, 0.0]).collect());
            }
            responses.remove(0)
        }
    }

    fn fast_config() -> RagConfig {
        RagConfig {
            retry_delay: Duration::from_millis(1),
            embed_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_embed_batch_normalizes_and_pins_dimension() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(vec![
            vec![3.0, 4.0, 0.0],
            vec![0.0, 5.0, 0.0],
        ])]));
        let adapter = EmbedderAdapter::new(provider, &fast_config());

        let texts = vec!["a".to_string(), "b".to_string()];
        let vectors = adapter
            .embed_batch(&texts, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(vectors.len(), 2);
        for vector in &vectors {
            let magnitude = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((magnitude - 1.0).abs() < 1e-6);
        }
        assert_eq!(adapter.dimension(), Some(3));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(vec![vec![1.0, 0.0, 0.0]]),
            Ok(vec![vec![1.0, 0.0]]),
        ]));
        let adapter = EmbedderAdapter::new(provider, &fast_config());
        let cancel = CancellationToken::new();

        adapter
            .embed_batch(&["a".to_string()], &cancel)
            .await
            .unwrap();

        let result = adapter.embed_batch(&["b".to_string()], &cancel).await;
        assert!(matches!(
            result,
            Err(EmbeddingError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(EmbeddingError::Transient("503".to_string())),
            Err(EmbeddingError::Transient("503".to_string())),
            Ok(vec![vec![0.0, 1.0]]),
        ]));
        let adapter = EmbedderAdapter::new(Arc::clone(&provider) as Arc<dyn Embedder>, &fast_config());

        let vectors = adapter
            .embed_batch(&["a".to_string()], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(vectors.len(), 1);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted_surfaces_error() {
        let responses = (0..8)
            .map(|_| Err(EmbeddingError::Transient("502".to_string())))
            .collect();
        let provider = Arc::new(ScriptedProvider::new(responses));
        let config = fast_config();
        let adapter = EmbedderAdapter::new(Arc::clone(&provider) as Arc<dyn Embedder>, &config);

        let result = adapter
            .embed_batch(&["a".to_string()], &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(EmbeddingError::Transient(_))));
        // Initial attempt + max_retries.
        assert_eq!(provider.call_count(), 1 + config.max_retries);
    }

    #[tokio::test]
    async fn test_non_transient_failure_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(EmbeddingError::Provider(
            "bad request".to_string(),
        ))]));
        let adapter = EmbedderAdapter::new(Arc::clone(&provider) as Arc<dyn Embedder>, &fast_config());

        let result = adapter
            .embed_batch(&["a".to_string()], &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(EmbeddingError::Provider(_))));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let adapter = EmbedderAdapter::new(Arc::clone(&provider) as Arc<dyn Embedder>, &fast_config());

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = adapter.embed_batch(&["a".to_string()], &cancel).await;
        assert!(matches!(result, Err(EmbeddingError::Cancelled)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_sub_batching_preserves_order() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(vec![vec![1.0, 0.0], vec![0.0, 1.0]]),
            Ok(vec![vec![1.0, 1.0]]),
        ]));
        let config = RagConfig {
            embed_batch_size: 2,
            ..fast_config()
        };
        let adapter = EmbedderAdapter::new(Arc::clone(&provider) as Arc<dyn Embedder>, &config);

        let texts: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let vectors = adapter
            .embed_batch(&texts, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(vectors.len(), 3);
        assert_eq!(provider.call_count(), 2);
        // First vector was [1, 0]; still first after normalization.
        assert!((vectors[0][0] - 1.0).abs() < 1e-6);
    }
}
