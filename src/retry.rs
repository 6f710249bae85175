//! Bounded exponential backoff for embedding calls.
//!
//! Providers make exactly one request per call and classify the failure.
//! [`RetryPolicy::run`] owns the loop: retryable failures (429, 5xx,
//! network, timeout) are retried with doubling delays up to a cap; fatal
//! failures stop immediately. Each attempt is bounded by the call timeout,
//! and an elapsed timeout counts as retryable.

use std::future::Future;
use std::time::Duration;

use docfence_core::EmbeddingError;

use crate::config::EmbeddingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            call_timeout: config.timeout(),
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails fatally, or attempts run out.
    ///
    /// `on_retry(attempt, delay, error)` is called before each backoff sleep.
    /// `chunk_ids` is attached to the terminal error so callers can report
    /// exactly which chunks were not embedded.
    pub async fn run<T, F, Fut, R>(
        &self,
        chunk_ids: &[String],
        mut op: F,
        mut on_retry: R,
    ) -> Result<T, EmbeddingError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EmbeddingError>>,
        R: FnMut(u32, Duration, &EmbeddingError),
    {
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.call_timeout, op()).await {
                Ok(r) => r,
                Err(_) => Err(EmbeddingError::retryable(format!(
                    "embedding call timed out after {:?}",
                    self.call_timeout
                ))),
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            match err {
                EmbeddingError::Retryable { reason } if attempt < self.max_attempts => {
                    let delay = self.delay(attempt);
                    on_retry(attempt, delay, &EmbeddingError::Retryable { reason });
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                EmbeddingError::Retryable { reason } => {
                    return Err(EmbeddingError::Exhausted {
                        attempts: attempt,
                        failed_chunks: chunk_ids.to_vec(),
                        reason,
                    })
                }
                EmbeddingError::Fatal { reason } => {
                    return Err(EmbeddingError::Aborted {
                        failed_chunks: chunk_ids.to_vec(),
                        reason,
                    })
                }
                other => return Err(other),
            }
        }
    }
}
