use quizsync_core::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Configuration for retry behavior with exponential backoff.
///
/// Downloads use a single fixed-delay retry (`multiplier == 1.0`); the
/// general shape stays so callers can tune it.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_attempts: u32,

    /// Initial backoff duration in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    pub max_backoff_ms: u64,

    /// Multiplier applied to backoff after each retry
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_backoff_ms: u64,
        max_backoff_ms: u64,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms,
            max_backoff_ms,
            backoff_multiplier,
        }
    }

    /// Returns a policy with no retries.
    pub fn no_retry() -> Self {
        Self::new(0, 0, 0, 1.0)
    }

    /// `attempts` retries, each after the same delay.
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self::new(attempts, ms, ms, 1.0)
    }

    /// Calculates the backoff duration for a given attempt number (0-indexed).
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let backoff_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powi(attempt as i32))
            .min(self.max_backoff_ms as f64) as u64;
        Duration::from_millis(backoff_ms)
    }
}

impl Default for RetryPolicy {
    /// One retry after two seconds.
    fn default() -> Self {
        Self::fixed(1, Duration::from_millis(2000))
    }
}

/// Retries an async operation according to the policy.
///
/// Only errors with `Error::is_retryable()` are retried. The token is checked
/// after every suspension point; once cancelled the call returns
/// `Error::Cancelled` and the operation's result is discarded.
pub async fn retry_with_policy<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let outcome = operation().await;
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() || attempt >= policy.max_attempts => return Err(e),
            Err(e) => {
                let backoff = policy.backoff_duration(attempt);
                tracing::warn!(
                    error = %e,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    "retryable failure, backing off"
                );
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = token.cancelled() => return Err(Error::Cancelled),
                }
                attempt += 1;
            }
        }
    }
}
