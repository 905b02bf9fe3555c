use std::time::Duration;

use crate::retry::RetryPolicy;

/// Timing knobs for the synchronizer
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Quiet period after the last local edit before an upload fires
    pub debounce: Duration,

    /// Retry policy for the initial download
    pub download_retry: RetryPolicy,

    /// How long sign-out keeps the guard up after the remote call returns
    pub logout_settle: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1500),
            download_retry: RetryPolicy::default(),
            logout_settle: Duration::from_millis(300),
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_download_retry(mut self, policy: RetryPolicy) -> Self {
        self.download_retry = policy;
        self
    }

    pub fn with_logout_settle(mut self, settle: Duration) -> Self {
        self.logout_settle = settle;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.debounce.is_zero() {
            return Err("debounce must be greater than 0".to_string());
        }

        if self.download_retry.backoff_multiplier < 1.0 {
            return Err("download_retry.backoff_multiplier must be at least 1.0".to_string());
        }

        if self.download_retry.initial_backoff_ms > self.download_retry.max_backoff_ms {
            return Err("download_retry.initial_backoff_ms exceeds max_backoff_ms".to_string());
        }

        Ok(())
    }
}
