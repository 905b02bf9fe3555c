//! Local-first synchronization for QuizSync
//!
//! Keeps the user's whole document on the device while signed out and in a
//! remote gateway while signed in. Divergence between the two is detected by
//! checksum and handed to the user to resolve; nothing is merged silently.

pub mod config;
pub mod conflict;
pub mod gateway;
pub mod metadata;
pub mod retry;
pub mod synchronizer;

pub use config::SyncConfig;
pub use conflict::{compare, Comparison, ConflictCandidate, ConflictSummary, Resolution};
pub use gateway::filesystem::FileGateway;
pub use gateway::{
    AuthState, Credentials, GatewayEvent, InjectedFailure, MemoryGateway, RemoteGateway,
    SyncEnvelope, UserIdentity,
};
pub use metadata::{LocalMirror, Preferences};
pub use retry::{retry_with_policy, RetryPolicy};
pub use synchronizer::{SyncEvent, SyncState, SyncStatus, Synchronizer};

use quizsync_core::{Error, KeyValueStore, MemoryKvStore, Result};
use std::sync::Arc;
use std::time::Duration;

/// Builder for a synchronizer
pub struct SynchronizerBuilder {
    gateway: Option<Arc<dyn RemoteGateway>>,
    store: Option<Arc<dyn KeyValueStore>>,
    config: SyncConfig,
}

impl SynchronizerBuilder {
    pub fn new() -> Self {
        Self {
            gateway: None,
            store: None,
            config: SyncConfig::default(),
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn RemoteGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// On-device store; defaults to an in-memory one.
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.config.debounce = debounce;
        self
    }

    pub fn with_download_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.download_retry = policy;
        self
    }

    pub fn with_logout_settle(mut self, settle: Duration) -> Self {
        self.config.logout_settle = settle;
        self
    }

    pub fn build(self) -> Result<Synchronizer> {
        let gateway = self
            .gateway
            .ok_or_else(|| Error::Validation("remote gateway is required".to_string()))?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryKvStore::new()));

        Synchronizer::new(gateway, store, self.config)
    }
}

impl Default for SynchronizerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_gateway() {
        let err = SynchronizerBuilder::new().build().err().unwrap();
        assert_eq!(err.code(), "VALIDATION_FAILED");
    }

    #[test]
    fn test_builder_rejects_bad_config() {
        let result = SynchronizerBuilder::new()
            .with_gateway(Arc::new(MemoryGateway::new()))
            .with_debounce(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_defaults() {
        let sync = SynchronizerBuilder::new()
            .with_gateway(Arc::new(MemoryGateway::new()))
            .build()
            .unwrap();
        assert_eq!(sync.state(), SyncState::Idle);
        assert!(!sync.has_conflict());
    }
}
