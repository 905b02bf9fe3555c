//! Synchronizer with state machine for local-first sync
//!
//! Decides, on sign-in, local edits, explicit requests, and remote pushes,
//! whether to upload, download, or hold a conflict for the user. The whole
//! document moves at once; there is no delta sync.
//!
//! The session token is the logout guard: every async path captures it before
//! its first suspension point and re-checks it after each one, so work that
//! started before a sign-out can never write into the torn-down state.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use quizsync_core::{checksum, now_millis, Error, KeyValueStore, Result, UserData};

use crate::config::SyncConfig;
use crate::conflict::{compare, Comparison, ConflictCandidate, ConflictSummary, Resolution};
use crate::gateway::{AuthState, Credentials, GatewayEvent, RemoteGateway, SyncEnvelope, UserIdentity};
use crate::metadata::{LocalMirror, Preferences};
use crate::retry::retry_with_policy;

/// Synchronizer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// Nothing in progress
    Idle,
    /// Comparing local data against the remote checksum
    Checking,
    /// Fetching the remote snapshot
    Downloading,
    /// Writing the local snapshot to the remote
    Uploading,
    /// Waiting for the user to pick a side
    ConflictPending,
    /// Tearing down a session
    LoggingOut,
}

/// Sync events that can be observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncEvent {
    StateChanged {
        old_state: SyncState,
        new_state: SyncState,
    },
    /// Remote snapshot replaced local data during the initial sync
    Downloaded { checksum: String },
    /// Local snapshot written to the remote
    Uploaded { checksum: String },
    ConflictDetected { summary: ConflictSummary },
    ConflictResolved { resolution: Resolution },
    /// Upload failed; local data is untouched
    UploadFailed { error: String },
    /// Initial download failed; continuing with local data
    DownloadFailed { error: String },
    /// A pushed remote change replaced local data
    RemoteApplied { checksum: String },
    SignedOut,
}

/// Point-in-time view for status displays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub is_signed_in: bool,
    pub user: Option<UserIdentity>,
    pub initial_sync_done: bool,
    pub sync_in_flight: bool,
    pub sync_failed: bool,
    pub has_conflict: bool,
    pub last_sync: Option<i64>,
}

/// Holds the in-flight flag for as long as it lives.
///
/// The flag belongs to one session epoch. Sign-out installs a fresh one, so
/// a sync abandoned by the previous session cannot block the next.
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Shared {
    gateway: Arc<dyn RemoteGateway>,
    mirror: LocalMirror,
    config: SyncConfig,
    data: RwLock<UserData>,
    state: RwLock<SyncState>,
    auth: RwLock<AuthState>,
    conflict: RwLock<Option<ConflictCandidate>>,
    /// Logout guard; replaced with a fresh token once sign-out settles
    session: RwLock<CancellationToken>,
    logging_out: AtomicBool,
    /// "Previously authenticated" flag as read at start
    previous_session: AtomicBool,
    /// Local data not loaded yet because a remote session was expected
    awaiting_remote: AtomicBool,
    initial_sync_done: AtomicBool,
    /// Per-session in-flight flag, replaced together with `session`
    sync_in_flight: RwLock<Arc<AtomicBool>>,
    sync_failed: AtomicBool,
    last_sync: RwLock<Option<i64>>,
    last_uploaded_checksum: RwLock<Option<String>>,
    pending_upload: Mutex<Option<JoinHandle<()>>>,
    event_tx: mpsc::UnboundedSender<SyncEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<SyncEvent>>>,
}

/// Local-first synchronizer. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Synchronizer {
    inner: Arc<Shared>,
}

impl Synchronizer {
    /// Create a synchronizer over a gateway and an on-device store.
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        store: Arc<dyn KeyValueStore>,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate().map_err(Error::Validation)?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Self {
            inner: Arc::new(Shared {
                gateway,
                mirror: LocalMirror::new(store),
                config,
                data: RwLock::new(UserData::default()),
                state: RwLock::new(SyncState::Idle),
                auth: RwLock::new(AuthState::signed_out()),
                conflict: RwLock::new(None),
                session: RwLock::new(CancellationToken::new()),
                logging_out: AtomicBool::new(false),
                previous_session: AtomicBool::new(false),
                awaiting_remote: AtomicBool::new(false),
                initial_sync_done: AtomicBool::new(false),
                sync_in_flight: RwLock::new(Arc::new(AtomicBool::new(false))),
                sync_failed: AtomicBool::new(false),
                last_sync: RwLock::new(None),
                last_uploaded_checksum: RwLock::new(None),
                pending_upload: Mutex::new(None),
                event_tx,
                event_rx: Mutex::new(Some(event_rx)),
            }),
        })
    }

    /// Application start: load on-device data unless a remote session is
    /// expected to supply it.
    pub fn start(&self) -> Result<()> {
        let previous = self.inner.mirror.was_authenticated()?;
        self.inner.previous_session.store(previous, Ordering::SeqCst);
        *self.inner.last_sync.write() = self.inner.mirror.last_sync()?;

        if previous {
            debug!("previous session flagged, waiting for remote auth before loading data");
            self.inner.awaiting_remote.store(true, Ordering::SeqCst);
            return Ok(());
        }

        self.load_local()
    }

    /// Initialize the gateway and spawn the event loop.
    ///
    /// Returns `None` when the gateway is not configured; the synchronizer
    /// then runs local-only.
    pub async fn connect(&self) -> Result<Option<JoinHandle<()>>> {
        if !self.inner.gateway.is_configured() {
            info!("remote gateway not configured, running local-only");
            self.fallback_to_local()?;
            return Ok(None);
        }

        // Subscribe first so a session restored by `initialize` is not missed.
        let events = self.inner.gateway.subscribe();
        if let Err(e) = self.inner.gateway.initialize().await {
            warn!(error = %e, "remote gateway failed to initialize, running local-only");
            self.fallback_to_local()?;
            return Ok(None);
        }

        if !self.inner.gateway.auth_state().is_signed_in {
            self.fallback_to_local()?;
        }

        Ok(Some(self.spawn_event_loop(events)))
    }

    /// Consume gateway events in order until the channel closes.
    pub fn spawn_event_loop(&self, mut events: broadcast::Receiver<GatewayEvent>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => this.handle_gateway_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "sync event loop lagged behind gateway events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("gateway event channel closed");
                        break;
                    }
                }
            }
        })
    }

    /// Dispatch one gateway event. Ignored entirely while logging out.
    pub async fn handle_gateway_event(&self, event: GatewayEvent) {
        if self.is_logging_out() {
            debug!(?event, "ignoring gateway event during sign-out");
            return;
        }
        match event {
            GatewayEvent::AuthChanged(state) => self.handle_auth_change(state).await,
            GatewayEvent::RemoteChanged(envelope) => {
                if let Err(e) = self.apply_remote_change(envelope) {
                    warn!(error = %e, "failed to apply remote change");
                }
            }
        }
    }

    /// React to a sign-in state change reported by the gateway.
    pub async fn handle_auth_change(&self, state: AuthState) {
        if self.is_logging_out() {
            debug!("ignoring auth change during sign-out");
            return;
        }

        if state.is_signed_in {
            // A queued sign-in can outlive the session it announced.
            if !self.inner.gateway.auth_state().is_signed_in {
                debug!("ignoring stale sign-in notification");
                return;
            }
            *self.inner.auth.write() = state;
            self.inner.awaiting_remote.store(false, Ordering::SeqCst);
            self.initial_sync().await;
        } else {
            *self.inner.auth.write() = state;
            self.inner.initial_sync_done.store(false, Ordering::SeqCst);
            self.cancel_pending_upload();
            if let Err(e) = self.fallback_to_local() {
                warn!(error = %e, "failed to load local data after sign-out notification");
            }
        }
    }

    /// Run the initial sync for a freshly confirmed session.
    async fn initial_sync(&self) {
        if self.inner.initial_sync_done.load(Ordering::SeqCst) || self.has_conflict() {
            return;
        }
        let Some(_in_flight) = self.claim_sync() else {
            debug!("initial sync already running");
            return;
        };
        let token = self.session_token();

        let outcome = match self.choose_initial_path() {
            Ok(true) => self.checking_sync(&token).await,
            Ok(false) => self.download_sync(&token).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {}
            Err(Error::Cancelled) => {
                debug!("initial sync abandoned by sign-out");
            }
            Err(e) => {
                if token.is_cancelled() {
                    return;
                }
                warn!(error = %e, "initial sync failed, keeping local data");
                self.inner.initial_sync_done.store(true, Ordering::SeqCst);
                self.set_state(SyncState::Idle);
            }
        }
    }

    /// Fetch the remote envelope, retrying per the download policy.
    async fn download_remote(&self, token: &CancellationToken) -> Result<Option<SyncEnvelope>> {
        let result = retry_with_policy(&self.inner.config.download_retry, token, || {
            self.inner.gateway.download()
        })
        .await;

        match result {
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                if e.is_soft() {
                    info!(error = %e, "remote unreachable");
                } else {
                    warn!(error = %e, "download failed");
                }
                self.emit_event(SyncEvent::DownloadFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
            ok => ok,
        }
    }

    /// `true` for the checking path, `false` for the download path.
    fn choose_initial_path(&self) -> Result<bool> {
        if self.inner.previous_session.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.mirror.has_data()
    }

    /// Remote wins if present; otherwise local is uploaded.
    async fn download_sync(&self, token: &CancellationToken) -> Result<()> {
        self.set_state(SyncState::Downloading);
        let remote = self.download_remote(token).await?;

        match remote {
            Some(envelope) => {
                info!(checksum = %envelope.checksum, "adopting remote snapshot");
                self.replace_data(envelope.data);
                self.emit_event(SyncEvent::Downloaded {
                    checksum: envelope.checksum,
                });
            }
            None => {
                info!("no remote snapshot, uploading local data");
                let local = self.data();
                self.upload_snapshot(token, &local).await?;
            }
        }

        self.finish_sync(token)
    }

    /// Compare checksums and upload, adopt, or raise a conflict.
    async fn checking_sync(&self, token: &CancellationToken) -> Result<()> {
        self.set_state(SyncState::Checking);
        let remote = self.download_remote(token).await?;

        let local = self.data();
        let local_checksum = checksum(&local)?;
        let comparison = compare(
            &local,
            &local_checksum,
            remote.as_ref().map(|e| e.checksum.as_str()),
        );
        debug!(?comparison, %local_checksum, "compared local and remote snapshots");

        match (comparison, remote) {
            (Comparison::RemoteMissing, _) | (_, None) => {
                self.upload_snapshot(token, &local).await?;
            }
            (Comparison::Equal, Some(envelope)) => {
                if !local.has_content() {
                    self.replace_data(envelope.data);
                }
            }
            (Comparison::AdoptRemote, Some(envelope)) => {
                info!("local data has no content, adopting remote snapshot");
                self.replace_data(envelope.data);
                self.emit_event(SyncEvent::Downloaded {
                    checksum: envelope.checksum,
                });
            }
            (Comparison::Conflict, Some(envelope)) => {
                let candidate = ConflictCandidate {
                    local,
                    remote: envelope.data,
                    local_checksum,
                    remote_checksum: envelope.checksum,
                    local_last_modified: self.inner.mirror.local_modified()?,
                    remote_last_modified: envelope.last_modified,
                };
                let summary = candidate.summary();
                info!(
                    local_subjects = summary.local.subjects,
                    remote_subjects = summary.remote.subjects,
                    "local and remote snapshots diverged"
                );
                *self.inner.conflict.write() = Some(candidate);
                self.set_state(SyncState::ConflictPending);
                self.emit_event(SyncEvent::ConflictDetected { summary });
                return Ok(());
            }
        }

        self.finish_sync(token)
    }

    /// Common tail of every successful initial sync or resolution.
    fn finish_sync(&self, token: &CancellationToken) -> Result<()> {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.inner.mirror.clear_data()?;
        self.record_sync()?;
        self.inner.initial_sync_done.store(true, Ordering::SeqCst);
        self.set_state(SyncState::Idle);
        Ok(())
    }

    /// Stamp a successful exchange. From here on the remote holds the
    /// document, so the next start waits for it instead of reading the device.
    fn record_sync(&self) -> Result<()> {
        let now = now_millis();
        self.inner.mirror.record_sync(now)?;
        self.inner.mirror.set_was_authenticated(true)?;
        *self.inner.last_sync.write() = Some(now);
        Ok(())
    }

    /// Upload `data`, checking the token before trusting the result.
    async fn upload_snapshot(&self, token: &CancellationToken, data: &UserData) -> Result<SyncEnvelope> {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.set_state(SyncState::Uploading);
        let result = self.inner.gateway.upload(data).await;
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match result {
            Ok(envelope) => {
                debug!(checksum = %envelope.checksum, "uploaded snapshot");
                self.inner.sync_failed.store(false, Ordering::SeqCst);
                *self.inner.last_uploaded_checksum.write() = Some(envelope.checksum.clone());
                self.emit_event(SyncEvent::Uploaded {
                    checksum: envelope.checksum.clone(),
                });
                Ok(envelope)
            }
            Err(e) => {
                error!(error = %e, "upload failed");
                self.inner.sync_failed.store(true, Ordering::SeqCst);
                self.emit_event(SyncEvent::UploadFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Keep the local snapshot: upload it over the remote one.
    ///
    /// Returns `Ok(false)` when no conflict is pending, so a repeated click
    /// is harmless.
    pub async fn resolve_keep_local(&self) -> Result<bool> {
        let Some(candidate) = self.inner.conflict.write().take() else {
            return Ok(false);
        };
        let token = self.session_token();
        let local = self.data();

        if let Err(e) = self.upload_snapshot(&token, &local).await {
            if !matches!(e, Error::Cancelled) {
                // Leave the choice open so the user can retry.
                *self.inner.conflict.write() = Some(candidate);
                self.set_state(SyncState::ConflictPending);
            }
            return Err(e);
        }

        self.finish_sync(&token)?;
        info!("conflict resolved, kept local snapshot");
        self.emit_event(SyncEvent::ConflictResolved {
            resolution: Resolution::KeepLocal,
        });
        Ok(true)
    }

    /// Keep the remote snapshot: replace local data with it.
    pub async fn resolve_keep_remote(&self) -> Result<bool> {
        let Some(candidate) = self.inner.conflict.write().take() else {
            return Ok(false);
        };
        let token = self.session_token();
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        self.replace_data(candidate.remote);
        self.finish_sync(&token)?;
        info!("conflict resolved, kept remote snapshot");
        self.emit_event(SyncEvent::ConflictResolved {
            resolution: Resolution::KeepRemote,
        });
        Ok(true)
    }

    pub async fn resolve(&self, resolution: Resolution) -> Result<bool> {
        match resolution {
            Resolution::KeepLocal => self.resolve_keep_local().await,
            Resolution::KeepRemote => self.resolve_keep_remote().await,
        }
    }

    /// Apply a local edit.
    ///
    /// Signed out, the whole document is written to the device. Signed in
    /// with the initial sync done, a debounced upload is (re)scheduled.
    pub fn mutate<R>(&self, edit: impl FnOnce(&mut UserData) -> R) -> Result<R> {
        let (result, snapshot) = {
            let mut data = self.inner.data.write();
            let result = edit(&mut data);
            (result, data.clone())
        };

        if self.is_logging_out() {
            return Ok(result);
        }

        if self.is_signed_in() && self.inner.initial_sync_done.load(Ordering::SeqCst) {
            self.inner.mirror.touch_local_modified()?;
            self.schedule_upload();
        } else {
            self.inner.mirror.save_data(&snapshot)?;
        }
        Ok(result)
    }

    /// Restart the debounce timer; only the last scheduled upload fires.
    fn schedule_upload(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime, skipping scheduled upload");
            return;
        };
        let token = self.session_token();
        let this = self.clone();
        let handle = runtime.spawn(async move { this.debounced_upload(token).await });

        if let Some(previous) = self.inner.pending_upload.lock().replace(handle) {
            previous.abort();
        }
    }

    async fn debounced_upload(&self, token: CancellationToken) {
        let delay = self.inner.config.debounce;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => return,
            }
            match self.upload_current(&token).await {
                Ok(true) => return,
                // Someone else is uploading; try again after another quiet period.
                Ok(false) => continue,
                Err(Error::Cancelled) => return,
                Err(e) => {
                    debug!(error = %e, "debounced upload failed");
                    return;
                }
            }
        }
    }

    fn cancel_pending_upload(&self) {
        if let Some(handle) = self.inner.pending_upload.lock().take() {
            handle.abort();
        }
    }

    /// Upload the current document now unless another sync is in flight.
    async fn upload_current(&self, token: &CancellationToken) -> Result<bool> {
        let Some(_in_flight) = self.claim_sync() else {
            debug!("sync already in flight");
            return Ok(false);
        };
        let snapshot = self.data();
        let outcome = self.upload_snapshot(token, &snapshot).await;
        if matches!(outcome, Err(Error::Cancelled)) {
            return Err(Error::Cancelled);
        }
        self.set_state(SyncState::Idle);
        outcome?;
        self.record_sync()?;
        Ok(true)
    }

    /// Explicit "sync now".
    ///
    /// No-op (`Ok(false)`) when signed out, before the initial sync, while a
    /// conflict is pending, or while another sync is in flight.
    pub async fn request_sync(&self) -> Result<bool> {
        if !self.is_signed_in()
            || !self.inner.initial_sync_done.load(Ordering::SeqCst)
            || self.has_conflict()
            || self.is_logging_out()
        {
            debug!("sync request ignored in current state");
            return Ok(false);
        }
        let token = self.session_token();
        self.upload_current(&token).await
    }

    /// Replace local data with a pushed remote snapshot.
    ///
    /// Skipped while local edits are waiting to go out, and for echoes of
    /// our own uploads.
    fn apply_remote_change(&self, envelope: SyncEnvelope) -> Result<()> {
        if !self.is_signed_in()
            || !self.inner.initial_sync_done.load(Ordering::SeqCst)
            || self.has_conflict()
            || self.inner.sync_in_flight.read().load(Ordering::SeqCst)
        {
            return Ok(());
        }
        let pending = self
            .inner
            .pending_upload
            .lock()
            .as_ref()
            .map_or(false, |h| !h.is_finished());
        if pending {
            debug!("remote change ignored, local edits pending upload");
            return Ok(());
        }
        if self.inner.last_uploaded_checksum.read().as_deref() == Some(envelope.checksum.as_str()) {
            return Ok(());
        }
        if checksum(&self.data())? == envelope.checksum {
            return Ok(());
        }

        info!(checksum = %envelope.checksum, "applying remote change");
        self.replace_data(envelope.data);
        self.record_sync()?;
        self.emit_event(SyncEvent::RemoteApplied {
            checksum: envelope.checksum,
        });
        Ok(())
    }

    /// Sign out, tearing local state down before the remote call.
    ///
    /// The guard goes up first so queued callbacks and in-flight syncs
    /// observe it and abort; it comes down only after the settle delay.
    pub async fn sign_out(&self) -> Result<()> {
        if self.inner.logging_out.swap(true, Ordering::SeqCst) {
            debug!("sign-out already in progress");
            return Ok(());
        }
        self.set_state(SyncState::LoggingOut);
        self.inner.session.read().cancel();
        self.cancel_pending_upload();

        let mirror = &self.inner.mirror;
        for (what, outcome) in [
            ("data", mirror.clear_data()),
            ("last sync", mirror.clear_last_sync()),
            ("session flag", mirror.set_was_authenticated(false)),
        ] {
            if let Err(e) = outcome {
                warn!(error = %e, "failed to clear {} during sign-out", what);
            }
        }

        *self.inner.data.write() = UserData::default();
        *self.inner.conflict.write() = None;
        *self.inner.last_sync.write() = None;
        *self.inner.last_uploaded_checksum.write() = None;
        self.inner.initial_sync_done.store(false, Ordering::SeqCst);
        self.inner.previous_session.store(false, Ordering::SeqCst);
        self.inner.awaiting_remote.store(false, Ordering::SeqCst);
        self.inner.sync_failed.store(false, Ordering::SeqCst);

        let result = self.inner.gateway.sign_out().await;
        *self.inner.auth.write() = AuthState::signed_out();

        tokio::time::sleep(self.inner.config.logout_settle).await;
        *self.inner.session.write() = CancellationToken::new();
        *self.inner.sync_in_flight.write() = Arc::new(AtomicBool::new(false));
        self.inner.logging_out.store(false, Ordering::SeqCst);
        self.set_state(SyncState::Idle);
        self.emit_event(SyncEvent::SignedOut);
        info!("signed out");
        result
    }

    /// Sign in and run the initial sync.
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<UserIdentity> {
        let user = self.inner.gateway.sign_in(credentials).await?;
        self.handle_auth_change(AuthState::signed_in(user.clone()))
            .await;
        Ok(user)
    }

    /// Create an account and run the initial sync.
    pub async fn sign_up(&self, credentials: &Credentials) -> Result<UserIdentity> {
        let user = self.inner.gateway.sign_up(credentials).await?;
        self.handle_auth_change(AuthState::signed_in(user.clone()))
            .await;
        Ok(user)
    }

    pub async fn update_profile(&self, display_name: &str) -> Result<UserIdentity> {
        let user = self.inner.gateway.update_profile(display_name).await?;
        *self.inner.auth.write() = AuthState::signed_in(user.clone());
        Ok(user)
    }

    /// Claim the current session's in-flight flag.
    fn claim_sync(&self) -> Option<InFlight> {
        InFlight::acquire(&self.inner.sync_in_flight.read())
    }

    /// Load local data if startup deferred it for a session that never came.
    fn fallback_to_local(&self) -> Result<()> {
        if self.inner.awaiting_remote.swap(false, Ordering::SeqCst) {
            debug!("no remote session after all, loading local data");
            self.inner.previous_session.store(false, Ordering::SeqCst);
            self.load_local()?;
        }
        Ok(())
    }

    fn load_local(&self) -> Result<()> {
        if let Some(data) = self.inner.mirror.load_data()? {
            debug!(subjects = data.subjects.len(), "loaded local data");
            *self.inner.data.write() = data;
        }
        Ok(())
    }

    fn replace_data(&self, data: UserData) {
        *self.inner.data.write() = data;
    }

    fn session_token(&self) -> CancellationToken {
        self.inner.session.read().clone()
    }

    fn set_state(&self, new_state: SyncState) {
        let old_state = std::mem::replace(&mut *self.inner.state.write(), new_state);
        if old_state != new_state {
            debug!(?old_state, ?new_state, "sync state changed");
            self.emit_event(SyncEvent::StateChanged {
                old_state,
                new_state,
            });
        }
    }

    fn emit_event(&self, event: SyncEvent) {
        let _ = self.inner.event_tx.send(event);
    }

    /// Take the event stream. Only the first caller gets it.
    pub fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<SyncEvent>> {
        self.inner.event_rx.lock().take()
    }

    /// Snapshot of the current document
    pub fn data(&self) -> UserData {
        self.inner.data.read().clone()
    }

    /// Read the current document without cloning it.
    pub fn with_data<R>(&self, read: impl FnOnce(&UserData) -> R) -> R {
        read(&self.inner.data.read())
    }

    pub fn state(&self) -> SyncState {
        *self.inner.state.read()
    }

    pub fn auth_state(&self) -> AuthState {
        self.inner.auth.read().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.inner.auth.read().is_signed_in
    }

    pub fn is_logging_out(&self) -> bool {
        self.inner.logging_out.load(Ordering::SeqCst)
    }

    pub fn has_conflict(&self) -> bool {
        self.inner.conflict.read().is_some()
    }

    /// The pending conflict, if any
    pub fn conflict(&self) -> Option<ConflictCandidate> {
        self.inner.conflict.read().clone()
    }

    pub fn conflict_summary(&self) -> Option<ConflictSummary> {
        self.inner.conflict.read().as_ref().map(ConflictCandidate::summary)
    }

    pub fn last_sync(&self) -> Option<i64> {
        *self.inner.last_sync.read()
    }

    pub fn preferences(&self) -> Result<Preferences> {
        self.inner.mirror.preferences()
    }

    pub fn save_preferences(&self, prefs: &Preferences) -> Result<()> {
        self.inner.mirror.save_preferences(prefs)
    }

    pub fn status(&self) -> SyncStatus {
        let auth = self.auth_state();
        SyncStatus {
            state: self.state(),
            is_signed_in: auth.is_signed_in,
            user: auth.user,
            initial_sync_done: self.inner.initial_sync_done.load(Ordering::SeqCst),
            sync_in_flight: self.inner.sync_in_flight.read().load(Ordering::SeqCst),
            sync_failed: self.inner.sync_failed.load(Ordering::SeqCst),
            has_conflict: self.has_conflict(),
            last_sync: self.last_sync(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{InjectedFailure, MemoryGateway};
    use crate::retry::RetryPolicy;
    use quizsync_core::MemoryKvStore;
    use std::time::Duration;

    fn fast_config() -> SyncConfig {
        SyncConfig::new()
            .with_debounce(Duration::from_millis(30))
            .with_download_retry(RetryPolicy::fixed(1, Duration::from_millis(5)))
            .with_logout_settle(Duration::from_millis(5))
    }

    fn setup() -> (Synchronizer, Arc<MemoryGateway>, Arc<MemoryKvStore>) {
        let gateway = Arc::new(MemoryGateway::new());
        let store = Arc::new(MemoryKvStore::new());
        let sync = Synchronizer::new(gateway.clone(), store.clone(), fast_config()).unwrap();
        sync.start().unwrap();
        (sync, gateway, store)
    }

    #[tokio::test]
    async fn test_starts_idle_and_signed_out() {
        let (sync, _, _) = setup();
        assert_eq!(sync.state(), SyncState::Idle);
        assert!(!sync.is_signed_in());
        assert_eq!(sync.data(), UserData::default());
    }

    #[tokio::test]
    async fn test_signed_out_mutation_persists_locally() {
        let (sync, _, store) = setup();
        sync.mutate(|d| d.add_subject("Math", None, None)).unwrap();

        let mirror = LocalMirror::new(store);
        let stored = mirror.load_data().unwrap().unwrap();
        assert_eq!(stored.subjects.len(), 1);
    }

    #[tokio::test]
    async fn test_state_transitions_emit_events() {
        let (sync, gateway, _) = setup();
        let mut events = sync.subscribe().unwrap();
        assert!(sync.subscribe().is_none());

        gateway.register("a@example.com", "secret1");
        sync.sign_in(&Credentials::new("a@example.com", "secret1"))
            .await
            .unwrap();

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::StateChanged { new_state, .. } = event {
                states.push(new_state);
            }
        }
        assert_eq!(states.first(), Some(&SyncState::Downloading));
        assert_eq!(states.last(), Some(&SyncState::Idle));
    }

    #[tokio::test]
    async fn test_debounce_coalesces_edits() {
        let (sync, gateway, _) = setup();
        gateway.register("a@example.com", "secret1");
        sync.sign_in(&Credentials::new("a@example.com", "secret1"))
            .await
            .unwrap();
        let after_sign_in = gateway.upload_calls();

        for i in 0..5 {
            sync.mutate(|d| d.add_subject(format!("S{}", i), None, None))
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(gateway.upload_calls(), after_sign_in + 1);
        let uid = sync.auth_state().user.unwrap().uid;
        assert_eq!(gateway.document(&uid).unwrap().data.subjects.len(), 5);
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_local_edit() {
        let (sync, gateway, _) = setup();
        gateway.register("a@example.com", "secret1");
        sync.sign_in(&Credentials::new("a@example.com", "secret1"))
            .await
            .unwrap();

        gateway.fail_next_upload(InjectedFailure::Remote);
        sync.mutate(|d| d.add_subject("Kept", None, None)).unwrap();
        let err = sync.request_sync().await.unwrap_err();
        assert_eq!(err.code(), "REMOTE_ERROR");
        assert!(sync.status().sync_failed);
        assert_eq!(sync.data().subjects.len(), 1);

        assert!(sync.request_sync().await.unwrap());
        assert!(!sync.status().sync_failed);
    }

    #[tokio::test]
    async fn test_request_sync_ignored_when_signed_out() {
        let (sync, gateway, _) = setup();
        assert!(!sync.request_sync().await.unwrap());
        assert_eq!(gateway.upload_calls(), 0);
    }

    #[tokio::test]
    async fn test_request_sync_noop_while_in_flight() {
        let (sync, gateway, _) = setup();
        gateway.register("a@example.com", "secret1");
        sync.sign_in(&Credentials::new("a@example.com", "secret1"))
            .await
            .unwrap();

        let _held = sync.claim_sync().unwrap();
        let before = gateway.upload_calls();
        assert!(!sync.request_sync().await.unwrap());
        assert_eq!(gateway.upload_calls(), before);
    }

    #[tokio::test]
    async fn test_download_retried_once_then_degrades() {
        let (sync, gateway, _) = setup();
        let mut events = sync.subscribe().unwrap();
        gateway.register("a@example.com", "secret1");
        gateway.fail_next_download(InjectedFailure::NotReady);
        gateway.fail_next_download(InjectedFailure::NotReady);

        sync.sign_in(&Credentials::new("a@example.com", "secret1"))
            .await
            .unwrap();

        assert_eq!(gateway.download_calls(), 2);
        assert!(sync.status().initial_sync_done);
        assert_eq!(sync.state(), SyncState::Idle);
        let failed = std::iter::from_fn(|| events.try_recv().ok())
            .any(|e| matches!(e, SyncEvent::DownloadFailed { .. }));
        assert!(failed);
    }

    #[tokio::test]
    async fn test_initial_upload_failure_is_not_a_download_failure() {
        let (sync, gateway, _) = setup();
        sync.mutate(|d| d.add_subject("Local", None, None)).unwrap();
        let mut events = sync.subscribe().unwrap();
        gateway.register("a@example.com", "secret1");
        gateway.fail_next_upload(InjectedFailure::Remote);

        sync.sign_in(&Credentials::new("a@example.com", "secret1"))
            .await
            .unwrap();

        let events: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, SyncEvent::UploadFailed { .. })));
        assert!(!events
            .iter()
            .any(|e| matches!(e, SyncEvent::DownloadFailed { .. })));
        assert!(sync.status().initial_sync_done);
        assert!(sync.status().sync_failed);
        assert_eq!(sync.state(), SyncState::Idle);
        assert_eq!(sync.data().subjects.len(), 1);
    }

    #[tokio::test]
    async fn test_previous_session_defers_local_load() {
        let gateway = Arc::new(MemoryGateway::new());
        let store = Arc::new(MemoryKvStore::new());
        let mirror = LocalMirror::new(store.clone());
        let mut stale = UserData::new();
        stale.add_subject("Stale", None, None);
        mirror.save_data(&stale).unwrap();
        mirror.set_was_authenticated(true).unwrap();

        let sync = Synchronizer::new(gateway.clone(), store, fast_config()).unwrap();
        sync.start().unwrap();
        assert!(sync.data().subjects.is_empty());

        let user = gateway.register("a@example.com", "secret1");
        let mut remote = UserData::new();
        remote.add_subject("Remote", None, None);
        gateway.seed_document(&user.uid, remote.clone()).unwrap();

        sync.sign_in(&Credentials::new("a@example.com", "secret1"))
            .await
            .unwrap();
        assert_eq!(sync.data(), remote);
        assert!(!mirror.has_data().unwrap());
        assert!(mirror.last_sync().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_previous_session_falls_back_when_signed_out() {
        let gateway = Arc::new(MemoryGateway::new());
        let store = Arc::new(MemoryKvStore::new());
        let mirror = LocalMirror::new(store.clone());
        let mut saved = UserData::new();
        saved.add_subject("Saved", None, None);
        mirror.save_data(&saved).unwrap();
        mirror.set_was_authenticated(true).unwrap();

        let sync = Synchronizer::new(gateway, store, fast_config()).unwrap();
        sync.start().unwrap();
        sync.handle_auth_change(AuthState::signed_out()).await;
        assert_eq!(sync.data(), saved);
    }

    #[tokio::test]
    async fn test_remote_push_applied_after_initial_sync() {
        let (sync, gateway, _) = setup();
        let user = gateway.register("a@example.com", "secret1");
        sync.sign_in(&Credentials::new("a@example.com", "secret1"))
            .await
            .unwrap();
        let loop_handle = sync.spawn_event_loop(gateway.subscribe());

        let mut other_device = UserData::new();
        other_device.add_subject("From tablet", None, None);
        gateway.push_remote_change(&user.uid, other_device.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(sync.data(), other_device);
        loop_handle.abort();
    }

    #[tokio::test]
    async fn test_sign_out_clears_everything() {
        let (sync, gateway, store) = setup();
        gateway.register("a@example.com", "secret1");
        sync.sign_in(&Credentials::new("a@example.com", "secret1"))
            .await
            .unwrap();
        sync.mutate(|d| d.add_subject("Gone", None, None)).unwrap();

        sync.sign_out().await.unwrap();
        let mirror = LocalMirror::new(store);
        assert!(!sync.is_signed_in());
        assert!(sync.data().subjects.is_empty());
        assert!(!mirror.has_data().unwrap());
        assert!(!mirror.was_authenticated().unwrap());
        assert!(mirror.last_sync().unwrap().is_none());
        assert_eq!(sync.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_sign_out_cancels_debounced_upload() {
        let (sync, gateway, _) = setup();
        gateway.register("a@example.com", "secret1");
        sync.sign_in(&Credentials::new("a@example.com", "secret1"))
            .await
            .unwrap();
        let before = gateway.upload_calls();

        sync.mutate(|d| d.add_subject("Never uploaded", None, None))
            .unwrap();
        sync.sign_out().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(gateway.upload_calls(), before);
    }

    #[tokio::test]
    async fn test_update_profile() {
        let (sync, gateway, _) = setup();
        gateway.register("a@example.com", "secret1");
        sync.sign_in(&Credentials::new("a@example.com", "secret1"))
            .await
            .unwrap();
        sync.update_profile("Grace").await.unwrap();
        assert_eq!(
            sync.auth_state().user.unwrap().display_name.as_deref(),
            Some("Grace")
        );
    }
}
