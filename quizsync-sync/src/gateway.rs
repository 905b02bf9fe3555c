//! Remote gateway contract and the in-memory implementation.
//!
//! A gateway owns the remote copy of a user's document (one envelope per
//! user) and the identity session. The synchronizer treats the envelope as
//! opaque apart from its data, checksum, and timestamp.

pub mod filesystem;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

use quizsync_core::{checksum, now_millis, AuthError, Error, Result, UserData};

/// Minimum accepted password length for sign-up.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Capacity of the gateway event channel.
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub uid: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Session state as reported by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub is_signed_in: bool,
    pub user: Option<UserIdentity>,
}

impl AuthState {
    pub fn signed_out() -> Self {
        Self {
            is_signed_in: false,
            user: None,
        }
    }

    pub fn signed_in(user: UserIdentity) -> Self {
        Self {
            is_signed_in: true,
            user: Some(user),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// The remote-side wrapper around a stored document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEnvelope {
    pub data: UserData,
    pub checksum: String,
    pub last_modified: i64,
}

impl SyncEnvelope {
    /// Wrap a snapshot, stamping it with its checksum and the current time.
    pub fn seal(data: UserData) -> Result<Self> {
        let checksum = checksum(&data)?;
        Ok(Self {
            data,
            checksum,
            last_modified: now_millis(),
        })
    }
}

/// Notifications pushed by a gateway
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Sign-in state changed
    AuthChanged(AuthState),
    /// The signed-in user's remote document changed
    RemoteChanged(SyncEnvelope),
}

/// Everything the synchronizer needs from a remote document store.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Whether the gateway has what it needs to talk to its backend
    fn is_configured(&self) -> bool;

    /// Prepare the backend (restore a persisted session, etc.)
    async fn initialize(&self) -> Result<()>;

    /// Subscribe to auth and remote-document notifications
    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent>;

    /// Current session
    fn auth_state(&self) -> AuthState;

    /// Fetch the signed-in user's envelope, `None` if never uploaded.
    ///
    /// Fails with `Error::Offline` when the backend is unreachable or blocked.
    async fn download(&self) -> Result<Option<SyncEnvelope>>;

    /// Replace the signed-in user's envelope with `data`.
    async fn upload(&self, data: &UserData) -> Result<SyncEnvelope>;

    async fn sign_in(&self, credentials: &Credentials) -> Result<UserIdentity>;

    async fn sign_up(&self, credentials: &Credentials) -> Result<UserIdentity>;

    async fn sign_out(&self) -> Result<()>;

    async fn update_profile(&self, display_name: &str) -> Result<UserIdentity>;
}

/// Shape checks shared by the gateway implementations.
pub(crate) fn check_sign_up(credentials: &Credentials) -> Result<()> {
    if !credentials.email.contains('@') {
        return Err(AuthError::InvalidCredentials.into());
    }
    if credentials.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword.into());
    }
    Ok(())
}

/// Failure classes a `MemoryGateway` can be told to inject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Offline,
    NotReady,
    PermissionDenied,
    Remote,
}

impl InjectedFailure {
    fn into_error(self, op: &str) -> Error {
        match self {
            InjectedFailure::Offline => Error::Offline(format!("{} blocked", op)),
            InjectedFailure::NotReady => Error::NotReady(format!("{} before backend ready", op)),
            InjectedFailure::PermissionDenied => {
                Error::PermissionDenied(format!("{} rejected by rules", op))
            }
            InjectedFailure::Remote => Error::Remote(format!("{} failed", op)),
        }
    }
}

struct Account {
    identity: UserIdentity,
    password: String,
}

/// In-process gateway with failure injection, used by tests and demos.
pub struct MemoryGateway {
    accounts: RwLock<HashMap<String, Account>>,
    documents: RwLock<HashMap<String, SyncEnvelope>>,
    current: RwLock<Option<UserIdentity>>,
    events: broadcast::Sender<GatewayEvent>,
    download_delay: RwLock<Duration>,
    download_failures: Mutex<VecDeque<InjectedFailure>>,
    upload_failures: Mutex<VecDeque<InjectedFailure>>,
    download_calls: AtomicUsize,
    upload_calls: AtomicUsize,
}

impl MemoryGateway {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            accounts: RwLock::new(HashMap::new()),
            documents: RwLock::new(HashMap::new()),
            current: RwLock::new(None),
            events,
            download_delay: RwLock::new(Duration::ZERO),
            download_failures: Mutex::new(VecDeque::new()),
            upload_failures: Mutex::new(VecDeque::new()),
            download_calls: AtomicUsize::new(0),
            upload_calls: AtomicUsize::new(0),
        }
    }

    /// Create an account without signing in.
    pub fn register(&self, email: &str, password: &str) -> UserIdentity {
        let identity = UserIdentity {
            uid: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            display_name: None,
        };
        self.accounts.write().insert(
            email.to_string(),
            Account {
                identity: identity.clone(),
                password: password.to_string(),
            },
        );
        identity
    }

    /// Store a document for `uid` as if another device had uploaded it.
    pub fn seed_document(&self, uid: &str, data: UserData) -> Result<SyncEnvelope> {
        let envelope = SyncEnvelope::seal(data)?;
        self.documents
            .write()
            .insert(uid.to_string(), envelope.clone());
        Ok(envelope)
    }

    /// Like `seed_document`, and notify subscribers if `uid` is signed in.
    pub fn push_remote_change(&self, uid: &str, data: UserData) -> Result<SyncEnvelope> {
        let envelope = self.seed_document(uid, data)?;
        let is_current = self
            .current
            .read()
            .as_ref()
            .map_or(false, |u| u.uid == uid);
        if is_current {
            let _ = self.events.send(GatewayEvent::RemoteChanged(envelope.clone()));
        }
        Ok(envelope)
    }

    pub fn document(&self, uid: &str) -> Option<SyncEnvelope> {
        self.documents.read().get(uid).cloned()
    }

    /// Delay every download by `delay` (simulates a slow network).
    pub fn set_download_delay(&self, delay: Duration) {
        *self.download_delay.write() = delay;
    }

    pub fn fail_next_download(&self, failure: InjectedFailure) {
        self.download_failures.lock().push_back(failure);
    }

    pub fn fail_next_upload(&self, failure: InjectedFailure) {
        self.upload_failures.lock().push_back(failure);
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    fn current_uid(&self) -> Result<String> {
        self.current
            .read()
            .as_ref()
            .map(|u| u.uid.clone())
            .ok_or_else(|| Error::PermissionDenied("no signed-in user".to_string()))
    }

    fn emit_auth(&self, state: AuthState) {
        let _ = self.events.send(GatewayEvent::AuthChanged(state));
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    fn is_configured(&self) -> bool {
        true
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    fn auth_state(&self) -> AuthState {
        match self.current.read().clone() {
            Some(user) => AuthState::signed_in(user),
            None => AuthState::signed_out(),
        }
    }

    async fn download(&self) -> Result<Option<SyncEnvelope>> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.download_delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(failure) = self.download_failures.lock().pop_front() {
            return Err(failure.into_error("download"));
        }

        let uid = self.current_uid()?;
        Ok(self.documents.read().get(&uid).cloned())
    }

    async fn upload(&self, data: &UserData) -> Result<SyncEnvelope> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.upload_failures.lock().pop_front() {
            return Err(failure.into_error("upload"));
        }

        let uid = self.current_uid()?;
        let envelope = SyncEnvelope::seal(data.clone())?;
        self.documents.write().insert(uid, envelope.clone());
        let _ = self.events.send(GatewayEvent::RemoteChanged(envelope.clone()));
        Ok(envelope)
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<UserIdentity> {
        let identity = {
            let accounts = self.accounts.read();
            let account = accounts
                .get(&credentials.email)
                .ok_or(AuthError::UserNotFound)?;
            if account.password != credentials.password {
                return Err(AuthError::InvalidCredentials.into());
            }
            account.identity.clone()
        };

        *self.current.write() = Some(identity.clone());
        self.emit_auth(AuthState::signed_in(identity.clone()));
        Ok(identity)
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<UserIdentity> {
        check_sign_up(credentials)?;
        if self.accounts.read().contains_key(&credentials.email) {
            return Err(AuthError::EmailInUse.into());
        }

        let identity = self.register(&credentials.email, &credentials.password);
        *self.current.write() = Some(identity.clone());
        self.emit_auth(AuthState::signed_in(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<()> {
        *self.current.write() = None;
        self.emit_auth(AuthState::signed_out());
        Ok(())
    }

    async fn update_profile(&self, display_name: &str) -> Result<UserIdentity> {
        let uid = self.current_uid()?;
        let mut accounts = self.accounts.write();
        let account = accounts
            .values_mut()
            .find(|a| a.identity.uid == uid)
            .ok_or(AuthError::UserNotFound)?;
        account.identity.display_name = Some(display_name.to_string());
        let identity = account.identity.clone();
        drop(accounts);

        *self.current.write() = Some(identity.clone());
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sign_up_then_round_trip_document() {
        let gateway = MemoryGateway::new();
        let mut events = gateway.subscribe();

        let user = gateway
            .sign_up(&Credentials::new("a@example.com", "secret1"))
            .await
            .unwrap();
        assert!(gateway.auth_state().is_signed_in);
        assert_eq!(
            events.recv().await.unwrap(),
            GatewayEvent::AuthChanged(AuthState::signed_in(user.clone()))
        );

        assert!(gateway.download().await.unwrap().is_none());

        let mut data = UserData::new();
        data.add_subject("Math", None, None);
        let envelope = gateway.upload(&data).await.unwrap();
        assert_eq!(envelope.checksum, checksum(&data).unwrap());

        let downloaded = gateway.download().await.unwrap().unwrap();
        assert_eq!(downloaded.data, data);
        assert_eq!(gateway.document(&user.uid), Some(downloaded));
    }

    #[tokio::test]
    async fn test_auth_error_taxonomy() {
        let gateway = MemoryGateway::new();
        gateway.register("taken@example.com", "secret1");

        let err = gateway
            .sign_up(&Credentials::new("taken@example.com", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::EmailInUse)));

        let err = gateway
            .sign_up(&Credentials::new("new@example.com", "123"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::WeakPassword)));

        let err = gateway
            .sign_in(&Credentials::new("ghost@example.com", "secret1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::UserNotFound)));

        let err = gateway
            .sign_in(&Credentials::new("taken@example.com", "wrong!!"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let gateway = MemoryGateway::new();
        gateway
            .sign_up(&Credentials::new("a@example.com", "secret1"))
            .await
            .unwrap();

        gateway.fail_next_download(InjectedFailure::Offline);
        assert!(matches!(gateway.download().await, Err(Error::Offline(_))));
        assert!(gateway.download().await.is_ok());
        assert_eq!(gateway.download_calls(), 2);

        gateway.fail_next_upload(InjectedFailure::Remote);
        assert!(gateway.upload(&UserData::new()).await.is_err());
        assert!(gateway.upload(&UserData::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_download_requires_session() {
        let gateway = MemoryGateway::new();
        let err = gateway.download().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_update_profile() {
        let gateway = MemoryGateway::new();
        gateway
            .sign_up(&Credentials::new("a@example.com", "secret1"))
            .await
            .unwrap();
        let user = gateway.update_profile("Ada").await.unwrap();
        assert_eq!(user.display_name.as_deref(), Some("Ada"));
        assert_eq!(gateway.auth_state().user, Some(user));
    }
}
