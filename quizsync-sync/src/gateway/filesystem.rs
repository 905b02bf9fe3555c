//! Directory-backed remote gateway
//!
//! Stands in for a hosted document store: accounts live in `users.json`,
//! the active session in `session.json`, and each user's envelope in
//! `documents/<uid>.json`. Two data directories pointed at the same remote
//! directory behave like two devices sharing one account.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

use quizsync_core::{AuthError, Error, Result, UserData};

use crate::gateway::{
    check_sign_up, AuthState, Credentials, GatewayEvent, RemoteGateway, SyncEnvelope,
    UserIdentity,
};

const USERS_FILE: &str = "users.json";
const SESSION_FILE: &str = "session.json";
const DOCUMENTS_DIR: &str = "documents";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredAccount {
    identity: UserIdentity,
    salt: String,
    password_hash: String,
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Filesystem gateway
pub struct FileGateway {
    /// Remote root directory
    root: PathBuf,
    /// Signed-in user
    current: RwLock<Option<UserIdentity>>,
    events: broadcast::Sender<GatewayEvent>,
}

impl FileGateway {
    /// Create a gateway rooted at `root`. Nothing is touched until `initialize`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            root: root.into(),
            current: RwLock::new(None),
            events,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, uid: &str) -> PathBuf {
        self.root.join(DOCUMENTS_DIR).join(format!("{}.json", uid))
    }

    /// Map IO failures on the remote root to the gateway taxonomy.
    fn remote_io(&self, e: io::Error) -> Error {
        match e.kind() {
            io::ErrorKind::NotFound => {
                Error::Offline(format!("remote directory {} unavailable", self.root.display()))
            }
            io::ErrorKind::PermissionDenied => Error::PermissionDenied(e.to_string()),
            _ => Error::Io(e),
        }
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(&self, path: &Path) -> Result<Option<T>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.remote_io(e)),
        }
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let content = serde_json::to_string_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| self.remote_io(e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| self.remote_io(e))?;
        Ok(())
    }

    async fn load_accounts(&self) -> Result<HashMap<String, StoredAccount>> {
        Ok(self
            .read_json(&self.root.join(USERS_FILE))
            .await?
            .unwrap_or_default())
    }

    async fn save_accounts(&self, accounts: &HashMap<String, StoredAccount>) -> Result<()> {
        self.write_json(&self.root.join(USERS_FILE), accounts).await
    }

    async fn start_session(&self, identity: UserIdentity) -> Result<UserIdentity> {
        self.write_json(&self.root.join(SESSION_FILE), &identity)
            .await?;
        *self.current.write() = Some(identity.clone());
        let _ = self
            .events
            .send(GatewayEvent::AuthChanged(AuthState::signed_in(identity.clone())));
        Ok(identity)
    }

    fn current_uid(&self) -> Result<String> {
        self.current
            .read()
            .as_ref()
            .map(|u| u.uid.clone())
            .ok_or_else(|| Error::PermissionDenied("no signed-in user".to_string()))
    }
}

#[async_trait]
impl RemoteGateway for FileGateway {
    fn is_configured(&self) -> bool {
        !self.root.as_os_str().is_empty()
    }

    async fn initialize(&self) -> Result<()> {
        if !self.is_configured() {
            return Err(Error::NotConfigured);
        }
        tokio::fs::create_dir_all(self.root.join(DOCUMENTS_DIR))
            .await
            .map_err(|e| self.remote_io(e))?;

        let session: Option<UserIdentity> = self.read_json(&self.root.join(SESSION_FILE)).await?;
        if let Some(identity) = session {
            tracing::debug!(uid = %identity.uid, "restored remote session");
            *self.current.write() = Some(identity.clone());
            let _ = self
                .events
                .send(GatewayEvent::AuthChanged(AuthState::signed_in(identity)));
        }
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
        let uid = self.current_uid()?;
        if tokio::fs::metadata(&self.root).await.is_err() {
            return Err(Error::Offline(format!(
                "remote directory {} unavailable",
                self.root.display()
            )));
        }
        self.read_json(&self.document_path(&uid)).await
    }

    async fn upload(&self, data: &UserData) -> Result<SyncEnvelope> {
        let uid = self.current_uid()?;
        let envelope = SyncEnvelope::seal(data.clone())?;
        self.write_json(&self.document_path(&uid), &envelope).await?;
        let _ = self.events.send(GatewayEvent::RemoteChanged(envelope.clone()));
        Ok(envelope)
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<UserIdentity> {
        let accounts = self.load_accounts().await?;
        let account = accounts
            .get(&credentials.email)
            .ok_or(AuthError::UserNotFound)?;
        if hash_password(&account.salt, &credentials.password) != account.password_hash {
            return Err(AuthError::InvalidCredentials.into());
        }
        self.start_session(account.identity.clone()).await
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<UserIdentity> {
        check_sign_up(credentials)?;
        let mut accounts = self.load_accounts().await?;
        if accounts.contains_key(&credentials.email) {
            return Err(AuthError::EmailInUse.into());
        }

        let identity = UserIdentity {
            uid: uuid::Uuid::new_v4().to_string(),
            email: credentials.email.clone(),
            display_name: None,
        };
        let salt = uuid::Uuid::new_v4().simple().to_string();
        accounts.insert(
            credentials.email.clone(),
            StoredAccount {
                identity: identity.clone(),
                password_hash: hash_password(&salt, &credentials.password),
                salt,
            },
        );
        self.save_accounts(&accounts).await?;
        self.start_session(identity).await
    }

    async fn sign_out(&self) -> Result<()> {
        match tokio::fs::remove_file(self.root.join(SESSION_FILE)).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(self.remote_io(e)),
        }
        *self.current.write() = None;
        let _ = self
            .events
            .send(GatewayEvent::AuthChanged(AuthState::signed_out()));
        Ok(())
    }

    async fn update_profile(&self, display_name: &str) -> Result<UserIdentity> {
        let uid = self.current_uid()?;
        let mut accounts = self.load_accounts().await?;
        let account = accounts
            .values_mut()
            .find(|a| a.identity.uid == uid)
            .ok_or(AuthError::UserNotFound)?;
        account.identity.display_name = Some(display_name.to_string());
        let identity = account.identity.clone();
        self.save_accounts(&accounts).await?;

        self.write_json(&self.root.join(SESSION_FILE), &identity)
            .await?;
        *self.current.write() = Some(identity.clone());
        Ok(identity)
    }
}
