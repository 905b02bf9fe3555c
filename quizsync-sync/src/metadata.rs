//! Local persistence mirror
//!
//! Everything the synchronizer keeps on the device, one key per concern, on
//! top of a `KeyValueStore`.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

use quizsync_core::{now_millis, KeyValueStore, Result, UserData};

/// Storage keys
pub mod keys {
    pub const DATA: &str = "quiz-app-data";
    pub const TUTORIAL_SEEN: &str = "tutorial-seen";
    pub const LANGUAGE: &str = "language";
    pub const DARK_MODE: &str = "dark-mode";
    pub const LAST_SYNC: &str = "last-sync";
    pub const WAS_AUTHENTICATED: &str = "was-authenticated";
    pub const LOCAL_MODIFIED: &str = "local-modified";
}

/// UI preferences that live next to the data but are never synced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preferences {
    pub tutorial_seen: bool,
    pub language: Option<String>,
    pub dark_mode: bool,
}

/// Typed access to the on-device keys
#[derive(Clone)]
pub struct LocalMirror {
    store: Arc<dyn KeyValueStore>,
}

impl LocalMirror {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Whether a data blob is stored at all.
    pub fn has_data(&self) -> Result<bool> {
        Ok(self
            .store
            .get(keys::DATA)?
            .map_or(false, |blob| !blob.trim().is_empty()))
    }

    /// Load the stored document merged over the empty shape.
    ///
    /// An unreadable blob is logged and treated as absent rather than
    /// blocking startup.
    pub fn load_data(&self) -> Result<Option<UserData>> {
        let Some(blob) = self.store.get(keys::DATA)? else {
            return Ok(None);
        };
        match serde_json::from_str::<UserData>(&blob) {
            Ok(data) => Ok(Some(data)),
            Err(e) => {
                warn!(error = %e, "stored data is unreadable, starting empty");
                Ok(None)
            }
        }
    }

    /// Write the whole document and stamp the local modification time.
    pub fn save_data(&self, data: &UserData) -> Result<()> {
        let blob = serde_json::to_string(data)?;
        self.store.set(keys::DATA, &blob)?;
        self.touch_local_modified()
    }

    pub fn clear_data(&self) -> Result<()> {
        self.store.remove(keys::DATA)
    }

    pub fn local_modified(&self) -> Result<Option<i64>> {
        self.read_timestamp(keys::LOCAL_MODIFIED)
    }

    pub fn touch_local_modified(&self) -> Result<()> {
        self.write_timestamp(keys::LOCAL_MODIFIED, now_millis())
    }

    pub fn last_sync(&self) -> Result<Option<i64>> {
        self.read_timestamp(keys::LAST_SYNC)
    }

    pub fn record_sync(&self, at: i64) -> Result<()> {
        self.write_timestamp(keys::LAST_SYNC, at)
    }

    pub fn clear_last_sync(&self) -> Result<()> {
        self.store.remove(keys::LAST_SYNC)
    }

    pub fn was_authenticated(&self) -> Result<bool> {
        Ok(self.store.get(keys::WAS_AUTHENTICATED)?.as_deref() == Some("true"))
    }

    pub fn set_was_authenticated(&self, value: bool) -> Result<()> {
        if value {
            self.store.set(keys::WAS_AUTHENTICATED, "true")
        } else {
            self.store.remove(keys::WAS_AUTHENTICATED)
        }
    }

    pub fn preferences(&self) -> Result<Preferences> {
        Ok(Preferences {
            tutorial_seen: self.store.get(keys::TUTORIAL_SEEN)?.as_deref() == Some("true"),
            language: self.store.get(keys::LANGUAGE)?,
            dark_mode: self.store.get(keys::DARK_MODE)?.as_deref() == Some("true"),
        })
    }

    pub fn save_preferences(&self, prefs: &Preferences) -> Result<()> {
        self.store
            .set(keys::TUTORIAL_SEEN, bool_str(prefs.tutorial_seen))?;
        self.store.set(keys::DARK_MODE, bool_str(prefs.dark_mode))?;
        match &prefs.language {
            Some(lang) => self.store.set(keys::LANGUAGE, lang),
            None => self.store.remove(keys::LANGUAGE),
        }
    }

    fn read_timestamp(&self, key: &str) -> Result<Option<i64>> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(ts) => Ok(Some(ts.timestamp_millis())),
            Err(e) => {
                warn!(key, error = %e, "ignoring malformed timestamp");
                Ok(None)
            }
        }
    }

    fn write_timestamp(&self, key: &str, millis: i64) -> Result<()> {
        let ts = DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_else(Utc::now);
        self.store.set(key, &ts.to_rfc3339())
    }
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}
