//! Key-value persistence behind the session, handle cache and settings
//!
//! The client never touches files directly; everything it persists goes
//! through [`KeyValueStore`], so tests and anonymous sessions can run on
//! [`MemoryStore`] while the binary uses [`EncryptedFileStore`].

mod encrypted;

pub use encrypted::EncryptedFileStore;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Key of the session blob
pub const USER_DATA_KEY: &str = "userData";
/// Key of the handle→DID map
pub const HANDLE_CACHE_KEY: &str = "handleCache";
/// Key of the user-facing settings
pub const SETTINGS_KEY: &str = "settings";

/// String-keyed storage of string values
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value (no-op if missing)
    fn remove(&self, key: &str) -> Result<()>;
}

/// Shared handle to a store
pub type SharedStore = Arc<dyn KeyValueStore>;

/// Read and deserialize a JSON value, treating unparseable data as absent
pub fn load_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            tracing::warn!("Discarding unreadable {} entry: {}", key, e);
            Ok(None)
        }
    }
}

/// Serialize and write a JSON value
pub fn save_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

/// Volatile in-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store behind an `Arc`
    pub fn shared() -> SharedStore {
        Arc::new(Self::new())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}
