//! Persisted handle → DID cache

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::store::{self, SharedStore};

/// Handle → DID map backed by the key-value store
pub struct HandleCache {
    store: SharedStore,
    entries: Mutex<BTreeMap<String, String>>,
}

impl HandleCache {
    /// Load the cache from the store
    pub fn load(store: SharedStore) -> Result<Self> {
        let entries = store::load_json(store.as_ref(), store::HANDLE_CACHE_KEY)?.unwrap_or_default();
        Ok(Self {
            store,
            entries: Mutex::new(entries),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Storage("handle cache lock poisoned".to_string()))
    }

    /// Cached DID for a handle
    pub fn get_handle_did(&self, handle: &str) -> Option<String> {
        self.lock().ok()?.get(handle).cloned()
    }

    /// Remember a handle's DID and persist the cache
    pub fn set_handle_did(&self, handle: &str, did: &str) -> Result<()> {
        let snapshot = {
            let mut entries = self.lock()?;
            if entries.get(handle).map(String::as_str) == Some(did) {
                return Ok(());
            }
            entries.insert(handle.to_string(), did.to_string());
            entries.clone()
        };

        store::save_json(self.store.as_ref(), store::HANDLE_CACHE_KEY, &snapshot)
    }

    /// Reverse lookup; the first matching handle wins
    pub fn find_handle_by_did(&self, did: &str) -> Option<String> {
        self.lock()
            .ok()?
            .iter()
            .find(|(_, cached)| cached.as_str() == did)
            .map(|(handle, _)| handle.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_persists_across_loads() {
        let store = MemoryStore::shared();
        let cache = HandleCache::load(store.clone()).unwrap();
        assert_eq!(cache.get_handle_did("alice.test"), None);

        cache.set_handle_did("alice.test", "did:plc:alice").unwrap();

        let reloaded = HandleCache::load(store).unwrap();
        assert_eq!(reloaded.get_handle_did("alice.test").as_deref(), Some("did:plc:alice"));
        assert_eq!(reloaded.find_handle_by_did("did:plc:alice").as_deref(), Some("alice.test"));
        assert_eq!(reloaded.find_handle_by_did("did:plc:nobody"), None);
    }

    #[test]
    fn test_update_replaces_did() {
        let cache = HandleCache::load(MemoryStore::shared()).unwrap();
        cache.set_handle_did("bob.test", "did:plc:old").unwrap();
        cache.set_handle_did("bob.test", "did:plc:new").unwrap();
        assert_eq!(cache.get_handle_did("bob.test").as_deref(), Some("did:plc:new"));
    }
}
