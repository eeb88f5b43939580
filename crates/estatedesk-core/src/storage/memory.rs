use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::StorageError;

use super::KeyValueStore;

/// In-process store. With a quota set, writes that would push the total
/// stored size (keys + values, in bytes) past it fail like a full
/// browser storage would.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota: Some(quota),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.lock();
        if let Some(quota) = self.quota {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let requested = key.len() + value.len();
            if used + requested > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    requested,
                    available: quota.saturating_sub(used),
                });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.lock().remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let store = MemoryStore::new();
        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").as_deref(), Some("1"));

        store.remove("a");
        assert!(store.get("a").is_none());
        // Removing twice is fine
        store.remove("a");
    }

    #[test]
    fn test_quota_rejects_oversized_write() {
        let store = MemoryStore::with_quota(10);
        store.set("k", "12345").unwrap();

        let err = store.set("other", "123456789").unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { .. }));
        assert!(store.get("other").is_none());
    }

    #[test]
    fn test_quota_counts_replacement_once() {
        let store = MemoryStore::with_quota(10);
        store.set("k", "123456").unwrap();
        // Replacing the same key does not double count the old value
        store.set("k", "abcdefgh").unwrap();
        assert_eq!(store.get("k").as_deref(), Some("abcdefgh"));
    }

    #[test]
    fn test_clear_prefix() {
        let store = MemoryStore::new();
        store.set("cache_apartments", "x").unwrap();
        store.set("cache_tenants", "y").unwrap();
        store.set("auth_auth_token", "z").unwrap();

        assert_eq!(store.clear_prefix("cache_"), 2);
        assert_eq!(store.keys(), vec!["auth_auth_token".to_string()]);
    }
}
