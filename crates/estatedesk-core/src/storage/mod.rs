//! Key-value persistence used by the cache and token layers.
//!
//! This module provides:
//! - `KeyValueStore`: the narrow primitive every backend implements
//! - `MemoryStore`: an in-process map, optionally quota-limited
//! - `FileStore`: one file per key in the cache directory
//! - `EncodedStore`: namespaced, encrypted JSON values over any backend

pub mod encoded;
pub mod file;
pub mod memory;

use std::sync::Arc;

use crate::error::StorageError;

pub use encoded::EncodedStore;
pub use file::FileStore;
pub use memory::MemoryStore;

/// Synchronous string key-value primitive, modelled on browser local storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str);

    fn keys(&self) -> Vec<String>;

    /// Remove every key starting with `prefix`. Returns how many were removed.
    fn clear_prefix(&self, prefix: &str) -> usize {
        let doomed: Vec<String> = self
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }
}

pub type SharedStore = Arc<dyn KeyValueStore>;
