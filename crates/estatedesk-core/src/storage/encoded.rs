use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::crypto::Cipher;
use crate::error::Result;

use super::SharedStore;

/// Encrypted JSON values under a namespace prefix.
///
/// Every key is stored as `{namespace}_{key}`, so two stores with different
/// namespaces can share one backend and be cleared independently.
#[derive(Clone)]
pub struct EncodedStore {
    backend: SharedStore,
    cipher: Arc<dyn Cipher>,
    namespace: String,
}

impl EncodedStore {
    pub fn new(backend: SharedStore, cipher: Arc<dyn Cipher>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            cipher,
            namespace: namespace.into(),
        }
    }

    pub fn backend(&self) -> &SharedStore {
        &self.backend
    }

    /// Full backend key for a logical key
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}_{}", self.namespace, key)
    }

    /// Serialize, encrypt and persist a value.
    ///
    /// Values that cannot be represented as JSON are rejected before
    /// anything is written.
    pub fn set_item<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let plaintext = serde_json::to_vec(value)?;
        let blob = self.cipher.encrypt(&plaintext)?;
        self.backend.set(&self.storage_key(key), &blob)?;
        Ok(())
    }

    /// Read and decrypt a value.
    ///
    /// Blobs that fail to decrypt or parse are removed and read as absent.
    pub fn get_item<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let storage_key = self.storage_key(key);
        let blob = self.backend.get(&storage_key)?;

        let plaintext = match self.cipher.decrypt(&blob) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(key = %storage_key, error = %e, "Removing undecryptable blob");
                self.backend.remove(&storage_key);
                return None;
            }
        };

        match serde_json::from_slice(&plaintext) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %storage_key, error = %e, "Removing unparsable blob");
                self.backend.remove(&storage_key);
                None
            }
        }
    }

    pub fn remove_item(&self, key: &str) {
        self.backend.remove(&self.storage_key(key));
    }

    /// Remove every key in this namespace, leaving other namespaces alone.
    pub fn clear(&self) -> usize {
        let removed = self.backend.clear_prefix(&self.prefix());
        debug!(namespace = %self.namespace, removed, "Cleared namespace");
        removed
    }

    /// Logical keys currently stored in this namespace.
    pub fn keys(&self) -> Vec<String> {
        let prefix = self.prefix();
        let mut keys: Vec<String> = self
            .backend
            .keys()
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect();
        keys.sort();
        keys
    }

    fn prefix(&self) -> String {
        format!("{}_", self.namespace)
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::crypto::{XChaChaCipher, KEY_LEN};
    use crate::storage::MemoryStore;
    use proptest::prelude::*;
    use serde_json::Value;
    use std::sync::Arc;

    /// Arbitrary JSON documents. Floats are short dyadic values whose
    /// decimal form parses back to the same bits.
    fn json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            any::<u64>().prop_map(Value::from),
            (any::<i16>(), 0u32..8).prop_map(|(m, e)| Value::from(f64::from(m) / f64::from(1u32 << e))),
            any::<String>().prop_map(Value::String),
        ];
        leaf.prop_recursive(4, 64, 8, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
                prop::collection::hash_map(any::<String>(), inner, 0..8)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        /// Whatever goes in through `set_item` comes back out of `get_item`.
        #[test]
        fn prop_json_roundtrip(value in json_value(), key in "[a-z_]{1,16}") {
            let store = EncodedStore::new(
                Arc::new(MemoryStore::new()),
                Arc::new(XChaChaCipher::new(&[7u8; KEY_LEN])),
                "cache",
            );
            store.set_item(&key, &value).expect("json values serialize");
            prop_assert_eq!(store.get_item::<Value>(&key), Some(value));
        }
    }
}
