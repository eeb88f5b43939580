use std::collections::{BTreeSet, HashMap};
use std::fmt::Display;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::error::Result;
use crate::storage::EncodedStore;

use super::key::{CacheKey, DEFAULT_TTL_MINUTES, VOLATILE_TTL_MINUTES};

/// Namespace for cache entries in the backing store
pub const CACHE_NAMESPACE: &str = "cache";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl CacheEntry {
    pub fn new(data: Value, timestamp: DateTime<Utc>) -> Self {
        Self { timestamp, data }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.timestamp
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) <= max_age
    }

    pub fn age_display(&self, now: DateTime<Utc>) -> String {
        let minutes = self.age(now).num_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

/// Freshness windows applied when a read does not pass its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub default_ttl: Duration,
    pub volatile_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl: Duration::minutes(DEFAULT_TTL_MINUTES),
            volatile_ttl: Duration::minutes(VOLATILE_TTL_MINUTES),
        }
    }
}

/// Per-call read-through options.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    /// Skip the cache lookup and go to the fetcher. The result is still
    /// written through.
    pub bypass_cache: bool,
    /// Overrides the key's default TTL.
    pub max_age: Option<Duration>,
}

impl FetchOptions {
    pub fn bypass() -> Self {
        Self {
            bypass_cache: true,
            max_age: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheAge {
    pub key: CacheKey,
    pub age: String,
    pub stale: bool,
}

/// TTL cache over an `EncodedStore`.
///
/// Entries are stamped on write and checked on read; an entry past its
/// TTL is deleted the first time it is read. When the backing store
/// refuses a write (quota, disabled storage) the entry is kept in memory
/// for the lifetime of this object instead.
pub struct TtlCache {
    store: EncodedStore,
    clock: SharedClock,
    settings: CacheSettings,
    overflow: Mutex<HashMap<String, CacheEntry>>,
}

impl TtlCache {
    pub fn new(store: EncodedStore, clock: SharedClock, settings: CacheSettings) -> Self {
        Self {
            store,
            clock,
            settings,
            overflow: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> CacheSettings {
        self.settings
    }

    /// TTL used when the caller does not pass one.
    pub fn ttl_for(&self, key: &CacheKey) -> Duration {
        if key.is_volatile() {
            self.settings.volatile_ttl
        } else {
            self.settings.default_ttl
        }
    }

    /// Cached data for `key` if it is no older than `max_age`.
    pub fn read(&self, key: &CacheKey, max_age: Duration) -> Option<Value> {
        let entry = self.peek(key)?;
        let now = self.clock.now();
        if entry.is_fresh(now, max_age) {
            debug!(cache = %key, age_ms = entry.age(now).num_milliseconds(), "Cache hit");
            Some(entry.data)
        } else {
            debug!(cache = %key, "Cache entry expired, purging");
            self.invalidate(key);
            None
        }
    }

    pub fn read_default(&self, key: &CacheKey) -> Option<Value> {
        self.read(key, self.ttl_for(key))
    }

    /// Typed read. A fresh entry of the wrong shape reads as a miss.
    pub fn read_as<T: DeserializeOwned>(&self, key: &CacheKey, max_age: Duration) -> Option<T> {
        let data = self.read(key, max_age)?;
        match serde_json::from_value(data) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(cache = %key, error = %e, "Cached data has unexpected shape");
                None
            }
        }
    }

    /// Stamp `data` with the current time and replace whatever was cached.
    ///
    /// Only fails when `data` cannot be represented as JSON.
    pub fn write<T: Serialize + ?Sized>(&self, key: &CacheKey, data: &T) -> Result<()> {
        let entry = CacheEntry::new(serde_json::to_value(data)?, self.clock.now());
        let name = key.as_str();

        match self.store.set_item(name, &entry) {
            Ok(()) => {
                self.lock_overflow().remove(name);
            }
            Err(e) => {
                warn!(cache = %key, error = %e, "Cache write not persisted, keeping in memory");
                // Never leave an older persisted copy shadowing this one
                self.store.remove_item(name);
                self.lock_overflow().insert(name.to_string(), entry);
            }
        }
        Ok(())
    }

    pub fn invalidate(&self, key: &CacheKey) {
        let name = key.as_str();
        self.store.remove_item(name);
        self.lock_overflow().remove(name);
    }

    /// Drop every cached collection, built-in or custom.
    pub fn invalidate_all(&self) {
        let removed = self.store.clear();
        let mut overflow = self.lock_overflow();
        let in_memory = overflow.len();
        overflow.clear();
        debug!(removed, in_memory, "Invalidated all cache entries");
    }

    /// Keys that currently hold an entry, fresh or not.
    pub fn cache_keys(&self) -> Vec<CacheKey> {
        let mut names: BTreeSet<String> = self.store.keys().into_iter().collect();
        names.extend(self.lock_overflow().keys().cloned());
        names.iter().map(|n| CacheKey::from_name(n)).collect()
    }

    /// Read-through: serve a fresh cached value, otherwise call `fetch`
    /// and write its result through.
    ///
    /// If `fetch` fails and a still-valid entry exists (possible when the
    /// cache was bypassed), that entry is returned instead of the error.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        options: FetchOptions,
        fetch: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let max_age = options.max_age.unwrap_or_else(|| self.ttl_for(key));

        if !options.bypass_cache {
            if let Some(hit) = self.read_as::<T>(key, max_age) {
                return Ok(hit);
            }
        }

        match fetch().await {
            Ok(value) => {
                if let Err(e) = self.write(key, &value) {
                    warn!(cache = %key, error = %e, "Fetched value could not be cached");
                }
                Ok(value)
            }
            Err(e) => match self.read_as::<T>(key, max_age) {
                Some(cached) => {
                    warn!(cache = %key, error = %e, "Fetch failed, serving cached data");
                    Ok(cached)
                }
                None => Err(e),
            },
        }
    }

    /// Age of every cached collection, for status displays.
    pub fn cache_ages(&self) -> Vec<CacheAge> {
        let now = self.clock.now();
        self.cache_keys()
            .into_iter()
            .filter_map(|key| {
                let entry = self.peek(&key)?;
                let stale = !entry.is_fresh(now, self.ttl_for(&key));
                Some(CacheAge {
                    age: entry.age_display(now),
                    stale,
                    key,
                })
            })
            .collect()
    }

    /// True if any of `keys` is missing or past its default TTL.
    pub fn any_stale(&self, keys: &[CacheKey]) -> bool {
        let now = self.clock.now();
        keys.iter().any(|key| match self.peek(key) {
            Some(entry) => !entry.is_fresh(now, self.ttl_for(key)),
            None => true,
        })
    }

    /// Entry without the freshness check.
    fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        let name = key.as_str();
        self.store
            .get_item::<CacheEntry>(name)
            .or_else(|| self.lock_overflow().get(name).cloned())
    }

    fn lock_overflow(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.overflow.lock().unwrap_or_else(|e| e.into_inner())
    }
}
