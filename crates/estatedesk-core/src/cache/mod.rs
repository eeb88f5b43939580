//! Local caching of domain collections.
//!
//! This module provides the `TtlCache` for storing and retrieving API
//! collections through the encrypted store. Entries carry the time they
//! were written and are discarded on read once past their TTL
//! (30 minutes by default, 5 for pending-task queues and counters).
//!
//! Cached collections include:
//! - Apartments, Tenants, Users
//! - Tasks, Pending tasks, Unreviewed count
//! - Keys and key history
//! - Interests and interests awaiting review

pub mod key;
pub mod manager;

pub use key::{CacheKey, DEFAULT_TTL_MINUTES, VOLATILE_TTL_MINUTES};
pub use manager::{CacheAge, CacheEntry, CacheSettings, FetchOptions, TtlCache, CACHE_NAMESPACE};
