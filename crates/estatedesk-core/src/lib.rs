//! estatedesk core - the client-side persistence and session layer of the
//! estatedesk back office.
//!
//! - `storage`: key-value primitive (memory or file backed) and the
//!   namespaced, encrypted `EncodedStore` on top of it
//! - `crypto`: the swappable cipher and where its key comes from
//! - `cache`: TTL cache of API collections with read-through fetching
//! - `auth`: bearer token storage, migration and claims validation
//! - `session`: idle timeout with an advance warning
//! - `api`: REST client whose collection reads go through the cache
//!
//! `ClientCore` wires these together.

pub mod api;
pub mod auth;
pub mod cache;
pub mod client_core;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod session;
pub mod storage;

pub use api::{ApiClient, ApiError, CachedApi};
pub use auth::{SessionEndReason, TokenLifecycle, TokenValidation};
pub use cache::{CacheKey, FetchOptions, TtlCache};
pub use client_core::ClientCore;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::Config;
pub use error::{CoreError, CryptoError, Result, StorageError};
pub use session::{ActivityHub, ActivityKind, SessionMonitor, SessionPhase};
pub use storage::{EncodedStore, FileStore, KeyValueStore, MemoryStore, SharedStore};
