//! The client core: one explicitly constructed object that owns the
//! store, cache, token lifecycle and session monitor.
//!
//! Nothing here is global. Build a `ClientCore` with `from_config` (or
//! `new` with injected parts), call `init`, and call `dispose` when done.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::api::{ApiClient, ApiError, CachedApi};
use crate::auth::{SessionEndReason, TokenLifecycle, AUTH_NAMESPACE};
use crate::cache::{CacheSettings, TtlCache, CACHE_NAMESPACE};
use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::crypto::{Cipher, XChaChaCipher};
use crate::session::{ActivityHub, MonitorSettings, SessionMonitor};
use crate::storage::{EncodedStore, FileStore, SharedStore};

pub struct ClientCore {
    store: SharedStore,
    cache: Arc<TtlCache>,
    tokens: Arc<TokenLifecycle>,
    hub: Arc<ActivityHub>,
    monitor: Arc<SessionMonitor>,
    api: Option<CachedApi>,
    locations: Arc<Locations>,
}

/// Where the user is, and where they were when the session timed out.
#[derive(Default)]
struct Locations {
    current: Mutex<Option<String>>,
    before_expiry: Mutex<Option<String>>,
}

impl Locations {
    fn current(&self) -> MutexGuard<'_, Option<String>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn before_expiry(&self) -> MutexGuard<'_, Option<String>> {
        self.before_expiry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ClientCore {
    /// Wire the core from injected parts.
    pub fn new(
        store: SharedStore,
        cipher: Arc<dyn Cipher>,
        clock: SharedClock,
        cache_settings: CacheSettings,
        monitor_settings: MonitorSettings,
    ) -> Self {
        let cache = Arc::new(TtlCache::new(
            EncodedStore::new(store.clone(), cipher.clone(), CACHE_NAMESPACE),
            clock.clone(),
            cache_settings,
        ));
        let tokens = Arc::new(TokenLifecycle::new(
            EncodedStore::new(store.clone(), cipher, AUTH_NAMESPACE),
            clock.clone(),
        ));
        let hub = Arc::new(ActivityHub::new());
        let monitor = Arc::new(SessionMonitor::new(
            monitor_settings,
            clock,
            hub.clone(),
            tokens.clone(),
        ));
        let locations = Arc::new(Locations::default());

        {
            let cache = cache.clone();
            let locations = locations.clone();
            let monitor: Weak<SessionMonitor> = Arc::downgrade(&monitor);
            tokens.on_session_end(move |reason| {
                cache.invalidate_all();
                match reason {
                    SessionEndReason::IdleTimeout => {
                        let here = locations.current().clone();
                        if let Some(ref location) = here {
                            debug!(location = %location, "Remembering location for next login");
                        }
                        *locations.before_expiry() = here;
                    }
                    // A rejected token ends tracking too; the monitor only
                    // tears itself down on idle expiry.
                    SessionEndReason::Unauthorized => {
                        if let Some(monitor) = monitor.upgrade() {
                            monitor.cleanup();
                        }
                    }
                    SessionEndReason::Logout => {}
                }
            });
        }

        Self {
            store,
            cache,
            tokens,
            hub,
            monitor,
            api: None,
            locations,
        }
    }

    /// Build the production core: file store, configured key source,
    /// system clock, and an API client when a base URL is configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let dir = config.storage_dir()?;
        let store: SharedStore = Arc::new(
            FileStore::new(dir.clone())
                .with_context(|| format!("Failed to open store at {}", dir.display()))?,
        );
        let key = config
            .key_source
            .resolve()
            .context("Failed to obtain storage key")?;
        let cipher: Arc<dyn Cipher> = Arc::new(XChaChaCipher::new(&key));

        let core = Self::new(
            store,
            cipher,
            Arc::new(SystemClock),
            config.cache_settings(),
            config.monitor_settings(),
        );
        match config.api_base_url {
            Some(ref url) => core
                .with_api(url)
                .with_context(|| format!("Failed to create API client for {}", url)),
            None => Ok(core),
        }
    }

    pub fn with_api(mut self, base_url: &str) -> std::result::Result<Self, ApiError> {
        let client = ApiClient::new(base_url, self.tokens.clone())?;
        self.api = Some(CachedApi::new(client, self.cache.clone()));
        Ok(self)
    }

    /// Load any stored token, migrating older layouts. Returns whether a
    /// session exists.
    pub fn init(&self) -> bool {
        let signed_in = self.tokens.get_token().is_some();
        info!(signed_in, "Client core initialized");
        signed_in
    }

    /// Store the token and profile for a new session.
    pub fn login<P: Serialize + ?Sized>(&self, token: &str, profile: &P) -> crate::error::Result<()> {
        let validation = self.tokens.validate(token);
        if !validation.valid {
            debug!(error = ?validation.error, "Storing token that does not validate locally");
        }
        self.tokens.set_token(token);
        self.tokens.set_user_profile(profile)?;
        info!(subject = ?self.tokens.current().and_then(|r| r.subject().map(str::to_string)), "Signed in");
        Ok(())
    }

    /// Stop idle tracking, then remove the token (which also purges the cache).
    pub fn logout(&self) {
        self.monitor.cleanup();
        self.tokens.remove_token();
    }

    /// Begin idle tracking for the current session.
    pub fn start_monitor(
        &self,
        on_warning: impl Fn(i64) + Send + Sync + 'static,
        on_expire: impl Fn() + Send + Sync + 'static,
    ) -> crate::error::Result<()> {
        self.monitor.init(on_warning, on_expire)
    }

    /// Record where the user currently is.
    pub fn set_location(&self, location: impl Into<String>) {
        *self.locations.current() = Some(location.into());
    }

    /// Location at the moment the last session timed out, if any.
    pub fn last_location(&self) -> Option<String> {
        self.locations.before_expiry().clone()
    }

    /// Consume the remembered location after a successful re-login.
    pub fn take_last_location(&self) -> Option<String> {
        self.locations.before_expiry().take()
    }

    /// Release timers and listeners. The stored session is kept.
    pub fn dispose(&self) {
        self.monitor.cleanup();
        debug!("Client core disposed");
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn cache(&self) -> &Arc<TtlCache> {
        &self.cache
    }

    pub fn tokens(&self) -> &Arc<TokenLifecycle> {
        &self.tokens
    }

    pub fn hub(&self) -> &Arc<ActivityHub> {
        &self.hub
    }

    pub fn monitor(&self) -> &SessionMonitor {
        &self.monitor
    }

    pub fn api(&self) -> Option<&CachedApi> {
        self.api.as_ref()
    }
}

impl Drop for ClientCore {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::encode_unsigned;
    use crate::cache::CacheKey;
    use crate::clock::{Clock, ManualClock};
    use crate::crypto::KEY_LEN;
    use crate::error::CoreError;
    use crate::session::{ActivityKind, SessionPhase};
    use crate::storage::{KeyValueStore, MemoryStore};
    use chrono::Duration;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn core_with_clock() -> (ClientCore, Arc<ManualClock>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let core = ClientCore::new(
            store.clone(),
            Arc::new(XChaChaCipher::new(&[4u8; KEY_LEN])),
            clock.clone(),
            CacheSettings::default(),
            MonitorSettings::default(),
        );
        (core, clock, store)
    }

    fn token_for(clock: &ManualClock, sub: &str) -> String {
        let exp = (clock.now() + Duration::hours(8)).timestamp();
        encode_unsigned(&json!({ "sub": sub, "exp": exp, "roles": ["ROLE_AGENT"] }))
    }

    #[test]
    fn test_login_stores_token_and_profile() {
        let (core, clock, _) = core_with_clock();
        assert!(!core.init());

        let token = token_for(&clock, "agent-7");
        core.login(&token, &json!({"name": "Ada"})).unwrap();

        assert!(core.init());
        assert!(core.tokens().is_authenticated());
        assert_eq!(
            core.tokens().user_profile::<serde_json::Value>(),
            Some(json!({"name": "Ada"}))
        );
    }

    #[test]
    fn test_logout_purges_cache_and_token() {
        let (core, clock, store) = core_with_clock();
        core.login(&token_for(&clock, "agent-7"), &json!({})).unwrap();
        core.cache().write(&CacheKey::Apartments, &json!([1, 2])).unwrap();

        core.logout();

        assert!(core.tokens().get_token().is_none());
        assert!(core.cache().cache_keys().is_empty());
        assert!(store.keys().is_empty());
        // Logout is not a timeout
        assert_eq!(core.last_location(), None);
    }

    #[test]
    fn test_start_monitor_requires_session() {
        let (core, _, _) = core_with_clock();
        assert!(matches!(
            core.start_monitor(|_| {}, || {}),
            Err(CoreError::NoSession)
        ));
    }

    #[test]
    fn test_idle_expiry_remembers_location() {
        let (core, clock, _) = core_with_clock();
        core.login(&token_for(&clock, "agent-7"), &json!({})).unwrap();
        core.cache().write(&CacheKey::Tenants, &json!([])).unwrap();
        core.set_location("/apartments/12");

        let expired = Arc::new(AtomicUsize::new(0));
        let counter = expired.clone();
        core.start_monitor(|_| {}, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        clock.advance(Duration::minutes(30));
        assert_eq!(core.monitor().check(), Some(SessionPhase::Expired));

        assert_eq!(expired.load(Ordering::SeqCst), 1);
        assert!(core.tokens().get_token().is_none());
        assert!(core.cache().cache_keys().is_empty());
        assert_eq!(core.last_location().as_deref(), Some("/apartments/12"));
        assert_eq!(core.take_last_location().as_deref(), Some("/apartments/12"));
        assert_eq!(core.last_location(), None);
    }

    #[test]
    fn test_unauthorized_stops_monitor() {
        let (core, clock, _) = core_with_clock();
        core.login(&token_for(&clock, "agent-7"), &json!({})).unwrap();
        core.start_monitor(|_| {}, || {}).unwrap();
        assert!(core.hub().listener_count() > 0);

        core.tokens().handle_unauthorized();

        assert_eq!(core.monitor().phase(), None);
        assert_eq!(core.hub().listener_count(), 0);
    }

    #[test]
    fn test_dispose_keeps_session() {
        let (core, clock, _) = core_with_clock();
        core.login(&token_for(&clock, "agent-7"), &json!({})).unwrap();
        core.start_monitor(|_| {}, || {}).unwrap();

        core.dispose();
        core.dispose();

        assert_eq!(core.hub().listener_count(), 0);
        assert!(core.tokens().get_token().is_some());
        // Activity after dispose is ignored
        core.hub().emit(ActivityKind::Keyboard);
        assert_eq!(core.monitor().phase(), None);
    }
}
