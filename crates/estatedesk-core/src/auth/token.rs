use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, info, warn};

use crate::clock::SharedClock;
use crate::error::{CoreError, Result};
use crate::storage::EncodedStore;

use super::claims::{self, TokenClaims, TokenValidation};

/// Namespace for encrypted auth values
pub const AUTH_NAMESPACE: &str = "secure";

/// Canonical encrypted token slot
pub const CANONICAL_TOKEN_KEY: &str = "auth_token";

/// Name older releases used, both encrypted and in plain text
pub const LEGACY_TOKEN_KEY: &str = "token";

/// Plain-text slot written when encryption is unavailable
pub const FALLBACK_TOKEN_KEY: &str = "fallback_token";

/// Encrypted slot for the signed-in user's profile
pub const PROFILE_KEY: &str = "user_profile";

/// One place a token may be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLocation {
    pub storage_key: &'static str,
    pub encrypted: bool,
}

/// Token locations in lookup order. The first is canonical.
pub const TOKEN_LOCATIONS: [TokenLocation; 4] = [
    TokenLocation {
        storage_key: CANONICAL_TOKEN_KEY,
        encrypted: true,
    },
    TokenLocation {
        storage_key: LEGACY_TOKEN_KEY,
        encrypted: true,
    },
    TokenLocation {
        storage_key: LEGACY_TOKEN_KEY,
        encrypted: false,
    },
    TokenLocation {
        storage_key: FALLBACK_TOKEN_KEY,
        encrypted: false,
    },
];

const CANONICAL: TokenLocation = TOKEN_LOCATIONS[0];
const LEGACY_ENCRYPTED: TokenLocation = TOKEN_LOCATIONS[1];
const FALLBACK: TokenLocation = TOKEN_LOCATIONS[3];

impl TokenLocation {
    pub fn is_canonical(&self) -> bool {
        *self == CANONICAL
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEndReason {
    Logout,
    IdleTimeout,
    Unauthorized,
}

impl fmt::Display for SessionEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionEndReason::Logout => "logout",
            SessionEndReason::IdleTimeout => "idle timeout",
            SessionEndReason::Unauthorized => "unauthorized",
        })
    }
}

pub type SessionEndHook = Arc<dyn Fn(SessionEndReason) + Send + Sync>;

/// The current bearer token and whatever could be decoded from it.
#[derive(Clone, PartialEq)]
pub struct TokenRecord {
    pub token: String,
    pub claims: Option<TokenClaims>,
}

impl TokenRecord {
    pub fn new(token: String) -> Self {
        let claims = claims::decode_claims(&token).ok();
        Self { token, claims }
    }

    pub fn subject(&self) -> Option<&str> {
        self.claims.as_ref()?.sub.as_deref()
    }

    pub fn roles(&self) -> &[String] {
        self.claims.as_ref().map(|c| c.roles.as_slice()).unwrap_or(&[])
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.claims.as_ref()?.expires_at()
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("token", &"<redacted>")
            .field("claims", &self.claims)
            .finish()
    }
}

/// Owns the bearer token: where it is stored, how older storage layouts
/// are migrated, and what happens when the session ends.
pub struct TokenLifecycle {
    secure: EncodedStore,
    clock: SharedClock,
    current: RwLock<Option<TokenRecord>>,
    on_session_end: RwLock<Vec<SessionEndHook>>,
}

impl TokenLifecycle {
    /// `secure` must be the auth namespace store; plain legacy slots are
    /// read from its backend directly.
    pub fn new(secure: EncodedStore, clock: SharedClock) -> Self {
        Self {
            secure,
            clock,
            current: RwLock::new(None),
            on_session_end: RwLock::new(Vec::new()),
        }
    }

    /// Register a callback run whenever the session ends, whatever the reason.
    pub fn on_session_end(&self, hook: impl Fn(SessionEndReason) + Send + Sync + 'static) {
        self.on_session_end
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(hook));
    }

    /// Find the token, migrating it into the canonical slot if it was
    /// found anywhere else.
    pub fn get_token(&self) -> Option<String> {
        for location in TOKEN_LOCATIONS.iter() {
            let Some(token) = self.read_location(location) else {
                continue;
            };

            if !location.is_canonical() {
                self.migrate(location, &token);
            }
            self.remember(Some(TokenRecord::new(token.clone())));
            return Some(token);
        }

        debug!("No token in any location");
        self.secure.remove_item(PROFILE_KEY);
        self.remember(None);
        None
    }

    /// Store a new token. Never fails: if encryption is unavailable the
    /// token goes to the plain fallback slot instead.
    pub fn set_token(&self, token: &str) {
        match self.write_location(&CANONICAL, token) {
            Ok(()) => {
                if let Err(e) = self.write_location(&LEGACY_ENCRYPTED, token) {
                    warn!(error = %e, "Failed to mirror token into legacy slot");
                }
                // A stale plain copy must not outlive the encrypted one
                for location in TOKEN_LOCATIONS.iter().filter(|l| !l.encrypted) {
                    self.remove_location(location);
                }
            }
            Err(e) => {
                warn!(error = %e, "Token encryption failed, storing unencrypted fallback");
                if let Err(e) = self.write_location(&FALLBACK, token) {
                    error!(error = %e, "Failed to store token in any location");
                }
            }
        }
        self.remember(Some(TokenRecord::new(token.to_string())));
    }

    /// Delete the token everywhere and run the session-end hooks.
    pub fn remove_token(&self) {
        self.end_session(SessionEndReason::Logout);
    }

    /// The server rejected the token: same teardown as a logout.
    pub fn handle_unauthorized(&self) {
        self.end_session(SessionEndReason::Unauthorized);
    }

    /// Single teardown path for logout, idle timeout and rejected tokens.
    pub fn end_session(&self, reason: SessionEndReason) {
        for location in TOKEN_LOCATIONS.iter() {
            self.remove_location(location);
        }
        self.secure.remove_item(PROFILE_KEY);
        self.remember(None);
        info!(%reason, "Session ended");

        // Clone out so hooks may call back into this object
        let hooks: Vec<SessionEndHook> = self
            .on_session_end
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for hook in hooks {
            hook(reason);
        }
    }

    /// Inspect a token's claims as of now. No side effects.
    pub fn validate(&self, token: &str) -> TokenValidation {
        claims::validate_at(token, self.clock.now())
    }

    /// Whether a stored token exists and has not expired.
    pub fn is_authenticated(&self) -> bool {
        self.get_token()
            .map(|token| self.validate(&token).valid)
            .unwrap_or(false)
    }

    /// True when the current token expires within `window` (or already has).
    pub fn expires_within(&self, window: Duration) -> bool {
        match self.current().and_then(|r| r.expires_at()) {
            Some(at) => at - self.clock.now() <= window,
            None => false,
        }
    }

    /// Last token seen by this lifecycle.
    pub fn current(&self) -> Option<TokenRecord> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_user_profile<T: Serialize + ?Sized>(&self, profile: &T) -> Result<()> {
        if self.current().is_none() && self.get_token().is_none() {
            return Err(CoreError::NoSession);
        }
        self.secure.set_item(PROFILE_KEY, profile)
    }

    pub fn user_profile<T: DeserializeOwned>(&self) -> Option<T> {
        self.secure.get_item(PROFILE_KEY)
    }

    fn read_location(&self, location: &TokenLocation) -> Option<String> {
        let value = match location.encrypted {
            true => self.secure.get_item::<String>(location.storage_key)?,
            false => self.secure.backend().get(location.storage_key)?,
        };
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    }

    fn write_location(&self, location: &TokenLocation, token: &str) -> Result<()> {
        if location.encrypted {
            self.secure.set_item(location.storage_key, token)
        } else {
            self.secure.backend().set(location.storage_key, token)?;
            Ok(())
        }
    }

    fn remove_location(&self, location: &TokenLocation) {
        if location.encrypted {
            self.secure.remove_item(location.storage_key);
        } else {
            self.secure.backend().remove(location.storage_key);
        }
    }

    fn migrate(&self, from: &TokenLocation, token: &str) {
        match self.write_location(&CANONICAL, token) {
            Ok(()) => {
                info!(
                    from = from.storage_key,
                    encrypted = from.encrypted,
                    "Migrated token to canonical slot"
                );
                if !from.encrypted {
                    self.remove_location(from);
                }
            }
            Err(e) => warn!(from = from.storage_key, error = %e, "Token migration failed"),
        }
    }

    fn remember(&self, record: Option<TokenRecord>) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = record;
    }
}
