use std::sync::OnceLock;

use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use keyring::Entry;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CryptoError;

/// Key length in bytes (256-bit)
pub const KEY_LEN: usize = 32;

/// Application id mixed into the derived key and used as keychain service
const APP_ID: &str = "estatedesk";

/// Fixed salt for the environment-derived key
const ENV_KEY_SALT: &[u8] = b"estatedesk.store.v1";

/// Keychain account holding the random storage key
const KEYRING_ACCOUNT: &str = "storage-key";

/// Derived once per process.
static ENVIRONMENT_KEY: OnceLock<[u8; KEY_LEN]> = OnceLock::new();

/// Where the storage key comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// Derived from user/host/platform identifiers. Stable across runs on
    /// the same machine, but not secret.
    #[default]
    Environment,
    /// Random key kept in the OS keychain, created on first use.
    Keyring,
    /// Caller-supplied key.
    #[serde(skip)]
    Fixed([u8; KEY_LEN]),
}

impl KeySource {
    pub fn resolve(&self) -> Result<[u8; KEY_LEN], CryptoError> {
        match self {
            KeySource::Environment => environment_key(),
            KeySource::Keyring => keyring_key(APP_ID, KEYRING_ACCOUNT),
            KeySource::Fixed(key) => Ok(*key),
        }
    }
}

fn environment_key() -> Result<[u8; KEY_LEN], CryptoError> {
    if let Some(key) = ENVIRONMENT_KEY.get() {
        return Ok(*key);
    }

    let key = derive_key(&environment_fingerprint())?;
    debug!("Derived environment storage key");
    Ok(*ENVIRONMENT_KEY.get_or_init(|| key))
}

/// Identifying signals of the current user and machine.
fn environment_fingerprint() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_default();
    let home = dirs::home_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    [
        APP_ID,
        &user,
        &host,
        &home,
        std::env::consts::OS,
        std::env::consts::ARCH,
    ]
    .join("|")
}

fn derive_key(material: &str) -> Result<[u8; KEY_LEN], CryptoError> {
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(material.as_bytes(), ENV_KEY_SALT, &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

fn keyring_key(service: &str, account: &str) -> Result<[u8; KEY_LEN], CryptoError> {
    let entry = Entry::new(service, account).map_err(|e| CryptoError::Keychain(e.to_string()))?;

    match entry.get_password() {
        Ok(encoded) => decode_key(&encoded),
        Err(keyring::Error::NoEntry) => {
            let mut key = [0u8; KEY_LEN];
            rand::thread_rng().fill(&mut key);
            entry
                .set_password(&STANDARD.encode(key))
                .map_err(|e| CryptoError::Keychain(e.to_string()))?;
            info!(service, "Created storage key in keychain");
            Ok(key)
        }
        Err(e) => Err(CryptoError::Keychain(e.to_string())),
    }
}

fn decode_key(encoded: &str) -> Result<[u8; KEY_LEN], CryptoError> {
    let raw = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CryptoError::Keychain(format!("stored key is not base64: {}", e)))?;
    raw.try_into().map_err(|raw: Vec<u8>| {
        CryptoError::Keychain(format!(
            "stored key has {} bytes, expected {}",
            raw.len(),
            KEY_LEN
        ))
    })
}
