//! Client configuration management.
//!
//! This module handles loading and saving the client configuration: API
//! location, where the encrypted store lives, cache TTLs and the idle
//! timeout.
//!
//! Configuration is stored at `~/.config/estatedesk/config.json`. Any
//! field can be overridden with an `ESTATEDESK_*` environment variable.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::{CacheSettings, DEFAULT_TTL_MINUTES, VOLATILE_TTL_MINUTES};
use crate::crypto::KeySource;
use crate::session::monitor::{DEFAULT_TIMEOUT_MINUTES, DEFAULT_WARNING_LEAD_MINUTES};
use crate::session::MonitorSettings;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "estatedesk";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Subdirectory of the cache dir holding the key-value store
const STORE_DIR: &str = "store";

/// Prefix for environment overrides
const ENV_PREFIX: &str = "ESTATEDESK_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub storage_dir: Option<PathBuf>,
    pub default_ttl_minutes: i64,
    pub volatile_ttl_minutes: i64,
    pub session_timeout_minutes: i64,
    pub warning_lead_minutes: i64,
    pub check_interval_secs: u64,
    pub key_source: KeySource,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: None,
            storage_dir: None,
            default_ttl_minutes: DEFAULT_TTL_MINUTES,
            volatile_ttl_minutes: VOLATILE_TTL_MINUTES,
            session_timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            warning_lead_minutes: DEFAULT_WARNING_LEAD_MINUTES,
            check_interval_secs: 1,
            key_source: KeySource::Environment,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn storage_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.storage_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join(STORE_DIR))
    }

    /// Apply `ESTATEDESK_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    /// Unparsable values are logged and ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |field: &str| lookup(&format!("{}{}", ENV_PREFIX, field));

        if let Some(url) = var("API_BASE_URL") {
            self.api_base_url = Some(url);
        }
        if let Some(dir) = var("STORAGE_DIR") {
            self.storage_dir = Some(PathBuf::from(dir));
        }
        override_number(&mut self.default_ttl_minutes, "DEFAULT_TTL_MINUTES", var("DEFAULT_TTL_MINUTES"));
        override_number(&mut self.volatile_ttl_minutes, "VOLATILE_TTL_MINUTES", var("VOLATILE_TTL_MINUTES"));
        override_number(
            &mut self.session_timeout_minutes,
            "SESSION_TIMEOUT_MINUTES",
            var("SESSION_TIMEOUT_MINUTES"),
        );
        override_number(&mut self.warning_lead_minutes, "WARNING_LEAD_MINUTES", var("WARNING_LEAD_MINUTES"));
        override_number(&mut self.check_interval_secs, "CHECK_INTERVAL_SECS", var("CHECK_INTERVAL_SECS"));

        if let Some(source) = var("KEY_SOURCE") {
            match source.as_str() {
                "environment" => self.key_source = KeySource::Environment,
                "keyring" => self.key_source = KeySource::Keyring,
                other => warn!(value = other, "Unknown ESTATEDESK_KEY_SOURCE, ignoring"),
            }
        }
        self
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            default_ttl: minutes_or_default("default_ttl_minutes", self.default_ttl_minutes, DEFAULT_TTL_MINUTES),
            volatile_ttl: minutes_or_default("volatile_ttl_minutes", self.volatile_ttl_minutes, VOLATILE_TTL_MINUTES),
        }
    }

    /// The warning lead is clamped so it never exceeds the timeout itself.
    pub fn monitor_settings(&self) -> MonitorSettings {
        let timeout = minutes_or_default(
            "session_timeout_minutes",
            self.session_timeout_minutes.max(1),
            DEFAULT_TIMEOUT_MINUTES,
        );
        let warning_lead = minutes_or_default(
            "warning_lead_minutes",
            self.warning_lead_minutes.max(0),
            DEFAULT_WARNING_LEAD_MINUTES,
        )
        .min(timeout);
        MonitorSettings {
            timeout,
            warning_lead,
            check_interval: std::time::Duration::from_secs(self.check_interval_secs.max(1)),
        }
    }
}

/// `Duration::minutes` panics past roughly 1.5e11 minutes.
fn minutes_or_default(field: &str, minutes: i64, default: i64) -> Duration {
    Duration::try_minutes(minutes).unwrap_or_else(|| {
        warn!(field, minutes, default, "Duration out of range, using default");
        Duration::minutes(default)
    })
}

fn override_number<T: std::str::FromStr>(target: &mut T, field: &str, value: Option<String>) {
    let Some(value) = value else {
        return;
    };
    match value.trim().parse() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!(field, value = %value, "Ignoring unparsable override"),
    }
}
