//! Runtime settings for the offline engine.
//!
//! Settings come from a JSON file (all fields optional), then environment
//! overrides (`TELECARE_*`), and are normalized and validated before use.
//! The API token is the only secret and is redacted from `Debug` output.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sync::{BackoffPolicy, DispatcherConfig};
use crate::util::{is_http_url, normalize_text_option};
use crate::{Error, Result};

pub const ENV_DB_PATH: &str = "TELECARE_DB_PATH";
pub const ENV_API_BASE_URL: &str = "TELECARE_API_BASE_URL";
pub const ENV_API_TOKEN: &str = "TELECARE_API_TOKEN";
pub const ENV_RETRY_CEILING: &str = "TELECARE_RETRY_CEILING";
pub const ENV_BATCH_SIZE: &str = "TELECARE_BATCH_SIZE";
pub const ENV_SYNC_INTERVAL_SECS: &str = "TELECARE_SYNC_INTERVAL_SECS";
pub const ENV_POLL_INTERVAL_SECS: &str = "TELECARE_POLL_INTERVAL_SECS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "TELECARE_REQUEST_TIMEOUT_SECS";
pub const ENV_GEOLOCATION_TIMEOUT_MS: &str = "TELECARE_GEOLOCATION_TIMEOUT_MS";
pub const ENV_DRAIN_ON_WRITE: &str = "TELECARE_DRAIN_ON_WRITE";

/// Engine configuration.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Local database file; `None` keeps everything in memory.
    pub db_path: Option<PathBuf>,
    /// Remote service root, e.g. `https://api.example.org`.
    pub api_base_url: Option<String>,
    pub api_token: Option<String>,
    /// Path probed by the connectivity poller, relative to `api_base_url`.
    pub health_path: String,
    pub retry_ceiling: u32,
    pub batch_size: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub emergency_backoff_max_ms: u64,
    pub sync_interval_secs: u64,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub geolocation_timeout_ms: u64,
    /// Start a background drain after each write while online.
    pub drain_on_write: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            db_path: None,
            api_base_url: None,
            api_token: None,
            health_path: "/health".to_string(),
            retry_ceiling: 3,
            batch_size: 25,
            backoff_base_ms: 2_000,
            backoff_max_ms: 5 * 60 * 1_000,
            emergency_backoff_max_ms: 30_000,
            sync_interval_secs: 30,
            poll_interval_secs: 5,
            request_timeout_secs: 10,
            geolocation_timeout_ms: 5_000,
            drain_on_write: true,
        }
    }
}

impl std::fmt::Debug for SyncSettings {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncSettings")
            .field("db_path", &self.db_path)
            .field("api_base_url", &self.api_base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("health_path", &self.health_path)
            .field("retry_ceiling", &self.retry_ceiling)
            .field("batch_size", &self.batch_size)
            .field("backoff_base_ms", &self.backoff_base_ms)
            .field("backoff_max_ms", &self.backoff_max_ms)
            .field("emergency_backoff_max_ms", &self.emergency_backoff_max_ms)
            .field("sync_interval_secs", &self.sync_interval_secs)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("geolocation_timeout_ms", &self.geolocation_timeout_ms)
            .field("drain_on_write", &self.drain_on_write)
            .finish()
    }
}

impl SyncSettings {
    /// Parse, normalize and validate a JSON settings document.
    pub fn from_json(payload: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid settings JSON: {error}")))?;
        settings.finish()
    }

    /// Read settings from a JSON file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let payload = std::fs::read_to_string(path).map_err(|error| {
            Error::Config(format!("failed to read settings {}: {error}", path.display()))
        })?;
        Self::from_json(&payload)
    }

    /// Apply `TELECARE_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in practice).
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let value = |key: &str| normalize_text_option(lookup(key));

        if let Some(path) = value(ENV_DB_PATH) {
            self.db_path = Some(PathBuf::from(path));
        }
        if let Some(url) = value(ENV_API_BASE_URL) {
            self.api_base_url = Some(url);
        }
        if let Some(token) = value(ENV_API_TOKEN) {
            self.api_token = Some(token);
        }
        if let Some(raw) = value(ENV_RETRY_CEILING) {
            self.retry_ceiling = parse_number(ENV_RETRY_CEILING, &raw)?;
        }
        if let Some(raw) = value(ENV_BATCH_SIZE) {
            self.batch_size = parse_number(ENV_BATCH_SIZE, &raw)?;
        }
        if let Some(raw) = value(ENV_SYNC_INTERVAL_SECS) {
            self.sync_interval_secs = parse_number(ENV_SYNC_INTERVAL_SECS, &raw)?;
        }
        if let Some(raw) = value(ENV_POLL_INTERVAL_SECS) {
            self.poll_interval_secs = parse_number(ENV_POLL_INTERVAL_SECS, &raw)?;
        }
        if let Some(raw) = value(ENV_REQUEST_TIMEOUT_SECS) {
            self.request_timeout_secs = parse_number(ENV_REQUEST_TIMEOUT_SECS, &raw)?;
        }
        if let Some(raw) = value(ENV_GEOLOCATION_TIMEOUT_MS) {
            self.geolocation_timeout_ms = parse_number(ENV_GEOLOCATION_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = value(ENV_DRAIN_ON_WRITE) {
            self.drain_on_write = parse_flag(ENV_DRAIN_ON_WRITE, &raw)?;
        }

        self.finish()
    }

    fn finish(self) -> Result<Self> {
        let settings = self.normalized();
        settings.validate()?;
        Ok(settings)
    }

    fn normalized(mut self) -> Self {
        self.api_base_url = normalize_text_option(self.api_base_url)
            .map(|url| url.trim_end_matches('/').to_string());
        self.api_token = normalize_text_option(self.api_token);
        let health_path = self.health_path.trim();
        self.health_path = if health_path.starts_with('/') {
            health_path.to_string()
        } else {
            format!("/{health_path}")
        };
        self
    }

    /// Check ranges and URL shape.
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.api_base_url {
            if !is_http_url(url) {
                return Err(Error::Config(
                    "api_base_url must include http:// or https://".to_string(),
                ));
            }
        }
        if self.retry_ceiling == 0 {
            return Err(Error::Config("retry_ceiling must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.backoff_base_ms == 0 {
            return Err(Error::Config("backoff_base_ms must be positive".to_string()));
        }
        if self.backoff_max_ms < self.backoff_base_ms
            || self.emergency_backoff_max_ms < self.backoff_base_ms
        {
            return Err(Error::Config(
                "backoff caps must not be below backoff_base_ms".to_string(),
            ));
        }
        for (name, value) in [
            ("sync_interval_secs", self.sync_interval_secs),
            ("poll_interval_secs", self.poll_interval_secs),
            ("request_timeout_secs", self.request_timeout_secs),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    pub const fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            retry_ceiling: self.retry_ceiling,
            batch_size: self.batch_size,
            backoff: BackoffPolicy {
                base: Duration::from_millis(self.backoff_base_ms),
                max: Duration::from_millis(self.backoff_max_ms),
                emergency_max: Duration::from_millis(self.emergency_backoff_max_ms),
            },
        }
    }

    pub fn health_url(&self) -> Option<String> {
        self.api_base_url
            .as_ref()
            .map(|base| format!("{base}{}", self.health_path))
    }

    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn geolocation_timeout(&self) -> Duration {
        Duration::from_millis(self.geolocation_timeout_ms)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::Config(format!("{key} must be a non-negative integer, got '{raw}'")))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{key} must be true or false, got '{raw}'"))),
    }
}
