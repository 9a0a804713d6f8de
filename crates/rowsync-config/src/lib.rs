//! Configuration for rowsync.
//!
//! A TOML file in the platform config directory, overridden by
//! `ROWSYNC_`-prefixed environment variables, translated into
//! `rowsync_core::SyncConfig` and `rowsync_api::RealtimeConfig`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rowsync_api::RealtimeConfig;
use rowsync_core::{BackoffConfig, EntityKind, OrderingPolicy, SyncConfig};

const KEYRING_SERVICE: &str = "rowsync";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no realtime URL configured")]
    MissingUrl,

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub realtime: RealtimeSettings,

    #[serde(default)]
    pub reconnect: BackoffSettings,

    #[serde(default)]
    pub snapshot: SnapshotSettings,

    /// Per-kind ordering, e.g. `invoice = "field:due_date:desc"`.
    #[serde(default)]
    pub ordering: HashMap<EntityKind, OrderingPolicy>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RealtimeSettings {
    /// WebSocket endpoint (e.g., "wss://db.example.com/realtime/v1").
    pub url: Option<String>,

    /// API key (plaintext: prefer keyring or env var).
    pub api_key: Option<String>,

    /// Environment variable name containing the API key.
    pub api_key_env: Option<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Broadcast capacity per connection.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            api_key_env: None,
            connect_timeout_secs: default_connect_timeout(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BackoffSettings {
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,

    #[serde(default = "default_max_secs")]
    pub max_secs: u64,

    /// Subscribed periods at least this long reset the backoff.
    #[serde(default = "default_stability_secs")]
    pub stability_secs: u64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_ms: default_initial_ms(),
            max_secs: default_max_secs(),
            stability_secs: default_stability_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SnapshotSettings {
    #[serde(default = "default_snapshot_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,

    #[serde(default = "default_max_secs")]
    pub retry_max_secs: u64,

    /// Events held per scope while a snapshot is in flight.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_snapshot_timeout(),
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_secs: default_max_secs(),
            buffer_capacity: default_buffer_capacity(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    10
}
fn default_channel_capacity() -> usize {
    1024
}
fn default_initial_ms() -> u64 {
    1000
}
fn default_max_secs() -> u64 {
    30
}
fn default_stability_secs() -> u64 {
    10
}
fn default_snapshot_timeout() -> u64 {
    15
}
fn default_retry_initial_ms() -> u64 {
    500
}
fn default_buffer_capacity() -> usize {
    10_000
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "rowsync", "rowsync").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("rowsync");
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Loading ─────────────────────────────────────────────────────────

/// Load settings from the canonical config file + environment.
pub fn load_settings() -> Result<Settings, ConfigError> {
    load_from_path(&config_path())
}

/// Load settings from `path` + environment. A missing file is not an error.
///
/// Environment keys nest on `__`, e.g. `ROWSYNC_REALTIME__URL`.
pub fn load_from_path(path: &Path) -> Result<Settings, ConfigError> {
    let settings: Settings = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("ROWSYNC_").split("__"))
        .extract()?;
    Ok(settings)
}

/// Serialize settings to TOML and write them to `path`.
pub fn save_settings(settings: &Settings, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(settings)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the realtime API key: env var, then system keyring, then
/// plaintext. `None` when no source has one; the endpoint may be open.
pub fn resolve_api_key(realtime: &RealtimeSettings) -> Option<SecretString> {
    if let Some(ref env_name) = realtime.api_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, "realtime/api-key") {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    realtime
        .api_key
        .as_ref()
        .map(|key| SecretString::from(key.clone()))
}

// ── Translation ─────────────────────────────────────────────────────

impl Settings {
    /// Engine configuration.
    pub fn sync_config(&self) -> Result<SyncConfig, ConfigError> {
        if self.snapshot.buffer_capacity == 0 {
            return Err(ConfigError::Validation {
                field: "snapshot.buffer_capacity".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.realtime.channel_capacity == 0 {
            return Err(ConfigError::Validation {
                field: "realtime.channel_capacity".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(SyncConfig {
            reconnect: backoff(
                "reconnect",
                Duration::from_millis(self.reconnect.initial_ms),
                Duration::from_secs(self.reconnect.max_secs),
            )?,
            stability_window: Duration::from_secs(self.reconnect.stability_secs),
            snapshot_timeout: Duration::from_secs(self.snapshot.timeout_secs),
            snapshot_retry: backoff(
                "snapshot",
                Duration::from_millis(self.snapshot.retry_initial_ms),
                Duration::from_secs(self.snapshot.retry_max_secs),
            )?,
            buffer_capacity: self.snapshot.buffer_capacity,
            channel_capacity: self.realtime.channel_capacity,
            ordering: self.ordering.clone(),
        })
    }

    /// Transport configuration, with the API key resolved.
    pub fn realtime_config(&self) -> Result<RealtimeConfig, ConfigError> {
        let raw = self.realtime.url.as_deref().ok_or(ConfigError::MissingUrl)?;
        let url: url::Url = raw.parse().map_err(|_| ConfigError::Validation {
            field: "realtime.url".into(),
            reason: format!("invalid URL: {raw}"),
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::Validation {
                field: "realtime.url".into(),
                reason: format!("expected a ws:// or wss:// URL, got '{}'", url.scheme()),
            });
        }

        let mut config = RealtimeConfig::new(url);
        config.api_key = resolve_api_key(&self.realtime);
        config.connect_timeout = Duration::from_secs(self.realtime.connect_timeout_secs);
        Ok(config)
    }
}

fn backoff(section: &str, initial: Duration, max: Duration) -> Result<BackoffConfig, ConfigError> {
    if initial.is_zero() || initial > max {
        return Err(ConfigError::Validation {
            field: section.into(),
            reason: format!("initial delay {initial:?} must be non-zero and at most {max:?}"),
        });
    }
    Ok(BackoffConfig { initial, max })
}
