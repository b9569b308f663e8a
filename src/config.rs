//! Configuration for the outpost data layer.
//!
//! Loads TOML from an explicit path, `OUTPOST_CONFIG`, or the per-user config
//! directory, then applies `OUTPOST_*` environment overrides. Durations are
//! humantime strings ("7d", "10s", "500ms").

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conflict::TieBreak;
use crate::error::{OutpostError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutpostConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
}

impl Default for OutpostConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            retry: RetryConfig::default(),
            sync: SyncConfig::default(),
            remote: RemoteConfig::default(),
            channel: ChannelConfig::default(),
        }
    }
}

impl OutpostConfig {
    /// Load configuration: explicit path or `OUTPOST_CONFIG` wins, otherwise
    /// the per-user config file; environment overrides apply last.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        let explicit = explicit_path
            .map(PathBuf::from)
            .or_else(|| std::env::var("OUTPOST_CONFIG").ok().map(PathBuf::from));

        let path = match explicit {
            Some(path) => Some(path),
            None => Self::global_path(),
        };
        if let Some(path) = path {
            if let Some(patch) = Self::load_patch(&path)? {
                config.merge_patch(patch);
            }
        }

        config.apply_env_overrides()?;

        Ok(config)
    }

    /// Load configuration from a specific file, with env overrides applied.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        if let Some(patch) = Self::load_patch(path)? {
            config.merge_patch(patch);
        }
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Write the full configuration to a file, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)
            .map_err(|err| OutpostError::Config(format!("serialize config: {err}")))?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Per-user config file location, if a config directory exists.
    #[must_use]
    pub fn global_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("outpost/config.toml"))
    }

    /// Resolve the sqlite database path: configured value or the per-user
    /// data directory.
    pub fn store_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.store.path {
            return Ok(path.clone());
        }
        dirs::data_dir()
            .map(|dir| dir.join("outpost/outpost.db"))
            .ok_or_else(|| OutpostError::Config("data directory not found".to_string()))
    }

    fn load_patch(path: &Path) -> Result<Option<ConfigPatch>> {
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|err| OutpostError::Config(format!("read config {}: {err}", path.display())))?;
        let patch = toml::from_str(&raw)
            .map_err(|err| OutpostError::Config(format!("parse config {}: {err}", path.display())))?;
        Ok(Some(patch))
    }

    fn merge_patch(&mut self, patch: ConfigPatch) {
        if let Some(patch) = patch.store {
            self.store.merge(patch);
        }
        if let Some(patch) = patch.retry {
            self.retry.merge(patch);
        }
        if let Some(patch) = patch.sync {
            self.sync.merge(patch);
        }
        if let Some(patch) = patch.remote {
            self.remote.merge(patch);
        }
        if let Some(patch) = patch.channel {
            self.channel.merge(patch);
        }
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(value) = env_string("OUTPOST_STORE_PATH") {
            self.store.path = Some(PathBuf::from(value));
        }
        if let Some(value) = env_u64("OUTPOST_STORE_RETENTION_SECONDS")? {
            self.store.retention = Duration::from_secs(value);
        }
        if let Some(value) = env_u64("OUTPOST_STORE_QUOTA_BYTES")? {
            self.store.quota_bytes = value;
        }

        if let Some(value) = env_u32("OUTPOST_RETRY_MAX_ATTEMPTS")? {
            self.retry.max_attempts = value;
        }
        if let Some(value) = env_u64("OUTPOST_RETRY_BASE_DELAY_MS")? {
            self.retry.base_delay = Duration::from_millis(value);
        }
        if let Some(value) = env_u64("OUTPOST_RETRY_MAX_DELAY_MS")? {
            self.retry.max_delay = Duration::from_millis(value);
        }
        if let Some(value) = env_f64("OUTPOST_RETRY_MULTIPLIER")? {
            self.retry.multiplier = value;
        }
        if let Some(value) = env_u64("OUTPOST_RETRY_REQUEST_TIMEOUT_MS")? {
            self.retry.request_timeout = Duration::from_millis(value);
        }

        if let Some(value) = env_bool("OUTPOST_SYNC_AUTO_DRAIN") {
            self.sync.auto_drain = value;
        }
        if let Some(value) = env_bool("OUTPOST_SYNC_PUSH_ON_ENQUEUE") {
            self.sync.push_on_enqueue = value;
        }
        if let Some(value) = env_string("OUTPOST_SYNC_TIE_BREAK") {
            self.sync.tie_break = parse_tie_break(&value)?;
        }

        if let Some(value) = env_string("OUTPOST_REMOTE_BASE_URL") {
            self.remote.base_url = Some(value);
        }
        if let Some(value) = env_string("OUTPOST_REMOTE_TOKEN") {
            self.remote.token = Some(value);
        }
        if let Some(value) = env_string("OUTPOST_CHANNEL_URL") {
            self.channel.url = Some(value);
        }

        Ok(())
    }
}

/// Durable store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Sqlite database path; `None` resolves to the per-user data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// How long `synced` operations stay visible before garbage collection.
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    /// Advertised quota for `storage_info`; 0 means unknown/unlimited.
    #[serde(default)]
    pub quota_bytes: u64,
    /// Usage ratio above which the orchestrator logs a capacity warning.
    #[serde(default)]
    pub quota_warn_ratio: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            quota_bytes: 0,
            quota_warn_ratio: 0.8,
        }
    }
}

impl StoreConfig {
    fn merge(&mut self, patch: StorePatch) {
        if let Some(value) = patch.path {
            self.path = Some(value);
        }
        if let Some(value) = patch.retention {
            self.retention = value;
        }
        if let Some(value) = patch.quota_bytes {
            self.quota_bytes = value;
        }
        if let Some(value) = patch.quota_warn_ratio {
            self.quota_warn_ratio = value;
        }
    }
}

/// Retry and backoff settings for remote calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Per-attempt deadline; exceeding it classifies as `timeout`.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    fn merge(&mut self, patch: RetryPatch) {
        if let Some(value) = patch.max_attempts {
            self.max_attempts = value;
        }
        if let Some(value) = patch.base_delay {
            self.base_delay = value;
        }
        if let Some(value) = patch.max_delay {
            self.max_delay = value;
        }
        if let Some(value) = patch.multiplier {
            self.multiplier = value;
        }
        if let Some(value) = patch.request_timeout {
            self.request_timeout = value;
        }
    }
}

/// Orchestrator behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Drain automatically on the offline→online transition.
    pub auto_drain: bool,
    /// Attempt an immediate push when enqueueing while online.
    pub push_on_enqueue: bool,
    /// Same-field tie-break for the merge conflict policy.
    pub tie_break: TieBreak,
    /// Purge `synced` entries past retention after each successful drain.
    pub purge_after_drain: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_drain: true,
            push_on_enqueue: true,
            tie_break: TieBreak::LastWriterWins,
            purge_after_drain: true,
        }
    }
}

impl SyncConfig {
    fn merge(&mut self, patch: SyncPatch) {
        if let Some(value) = patch.auto_drain {
            self.auto_drain = value;
        }
        if let Some(value) = patch.push_on_enqueue {
            self.push_on_enqueue = value;
        }
        if let Some(value) = patch.tie_break {
            self.tie_break = value;
        }
        if let Some(value) = patch.purge_after_drain {
            self.purge_after_drain = value;
        }
    }
}

/// Remote record service endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    /// Client identity reported to the service; hostname when unset.
    #[serde(default)]
    pub client_name: Option<String>,
}

impl RemoteConfig {
    /// Client identity reported to the service and stamped on outbound
    /// events; falls back to the hostname, then a fixed tag.
    #[must_use]
    pub fn client_identity(&self) -> String {
        self.client_name.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "outpost".to_string())
        })
    }

    fn merge(&mut self, patch: RemotePatch) {
        if let Some(value) = patch.base_url {
            self.base_url = Some(value);
        }
        if let Some(value) = patch.token {
            self.token = Some(value);
        }
        if let Some(value) = patch.client_name {
            self.client_name = Some(value);
        }
    }
}

/// Real-time event channel endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub url: Option<String>,
    /// Deadline for the WebSocket handshake.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ChannelConfig {
    fn merge(&mut self, patch: ChannelPatch) {
        if let Some(value) = patch.url {
            self.url = Some(value);
        }
        if let Some(value) = patch.connect_timeout {
            self.connect_timeout = value;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigPatch {
    store: Option<StorePatch>,
    retry: Option<RetryPatch>,
    sync: Option<SyncPatch>,
    remote: Option<RemotePatch>,
    channel: Option<ChannelPatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StorePatch {
    path: Option<PathBuf>,
    #[serde(default, with = "humantime_serde::option")]
    retention: Option<Duration>,
    quota_bytes: Option<u64>,
    quota_warn_ratio: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RetryPatch {
    max_attempts: Option<u32>,
    #[serde(default, with = "humantime_serde::option")]
    base_delay: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    #[serde(default, with = "humantime_serde::option")]
    request_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SyncPatch {
    auto_drain: Option<bool>,
    push_on_enqueue: Option<bool>,
    tie_break: Option<TieBreak>,
    purge_after_drain: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RemotePatch {
    base_url: Option<String>,
    token: Option<String>,
    client_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ChannelPatch {
    url: Option<String>,
    #[serde(default, with = "humantime_serde::option")]
    connect_timeout: Option<Duration>,
}

fn parse_tie_break(value: &str) -> Result<TieBreak> {
    match value.to_lowercase().as_str() {
        "last-writer-wins" | "last_writer_wins" | "lww" => Ok(TieBreak::LastWriterWins),
        "remote-wins" | "remote_wins" | "remote" => Ok(TieBreak::RemoteWins),
        "local-wins" | "local_wins" | "local" => Ok(TieBreak::LocalWins),
        _ => Err(OutpostError::Config(format!(
            "invalid tie break {value} (expected last-writer-wins|remote-wins|local-wins)"
        ))),
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn env_u32(key: &str) -> Result<Option<u32>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<u32>()
            .map(Some)
            .map_err(|err| OutpostError::Config(format!("invalid {key} value {value}: {err}"))),
        Err(_) => Ok(None),
    }
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|err| OutpostError::Config(format!("invalid {key} value {value}: {err}"))),
        Err(_) => Ok(None),
    }
}

fn env_f64(key: &str) -> Result<Option<f64>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<f64>()
            .map(Some)
            .map_err(|err| OutpostError::Config(format!("invalid {key} value {value}: {err}"))),
        Err(_) => Ok(None),
    }
}
