//! Configuration loading for hearth.
//!
//! Configuration comes from an optional TOML file (`--config <path>` or
//! `HEARTH_CONFIG`), then `HEARTH_*` environment overrides, then validation.
//! Every section has defaults, so an empty file is a valid configuration.

use crate::error::{ConfigError, HearthResult};
use crate::KEY_SEPARATOR;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default entry time-to-live in seconds.
pub const DEFAULT_TTL_SECS: u64 = 300;

/// Namespace for every durable key owned by the cache.
pub const DEFAULT_STORAGE_PREFIX: &str = "hearth_cache_";

/// Documented interval between generation status requests.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// Default status path; `{id}` is replaced by the job id.
pub const DEFAULT_STATUS_PATH: &str = "/api/generation/{id}/status";

/// Master configuration struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HearthConfig {
    pub cache: CacheConfig,
    pub storage: StorageConfig,
    pub jobs: JobConfig,
    pub telemetry: TelemetryConfig,
}

/// Keyed cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// TTL applied when callers do not pass one.
    pub default_ttl_secs: u64,
    /// Namespace prefix for durable keys.
    pub storage_prefix: String,
    /// Buffer size of the change-event broadcast channel.
    pub event_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: DEFAULT_TTL_SECS,
            storage_prefix: DEFAULT_STORAGE_PREFIX.to_string(),
            event_capacity: 256,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Set the default TTL in whole seconds.
    ///
    /// Sub-second parts are dropped, so a TTL under one second fails
    /// [`CacheConfig::validate`].
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_secs = ttl.as_secs();
        self
    }

    /// Set the storage prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.storage_prefix = prefix.into();
        self
    }

    /// Validate the cache section.
    ///
    /// The prefix scopes every durable key the cache reads or deletes, so it
    /// must be non-empty and free of the key separator.
    pub fn validate(&self) -> HearthResult<()> {
        if self.default_ttl_secs == 0 {
            return Err(invalid(
                "cache.default_ttl_secs",
                self.default_ttl_secs,
                "default_ttl_secs must be greater than 0",
            ));
        }
        if self.storage_prefix.is_empty() {
            return Err(invalid(
                "cache.storage_prefix",
                "",
                "storage_prefix must not be empty",
            ));
        }
        if self.storage_prefix.contains(KEY_SEPARATOR) {
            return Err(invalid(
                "cache.storage_prefix",
                &self.storage_prefix,
                "storage_prefix must not contain ':'",
            ));
        }
        if self.event_capacity == 0 {
            return Err(invalid(
                "cache.event_capacity",
                self.event_capacity,
                "event_capacity must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Durable storage backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Lmdb,
}

/// Durable storage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// LMDB directory; required for the `lmdb` backend.
    pub path: Option<PathBuf>,
    /// LMDB map size in megabytes.
    pub max_size_mb: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: None,
            max_size_mb: 64,
        }
    }
}

/// Generation job polling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    pub poll_interval_ms: u64,
    /// Give up after this many status requests. `None` polls until the job
    /// reports a result or a request fails.
    pub max_poll_attempts: Option<u32>,
    /// Give up after this much time in the polling phase.
    pub max_duration_secs: Option<u64>,
    /// Base URL of the generation API used by the HTTP status poller.
    pub api_base_url: Option<String>,
    pub status_path: String,
    pub request_timeout_ms: u64,
    pub api_key: Option<String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_poll_attempts: None,
            max_duration_secs: None,
            api_base_url: None,
            status_path: DEFAULT_STATUS_PATH.to_string(),
            request_timeout_ms: 10_000,
            api_key: None,
        }
    }
}

impl JobConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: "hearth_storage=info,hearth_jobs=info,warn".to_string(),
            json: false,
        }
    }
}

impl HearthConfig {
    /// Load configuration from `--config`/`HEARTH_CONFIG` (if given), apply
    /// environment overrides, and validate.
    pub fn load() -> HearthResult<Self> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let mut config = match path {
            Some(path) => Self::from_path(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> HearthResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> HearthResult<Self> {
        let config = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        Ok(config)
    }

    /// Apply `HEARTH_*` environment overrides.
    ///
    /// Environment variables:
    /// - `HEARTH_CACHE_DEFAULT_TTL_SECS`
    /// - `HEARTH_CACHE_STORAGE_PREFIX`
    /// - `HEARTH_STORAGE_BACKEND` (`memory` or `lmdb`)
    /// - `HEARTH_STORAGE_PATH`
    /// - `HEARTH_JOBS_POLL_INTERVAL_MS`
    /// - `HEARTH_JOBS_MAX_POLL_ATTEMPTS`
    /// - `HEARTH_JOBS_MAX_DURATION_SECS`
    /// - `HEARTH_JOBS_API_BASE_URL`
    /// - `HEARTH_JOBS_API_KEY`
    /// - `HEARTH_LOG_JSON`
    ///
    /// Unparsable values are ignored and the file/default value is kept.
    pub fn apply_env_overrides(&mut self) {
        if let Some(ttl) = env_parse("HEARTH_CACHE_DEFAULT_TTL_SECS") {
            self.cache.default_ttl_secs = ttl;
        }
        if let Ok(prefix) = std::env::var("HEARTH_CACHE_STORAGE_PREFIX") {
            self.cache.storage_prefix = prefix;
        }
        if let Ok(backend) = std::env::var("HEARTH_STORAGE_BACKEND") {
            match backend.to_ascii_lowercase().as_str() {
                "memory" => self.storage.backend = StorageBackend::Memory,
                "lmdb" => self.storage.backend = StorageBackend::Lmdb,
                _ => {}
            }
        }
        if let Ok(path) = std::env::var("HEARTH_STORAGE_PATH") {
            self.storage.path = Some(PathBuf::from(path));
        }
        if let Some(interval) = env_parse("HEARTH_JOBS_POLL_INTERVAL_MS") {
            self.jobs.poll_interval_ms = interval;
        }
        if let Some(attempts) = env_parse("HEARTH_JOBS_MAX_POLL_ATTEMPTS") {
            self.jobs.max_poll_attempts = Some(attempts);
        }
        if let Some(secs) = env_parse("HEARTH_JOBS_MAX_DURATION_SECS") {
            self.jobs.max_duration_secs = Some(secs);
        }
        if let Ok(url) = std::env::var("HEARTH_JOBS_API_BASE_URL") {
            self.jobs.api_base_url = Some(url);
        }
        if let Ok(key) = std::env::var("HEARTH_JOBS_API_KEY") {
            self.jobs.api_key = Some(key);
        }
        if let Ok(json) = std::env::var("HEARTH_LOG_JSON") {
            self.telemetry.json = json == "1" || json.eq_ignore_ascii_case("true");
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> HearthResult<()> {
        self.cache.validate()?;
        if self.storage.backend == StorageBackend::Lmdb {
            match &self.storage.path {
                Some(path) if !path.as_os_str().is_empty() => {}
                _ => {
                    return Err(invalid(
                        "storage.path",
                        "",
                        "path is required for the lmdb backend",
                    ))
                }
            }
            if self.storage.max_size_mb == 0 {
                return Err(invalid(
                    "storage.max_size_mb",
                    self.storage.max_size_mb,
                    "max_size_mb must be greater than 0",
                ));
            }
        }
        if self.jobs.poll_interval_ms == 0 {
            return Err(invalid(
                "jobs.poll_interval_ms",
                self.jobs.poll_interval_ms,
                "poll_interval_ms must be greater than 0",
            ));
        }
        if self.jobs.max_poll_attempts == Some(0) {
            return Err(invalid(
                "jobs.max_poll_attempts",
                0,
                "max_poll_attempts must be greater than 0 when set",
            ));
        }
        if self.jobs.max_duration_secs == Some(0) {
            return Err(invalid(
                "jobs.max_duration_secs",
                0,
                "max_duration_secs must be greater than 0 when set",
            ));
        }
        if self.jobs.request_timeout_ms == 0 {
            return Err(invalid(
                "jobs.request_timeout_ms",
                self.jobs.request_timeout_ms,
                "request_timeout_ms must be greater than 0",
            ));
        }
        if !self.jobs.status_path.contains("{id}") {
            return Err(invalid(
                "jobs.status_path",
                &self.jobs.status_path,
                "status_path must contain the {id} placeholder",
            ));
        }
        if let Some(url) = &self.jobs.api_base_url {
            if url.trim().is_empty() {
                return Err(invalid(
                    "jobs.api_base_url",
                    url,
                    "api_base_url must not be empty when set",
                ));
            }
        }
        Ok(())
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> crate::HearthError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("HEARTH_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
