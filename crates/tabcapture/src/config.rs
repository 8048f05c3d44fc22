//! Configuration management for tabcapture.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::buffer::{
    BufferPolicy, DEFAULT_FLUSH_COUNT, DEFAULT_FLUSH_INTERVAL, DEFAULT_HIGH_WATER_MARK,
};
use crate::correlator::{CaptureSettings, DEFAULT_BODY_CAP, DEFAULT_WS_MIN_BYTES};
use crate::error::{Error, Result};
use crate::lifecycle::{
    RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES, DEFAULT_PROTOCOL_VERSION, DEFAULT_STEP,
};
use crate::redact;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "tabcapture";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "events.db";

/// Prefix of environment variable overrides.
const ENV_PREFIX: &str = "TABCAPTURE_";

/// Upper bound on configured retries.
const MAX_RETRIES_LIMIT: u32 = 2;

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `TABCAPTURE_`, `__` between
///    section and key, e.g. `TABCAPTURE_CAPTURE__ANALYTICS=true`)
/// 2. TOML config file at `~/.config/tabcapture/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Inclusion toggles.
    pub capture: CaptureConfig,
    /// Size thresholds.
    pub thresholds: ThresholdsConfig,
    /// Host suffix filters.
    pub host_filters: HostFiltersConfig,
    /// Buffer and backpressure configuration.
    pub buffer: BufferConfig,
    /// Attach/detach configuration.
    pub lifecycle: LifecycleConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/tabcapture/events.db`
    pub database_path: Option<PathBuf>,
}

/// Which traffic to keep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct CaptureConfig {
    /// Keep static assets.
    pub http_assets: bool,
    /// Keep traffic to analytics hosts.
    pub analytics: bool,
    /// Keep small non-JSON websocket frames.
    pub ws_small_frames: bool,
    /// Capture request bodies.
    pub request_bodies: bool,
    /// Capture response bodies.
    pub response_bodies: bool,
}

/// Size thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    /// Minimum websocket frame size in bytes.
    pub ws_min_bytes: usize,
    /// Bytes of body text sampled before truncation.
    pub body_cap: usize,
}

/// Host suffix filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostFiltersConfig {
    /// Hosts treated as analytics (suffix match).
    pub analytics: Vec<String>,
}

/// Buffer and backpressure configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Queue length that triggers a flush.
    pub flush_count: usize,
    /// Milliseconds since the last flush that trigger a flush.
    pub flush_interval_ms: u64,
    /// Queue length above which bodies are skipped.
    pub high_water_mark: usize,
}

/// Attach/detach configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Debugging protocol version requested on attach.
    pub protocol_version: String,
    /// Retries for transient host failures.
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Added delay per further retry in milliseconds.
    pub retry_step_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            http_assets: false,
            analytics: false,
            ws_small_frames: false,
            request_bodies: true,
            response_bodies: true,
        }
    }
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            ws_min_bytes: DEFAULT_WS_MIN_BYTES,
            body_cap: DEFAULT_BODY_CAP,
        }
    }
}

impl Default for HostFiltersConfig {
    fn default() -> Self {
        Self {
            analytics: redact::default_analytics_hosts()
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_count: DEFAULT_FLUSH_COUNT,
            flush_interval_ms: millis(DEFAULT_FLUSH_INTERVAL),
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: millis(DEFAULT_BASE_DELAY),
            retry_step_ms: millis(DEFAULT_STEP),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation
    /// fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file).nested())
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.thresholds.body_cap == 0 {
            return Err(invalid("body_cap must be greater than 0"));
        }

        if self.buffer.flush_count == 0 {
            return Err(invalid("flush_count must be greater than 0"));
        }

        if self.buffer.flush_interval_ms == 0 {
            return Err(invalid("flush_interval_ms must be greater than 0"));
        }

        if self.buffer.high_water_mark < self.buffer.flush_count {
            return Err(invalid(format!(
                "high_water_mark ({}) cannot be less than flush_count ({})",
                self.buffer.high_water_mark, self.buffer.flush_count
            )));
        }

        if self.lifecycle.max_retries > MAX_RETRIES_LIMIT {
            return Err(invalid(format!(
                "max_retries ({}) cannot exceed {MAX_RETRIES_LIMIT}",
                self.lifecycle.max_retries
            )));
        }

        if self.lifecycle.protocol_version.trim().is_empty() {
            return Err(invalid("protocol_version must not be empty"));
        }

        if self
            .host_filters
            .analytics
            .iter()
            .any(|host| host.trim().is_empty())
        {
            return Err(invalid("host_filters.analytics contains an empty entry"));
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Settings the correlator applies to each occurrence.
    #[must_use]
    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            http_assets: self.capture.http_assets,
            analytics: self.capture.analytics,
            ws_small_frames: self.capture.ws_small_frames,
            request_bodies: self.capture.request_bodies,
            response_bodies: self.capture.response_bodies,
            ws_min_bytes: self.thresholds.ws_min_bytes,
            body_cap: self.thresholds.body_cap,
            analytics_hosts: self.host_filters.analytics.clone(),
        }
    }

    /// Flush and backpressure policy.
    #[must_use]
    pub fn buffer_policy(&self) -> BufferPolicy {
        BufferPolicy {
            flush_count: self.buffer.flush_count,
            flush_interval: Duration::from_millis(self.buffer.flush_interval_ms),
            high_water_mark: self.buffer.high_water_mark,
        }
    }

    /// Retry policy for host calls.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.lifecycle.max_retries,
            base_delay: Duration::from_millis(self.lifecycle.retry_base_delay_ms),
            step: Duration::from_millis(self.lifecycle.retry_step_ms),
        }
    }
}
