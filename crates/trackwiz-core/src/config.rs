//! Configuration management for trackwiz
//!
//! Handles loading and validation of `trackwiz.toml` configuration files.
//! Every field has a default, so an empty file (or no file) is valid.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::service::ModelSize;

/// File name searched for in the working directory and the user config dir.
pub const CONFIG_FILE_NAME: &str = "trackwiz.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Tracking service connection
    #[serde(default)]
    pub service: ServiceConfig,

    /// Status polling
    #[serde(default)]
    pub polling: PollingConfig,

    /// Tracking defaults
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Notice display
    #[serde(default)]
    pub notices: NoticesConfig,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected one of: pretty, json")),
        }
    }
}

/// General configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format (pretty, json)
    #[serde(default)]
    pub log_format: LogFormat,

    /// Optional log file, appended to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Tracking service connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the tracking service
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Largest video accepted for upload, in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl ServiceConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_upload_bytes() -> u64 {
    100 * 1024 * 1024
}

/// Status polling. A zero `max_attempts` or `max_duration_secs` disables
/// that bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Backoff cap; follows `interval_ms` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_interval_ms: Option<u64>,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_interval_ms: None,
            backoff_factor: default_backoff_factor(),
            max_attempts: default_max_attempts(),
            max_duration_secs: default_max_duration_secs(),
        }
    }
}

impl PollingConfig {
    /// Effective backoff cap in milliseconds.
    #[must_use]
    pub fn max_interval_ms(&self) -> u64 {
        self.max_interval_ms.unwrap_or(self.interval_ms)
    }
}

fn default_interval_ms() -> u64 {
    2000
}

fn default_backoff_factor() -> f64 {
    1.0
}

fn default_max_attempts() -> u32 {
    900
}

fn default_max_duration_secs() -> u64 {
    30 * 60
}

/// Tracking defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Model used when `--model` is not given
    #[serde(default)]
    pub model_size: ModelSize,
}

/// Notice display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticesConfig {
    /// How long a notice stays visible, in milliseconds
    #[serde(default = "default_display_ms")]
    pub display_ms: u64,
}

impl Default for NoticesConfig {
    fn default() -> Self {
        Self {
            display_ms: default_display_ms(),
        }
    }
}

impl NoticesConfig {
    #[must_use]
    pub fn display(&self) -> Duration {
        Duration::from_millis(self.display_ms)
    }
}

fn default_display_ms() -> u64 {
    3000
}

impl Config {
    /// Load configuration from the first location that exists:
    /// `explicit`, `./trackwiz.toml`, `<config dir>/trackwiz/trackwiz.toml`.
    /// Falls back to defaults when none is found.
    pub fn load(explicit: Option<&Path>) -> crate::Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }
        match Self::discover() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Candidate config file locations, in search order.
    #[must_use]
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("trackwiz").join(CONFIG_FILE_NAME));
        }
        paths
    }

    fn discover() -> Option<PathBuf> {
        Self::search_paths().into_iter().find(|path| path.is_file())
    }

    /// Load and validate configuration from a specific file.
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        let display = path.display().to_string();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(display).into());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(display, e.to_string()))?;
        let config = Self::from_toml(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without validating it.
    pub fn from_toml(raw: &str) -> crate::Result<Self> {
        toml::from_str(raw).map_err(|e| ConfigError::ParseFailed(e.to_string()).into())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> crate::Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeFailed(e.to_string()).into())
    }

    /// Check value ranges.
    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg).into());

        if crate::logging::parse_level(&self.general.log_level).is_err() {
            return invalid(format!("general.log_level: unknown level {:?}", self.general.log_level));
        }
        let base = self.service.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return invalid(format!(
                "service.base_url must start with http:// or https://, got {base:?}"
            ));
        }
        if self.service.request_timeout_secs == 0 {
            return invalid("service.request_timeout_secs must be at least 1".to_string());
        }
        if self.service.max_upload_bytes == 0 {
            return invalid("service.max_upload_bytes must be positive".to_string());
        }
        if self.polling.interval_ms == 0 {
            return invalid("polling.interval_ms must be at least 1".to_string());
        }
        if self.polling.max_interval_ms() < self.polling.interval_ms {
            return invalid("polling.max_interval_ms must not be below polling.interval_ms".to_string());
        }
        if !self.polling.backoff_factor.is_finite() || self.polling.backoff_factor < 1.0 {
            return invalid("polling.backoff_factor must be a finite number >= 1.0".to_string());
        }
        Ok(())
    }
}
