//! Configuration for the modhost runtime.
//!
//! Configuration is read from TOML or JSON, chosen by file extension. Every
//! field has a default, so a partial file (or none at all) is valid.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::scheduler::SlicePolicy;

/// Host identity handed to compatibility predicates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostInfo {
    /// Host product name.
    pub name: String,

    /// Host version, `major.minor.patch`.
    pub version: String,
}

impl Default for HostInfo {
    fn default() -> Self {
        Self {
            name: "modhost".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl HostInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Numeric `(major, minor, patch)` triple; missing or malformed parts read as 0.
    pub fn version_triple(&self) -> (u32, u32, u32) {
        let mut parts = self
            .version
            .split('.')
            .map(|part| part.trim().parse::<u32>().unwrap_or(0));
        (
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
        )
    }

    /// Whether this host is at least `major.minor.patch`.
    pub fn at_least(&self, major: u32, minor: u32, patch: u32) -> bool {
        self.version_triple() >= (major, minor, patch)
    }
}

/// Configuration for the runtime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Cumulative work per slice before a batch yields, in milliseconds.
    pub slice_threshold_ms: u64,

    /// Pause between slices, in milliseconds.
    pub slice_pause_ms: u64,

    /// Delay between the end of discovery and the first activation slice.
    pub activation_delay_ms: u64,

    /// Delay before a failed bootstrap may be retried.
    pub bootstrap_retry_ms: u64,

    /// Whether to build the error-reporting sink during bootstrap.
    pub error_reporting: bool,

    /// Default tracing filter used by binaries embedding the runtime.
    pub log_level: String,

    /// Tick period for the tokio-backed scheduler.
    pub tick_interval_ms: u64,

    /// Host identity exposed to compatibility predicates.
    pub host: HostInfo,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            slice_threshold_ms: 2000,
            slice_pause_ms: 500,
            activation_delay_ms: 250,
            bootstrap_retry_ms: 1000,
            error_reporting: false,
            log_level: "info".to_string(),
            tick_interval_ms: 16,
            host: HostInfo::default(),
        }
    }
}

impl RuntimeConfig {
    /// Time-slicing policy shared by discovery and activation.
    pub fn slice_policy(&self) -> SlicePolicy {
        SlicePolicy::new(
            Duration::from_millis(self.slice_threshold_ms),
            Duration::from_millis(self.slice_pause_ms),
        )
    }

    pub fn activation_delay(&self) -> Duration {
        Duration::from_millis(self.activation_delay_ms)
    }

    pub fn bootstrap_retry(&self) -> Duration {
        Duration::from_millis(self.bootstrap_retry_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slice_pause_ms == 0 {
            return Err(ConfigError::Invalid(
                "slice_pause_ms must be greater than zero".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.host.version.trim().is_empty() {
            return Err(ConfigError::Invalid("host.version must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Load and validate configuration from a file.
pub fn load_config(path: &Path) -> Result<RuntimeConfig, ConfigError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    let content = std::fs::read_to_string(path)?;

    let config: RuntimeConfig = match ext {
        "toml" => toml::from_str(&content)?,
        "json" => serde_json::from_str(&content)?,
        other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
    };

    config.validate()?;
    Ok(config)
}
