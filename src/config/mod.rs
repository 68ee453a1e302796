//! TOML configuration for the whole pipeline
//!
//! Every section and field has a default, so an empty file is a complete
//! configuration.

use crate::alerts::AlertManagerConfig;
use crate::collectors::{CollectorConfig, CollectorMode};
use crate::error::ConfigError;
use crate::processor::ProcessorConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound for every configured interval: one year
pub const MAX_INTERVAL_SECONDS: u64 = 365 * 24 * 60 * 60;

fn check_interval(name: &str, seconds: u64) -> Result<(), ConfigError> {
    if seconds > MAX_INTERVAL_SECONDS {
        return Err(ConfigError::ValidationError(format!(
            "{} must not exceed {} seconds",
            name, MAX_INTERVAL_SECONDS
        )));
    }
    Ok(())
}

/// Settings of the monitor itself
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorSettings {
    /// Start monitoring as soon as the monitor is constructed
    pub auto_start: bool,
    /// Interval between metrics snapshots
    pub metrics_interval_seconds: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            auto_start: false,
            metrics_interval_seconds: 5,
        }
    }
}

impl MonitorSettings {
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_seconds)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub collector: CollectorConfig,
    pub processor: ProcessorConfig,
    pub alerts: AlertManagerConfig,
    pub monitor: MonitorSettings,
}

impl Config {
    /// Load and validate a configuration file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read,
    /// `ConfigError::TomlError` if it is not valid TOML for this schema, or
    /// `ConfigError::ValidationError` if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate a configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::TomlError` or `ConfigError::ValidationError`.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collector.max_buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "collector.max_buffer_size must be greater than 0".to_string(),
            ));
        }
        if self.collector.reconnect_interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "collector.reconnect_interval_seconds must be greater than 0".to_string(),
            ));
        }
        check_interval(
            "collector.reconnect_interval_seconds",
            self.collector.reconnect_interval_seconds,
        )?;
        if self.collector.io_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "collector.io_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        check_interval("collector.io_timeout_seconds", self.collector.io_timeout_seconds)?;
        check_interval("collector.mock_interval_ms", self.collector.mock_interval_ms / 1000)?;
        if let Some(command) = &self.collector.command {
            if command.is_empty() || command[0].trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "collector.command must name a program".to_string(),
                ));
            }
        }
        if self.collector.mode == CollectorMode::Mock && self.collector.mock_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "collector.mock_interval_ms must be greater than 0".to_string(),
            ));
        }

        self.processor.validate()?;
        self.alerts.validate()?;

        if self.monitor.metrics_interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "monitor.metrics_interval_seconds must be greater than 0".to_string(),
            ));
        }
        check_interval(
            "monitor.metrics_interval_seconds",
            self.monitor.metrics_interval_seconds,
        )
    }
}
