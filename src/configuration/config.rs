use super::types::*;
use crate::error_handling::types::ConfigError;
use log::debug;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Application configuration structure that defines all runtime parameters.
///
/// The configuration is read from a TOML file. Every section is optional and
/// falls back to its defaults, so an empty file is a valid configuration.
///
/// # Examples
///
/// ```
/// use vigil::configuration::config::Config;
///
/// let config = Config::parse("[monitor]\nsweep_interval_secs = 10\n").unwrap();
/// assert_eq!(config.monitor.sweep_interval_secs, 10);
/// assert_eq!(config.monitor.offline_threshold_secs, 60);
/// ```
///
/// # Fields Overview
///
/// - `monitor`: liveness sweep period, offline threshold and probe settings
/// - `capture`: capture tool invocation and thumbnail/stop timings
/// - `storage`: recording roots and record store backend
/// - `web`: observer/API server settings
/// - `devices`: devices upserted into the record store at startup
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub monitor: MonitorConfig,
    pub capture: CaptureConfig,
    pub storage: StorageConfig,
    pub web: WebConfig,
    pub devices: Vec<DeviceConfig>,
}

impl Config {
    /// Reads and validates the configuration file at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses and validates a TOML document.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "monitor.sweep_interval_secs must be greater than 0".into(),
            ));
        }
        if self.monitor.probe_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "monitor.probe_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.capture.program.trim().is_empty() {
            return Err(ConfigError::InvalidValue("capture.program is empty".into()));
        }
        if self.capture.container.trim().is_empty() {
            return Err(ConfigError::InvalidValue("capture.container is empty".into()));
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.sensitivity > 100 {
                return Err(ConfigError::NotInRange(format!(
                    "sensitivity of device {} is {}, expected 0-100",
                    device.id, device.sensitivity
                )));
            }
            if !seen.insert(device.id.as_str()) {
                return Err(ConfigError::DuplicateDevice(device.id.clone()));
            }
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.sweep_interval_secs)
    }

    pub fn offline_threshold(&self) -> Duration {
        Duration::from_secs(self.monitor.offline_threshold_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.monitor.probe_timeout_ms)
    }
}
