use serde::Deserialize;
use std::path::PathBuf;

use crate::storage::types::Device;

/// How device reachability is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMethod {
    /// TCP connect to the device address
    Tcp,
    /// One ICMP echo through the system `ping` utility
    Ping,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub sweep_interval_secs: u64,
    pub offline_threshold_secs: u64,
    pub probe_timeout_ms: u64,
    pub probe_method: ProbeMethod,
    /// Port used by the TCP probe when the address has none
    pub probe_port: u16,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
            offline_threshold_secs: 60,
            probe_timeout_ms: 1000,
            probe_method: ProbeMethod::Tcp,
            probe_port: 554,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Capture tool executable, looked up on PATH
    pub program: String,
    /// Output container / file extension
    pub container: String,
    /// Video codec when no scene filter is applied
    pub video_codec: String,
    /// Appended verbatim before the output path
    pub extra_args: Vec<String>,
    pub thumbnail_delay_secs: u64,
    pub thumbnail_timeout_secs: u64,
    /// Time allowed between SIGTERM and a hard kill
    pub stop_grace_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            container: "mp4".to_string(),
            video_codec: "copy".to_string(),
            extra_args: Vec::new(),
            thumbnail_delay_secs: 5,
            thumbnail_timeout_secs: 15,
            stop_grace_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub local_root: PathBuf,
    pub network_root: Option<PathBuf>,
    pub backend: StorageBackend,
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_root: PathBuf::from("./recordings"),
            network_root: None,
            backend: StorageBackend::Sqlite,
            database_path: PathBuf::from("./vigil.sqlite3"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Device seeded into the record store at startup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub name: String,
    pub address: String,
    pub stream_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub motion_detection: bool,
    #[serde(default = "default_sensitivity")]
    pub sensitivity: u8,
}

fn default_sensitivity() -> u8 {
    50
}

impl DeviceConfig {
    pub fn to_device(&self) -> Device {
        let mut device = Device::new(&self.id, &self.name, &self.address, &self.stream_url);
        device.username = self.username.clone();
        device.password = self.password.clone();
        device.motion_detection = self.motion_detection;
        device.sensitivity = self.sensitivity;
        device
    }
}
