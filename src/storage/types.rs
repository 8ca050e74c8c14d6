//! Records exchanged with the record store.
//!
//! These are the durable projections of the engine's state: devices, recording
//! sessions and audit events. Enum values are persisted as their snake_case
//! string form (`as_str` / `parse`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Liveness status of a device as derived by the fleet monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Registered but never probed successfully, nor past the offline threshold.
    Unknown,
    /// Last probe succeeded.
    Active,
    /// No successful probe within the offline threshold.
    Offline,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Unknown => "unknown",
            DeviceStatus::Active => "active",
            DeviceStatus::Offline => "offline",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "active" => DeviceStatus::Active,
            "offline" => DeviceStatus::Offline,
            _ => DeviceStatus::Unknown,
        }
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        DeviceStatus::Unknown
    }
}

/// A monitored video source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    /// Network address used for liveness probing (`host` or `host:port`).
    pub address: String,
    /// Stream locator handed to the capture tool (e.g. `rtsp://...`).
    pub stream_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub motion_detection: bool,
    /// Motion sensitivity, 0-100.
    pub sensitivity: u8,
    pub status: DeviceStatus,
    pub recording: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

impl Device {
    /// Builds a device with default capabilities and `unknown` status.
    pub fn new(id: &str, name: &str, address: &str, stream_url: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            address: address.to_string(),
            stream_url: stream_url.to_string(),
            username: None,
            password: None,
            motion_detection: false,
            sensitivity: 50,
            status: DeviceStatus::Unknown,
            recording: false,
            last_seen: None,
        }
    }
}

/// Why a recording was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    Manual,
    Motion,
    Scheduled,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::Manual => "manual",
            TriggerReason::Motion => "motion",
            TriggerReason::Scheduled => "scheduled",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "motion" => TriggerReason::Motion,
            "scheduled" => TriggerReason::Scheduled,
            _ => TriggerReason::Manual,
        }
    }
}

/// One recording attempt for a device.
///
/// `end_time`, `duration_secs` and `file_size` stay unset until the session
/// is finalized; after that they are never mutated again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub device_id: String,
    /// Copy of the device name, kept so the session survives device deletion.
    pub device_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    pub output_path: PathBuf,
    /// Set once a still image has actually been written.
    pub thumbnail_path: Option<PathBuf>,
    pub trigger: TriggerReason,
    pub file_size: Option<u64>,
}

impl Session {
    pub fn is_live(&self) -> bool {
        self.end_time.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DeviceOnline,
    DeviceOffline,
    RecordingStarted,
    RecordingStopped,
    RecordingError,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::DeviceOnline => "device_online",
            EventType::DeviceOffline => "device_offline",
            EventType::RecordingStarted => "recording_started",
            EventType::RecordingStopped => "recording_stopped",
            EventType::RecordingError => "recording_error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "device_online" => Some(EventType::DeviceOnline),
            "device_offline" => Some(EventType::DeviceOffline),
            "recording_started" => Some(EventType::RecordingStarted),
            "recording_stopped" => Some(EventType::RecordingStopped),
            "recording_error" => Some(EventType::RecordingError),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "warning" => Severity::Warning,
            "error" => Severity::Error,
            _ => Severity::Info,
        }
    }
}

/// Immutable audit and notification record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub message: String,
    pub device_id: Option<String>,
    pub severity: Severity,
}

impl Event {
    pub fn new(
        event_type: EventType,
        severity: Severity,
        device_id: Option<&str>,
        message: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            message,
            device_id: device_id.map(str::to_string),
            severity,
        }
    }
}
