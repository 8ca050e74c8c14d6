use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::types::{DeviceStatus, Event};

/// Messages pushed to every connected observer, serialized as
/// `{"type": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum HubMessage {
    DeviceStatus(DeviceStatusMessage),
    RecordingStatus(RecordingStatusMessage),
    Event(Event),
}

impl HubMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            HubMessage::DeviceStatus(_) => "device_status",
            HubMessage::RecordingStatus(_) => "recording_status",
            HubMessage::Event(_) => "event",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatusMessage {
    pub device_id: String,
    pub status: DeviceStatus,
    pub recording: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingStatusMessage {
    pub device_id: String,
    pub recording: bool,
    pub session_id: Option<Uuid>,
}
