//! Notification hub.
//!
//! Keeps the set of live observer connections (WebSocket clients, in-process
//! listeners) and pushes typed [`HubMessage`]s to all of them.

pub mod hub;
pub mod types;

pub use hub::NotificationHub;
pub use types::{DeviceStatusMessage, HubMessage, RecordingStatusMessage};
