use std::sync::Arc;

use serde::{Deserialize, Serialize};
use warp::http::StatusCode;

use crate::capture_supervisor::CaptureSupervisor;
use crate::error_handling::types::CaptureError;
use crate::fleet_monitor::FleetMonitor;
use crate::notification_hub::NotificationHub;
use crate::storage::RecordStore;

/// Handles shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub hub: Arc<NotificationHub>,
    pub monitor: Arc<FleetMonitor>,
    pub supervisor: Arc<CaptureSupervisor>,
}

/// API error payload
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
}

pub const DEFAULT_EVENT_LIMIT: usize = 100;
pub const MAX_EVENT_LIMIT: usize = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

impl EventsQuery {
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_EVENT_LIMIT)
            .clamp(1, MAX_EVENT_LIMIT)
    }
}

/// HTTP status for a failed start/stop request.
pub fn capture_error_status(err: &CaptureError) -> StatusCode {
    match err {
        CaptureError::AlreadyRecording | CaptureError::NotRecording => StatusCode::CONFLICT,
        CaptureError::SpawnFailed(_)
        | CaptureError::ProcessError(_)
        | CaptureError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
