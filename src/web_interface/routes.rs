use std::convert::Infallible;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, warn};
use warp::http::StatusCode;
use warp::reply::{self, Response};
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

use super::types::{capture_error_status, ApiError, AppState, EventsQuery};
use crate::error_handling::types::StorageError;
use crate::notification_hub::NotificationHub;

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    reply::with_status(
        reply::json(&ApiError {
            message: message.into(),
        }),
        status,
    )
    .into_response()
}

/// GET /ws
pub fn observer_route(
    state: AppState,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_state(state))
        .map(|ws: Ws, state: AppState| {
            let hub = state.hub.clone();
            ws.on_upgrade(move |socket| observer_session(socket, hub))
        })
}

/// Forwards hub messages to one WebSocket client until either side closes.
async fn observer_session(socket: WebSocket, hub: Arc<NotificationHub>) {
    let (id, mut messages) = hub.register().await;
    let (mut outgoing, mut incoming) = socket.split();

    let forward = async {
        while let Some(json) = messages.recv().await {
            if let Err(e) = outgoing.send(Message::text(json)).await {
                debug!("Observer {} send failed: {}", id, e);
                break;
            }
        }
    };
    // Client frames are ignored; reading them is how a close is noticed.
    let drain = async {
        while let Some(frame) = incoming.next().await {
            match frame {
                Ok(msg) if msg.is_close() => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("Observer {} read failed: {}", id, e);
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = forward => {}
        _ = drain => {}
    }
    hub.unregister(&id).await;
}

/// GET /devices
pub fn devices_route(
    state: AppState,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("devices")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state))
        .and_then(list_devices)
}

/// GET /sessions
pub fn sessions_route(
    state: AppState,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("sessions")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state))
        .and_then(list_sessions)
}

/// GET /events?limit=N
pub fn events_route(
    state: AppState,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("events")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<EventsQuery>())
        .and(with_state(state))
        .and_then(list_events)
}

/// POST /devices/:id/recording
pub fn start_recording_route(
    state: AppState,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("devices" / String / "recording")
        .and(warp::post())
        .and(with_state(state))
        .and_then(start_recording)
}

/// DELETE /devices/:id/recording
pub fn stop_recording_route(
    state: AppState,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("devices" / String / "recording")
        .and(warp::delete())
        .and(with_state(state))
        .and_then(stop_recording)
}

pub async fn list_devices(state: AppState) -> Result<Response, Rejection> {
    let entries = state.monitor.registry().snapshot().await;
    Ok(reply::json(&entries).into_response())
}

pub async fn list_sessions(state: AppState) -> Result<Response, Rejection> {
    match state.store.list_sessions().await {
        Ok(sessions) => Ok(reply::json(&sessions).into_response()),
        Err(e) => {
            error!("Failed to load sessions: {}", e);
            Ok(json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load sessions",
            ))
        }
    }
}

pub async fn list_events(query: EventsQuery, state: AppState) -> Result<Response, Rejection> {
    match state.store.list_events(query.effective_limit()).await {
        Ok(events) => Ok(reply::json(&events).into_response()),
        Err(e) => {
            error!("Failed to load events: {}", e);
            Ok(json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load events",
            ))
        }
    }
}

pub async fn start_recording(device_id: String, state: AppState) -> Result<Response, Rejection> {
    let device = match state.store.get_device(&device_id).await {
        Ok(device) => device,
        Err(StorageError::NotFound) => {
            return Ok(json_error(
                StatusCode::NOT_FOUND,
                format!("Unknown device {}", device_id),
            ))
        }
        Err(e) => {
            error!("[{}] Device lookup failed: {}", device_id, e);
            return Ok(json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load device",
            ));
        }
    };

    match state.supervisor.start_recording(&device).await {
        Ok(handle) => Ok(reply::with_status(reply::json(&handle), StatusCode::CREATED).into_response()),
        Err(e) => {
            warn!("[{}] Start request rejected: {}", device_id, e);
            Ok(json_error(capture_error_status(&e), e.to_string()))
        }
    }
}

pub async fn stop_recording(device_id: String, state: AppState) -> Result<Response, Rejection> {
    match state.supervisor.stop_recording(&device_id).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => Ok(json_error(capture_error_status(&e), e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture_supervisor::CaptureSupervisor;
    use crate::configuration::types::CaptureConfig;
    use crate::error_handling::types::{CaptureError, ProbeError};
    use crate::fleet_monitor::{FleetMonitor, MonitorRegistry};
    use crate::liveness::LivenessProbe;
    use crate::storage::types::Device;
    use crate::storage::{MemoryStore, RecordStore};
    use crate::storage_locator::ConfiguredStorageLocator;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Unreachable;

    #[async_trait]
    impl LivenessProbe for Unreachable {
        async fn probe(&self, address: &str) -> Result<(), ProbeError> {
            Err(ProbeError::Unreachable(address.to_string()))
        }
    }

    fn state(root: &TempDir) -> AppState {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let hub = Arc::new(NotificationHub::new());
        let registry = Arc::new(MonitorRegistry::new());
        let monitor = Arc::new(FleetMonitor::new(
            registry.clone(),
            Arc::new(Unreachable),
            store.clone(),
            hub.clone(),
            Duration::from_secs(60),
        ));
        let supervisor = Arc::new(CaptureSupervisor::new(
            CaptureConfig {
                program: root.path().join("no-such-tool").to_string_lossy().into_owned(),
                ..CaptureConfig::default()
            },
            Arc::new(ConfiguredStorageLocator::new(root.path().to_path_buf(), None)),
            store.clone(),
            hub.clone(),
        ));
        AppState {
            store,
            hub,
            monitor,
            supervisor,
        }
    }

    #[test]
    fn capture_errors_map_to_http_statuses() {
        assert_eq!(capture_error_status(&CaptureError::AlreadyRecording), StatusCode::CONFLICT);
        assert_eq!(capture_error_status(&CaptureError::NotRecording), StatusCode::CONFLICT);
        assert_eq!(
            capture_error_status(&CaptureError::SpawnFailed("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn event_limit_is_clamped() {
        assert_eq!(EventsQuery { limit: None }.effective_limit(), 100);
        assert_eq!(EventsQuery { limit: Some(0) }.effective_limit(), 1);
        assert_eq!(EventsQuery { limit: Some(5000) }.effective_limit(), 1000);
    }

    #[tokio::test]
    async fn read_views_answer_ok() {
        let root = TempDir::new().unwrap();
        let state = state(&root);
        let device = Device::new("cam", "Cam", "127.0.0.1", "rtsp://127.0.0.1/");
        state.monitor.register(&device).await;

        assert_eq!(list_devices(state.clone()).await.unwrap().status(), StatusCode::OK);
        assert_eq!(list_sessions(state.clone()).await.unwrap().status(), StatusCode::OK);
        assert_eq!(
            list_events(EventsQuery::default(), state).await.unwrap().status(),
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn recording_requests_map_failures() {
        let root = TempDir::new().unwrap();
        let state = state(&root);

        let unknown = start_recording("ghost".into(), state.clone()).await.unwrap();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let idle = stop_recording("ghost".into(), state.clone()).await.unwrap();
        assert_eq!(idle.status(), StatusCode::CONFLICT);

        state
            .store
            .upsert_device(&Device::new("cam", "Cam", "127.0.0.1", "rtsp://127.0.0.1/"))
            .await
            .unwrap();
        let broken = start_recording("cam".into(), state.clone()).await.unwrap();
        assert_eq!(broken.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!state.supervisor.is_recording("cam"));
    }
}
