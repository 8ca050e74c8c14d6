use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error};
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::RecordStore;
use crate::storage::types::{Device, DeviceStatus, Event, Session};

#[derive(Default)]
struct Tables {
    devices: HashMap<String, Device>,
    sessions: HashMap<Uuid, Session>,
    events: Vec<Event>,
}

/// Non-persistent record store keeping everything in process memory.
///
/// Selected with `backend = "memory"`; state is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>, StorageError> {
        self.tables.lock().map_err(|e| {
            error!("MemoryStore lock poisoned: {}", e);
            StorageError::ConnectionFailed
        })
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_device(&self, id: &str) -> Result<Device, StorageError> {
        self.lock()?
            .devices
            .get(id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn list_devices(&self) -> Result<Vec<Device>, StorageError> {
        let mut devices: Vec<Device> = self.lock()?.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(devices)
    }

    async fn upsert_device(&self, device: &Device) -> Result<(), StorageError> {
        let mut tables = self.lock()?;
        match tables.devices.get_mut(&device.id) {
            Some(existing) => {
                existing.name = device.name.clone();
                existing.address = device.address.clone();
                existing.stream_url = device.stream_url.clone();
                existing.username = device.username.clone();
                existing.password = device.password.clone();
                existing.motion_detection = device.motion_detection;
                existing.sensitivity = device.sensitivity;
            }
            None => {
                tables.devices.insert(device.id.clone(), device.clone());
            }
        }
        debug!("Upserted device {}", device.id);
        Ok(())
    }

    async fn update_device_status(
        &self,
        id: &str,
        status: DeviceStatus,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut tables = self.lock()?;
        let device = tables.devices.get_mut(id).ok_or(StorageError::NotFound)?;
        device.status = status;
        if status == DeviceStatus::Active {
            device.last_seen = Some(timestamp);
        }
        Ok(())
    }

    async fn set_recording_flag(
        &self,
        id: &str,
        recording: bool,
        _timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut tables = self.lock()?;
        let device = tables.devices.get_mut(id).ok_or(StorageError::NotFound)?;
        device.recording = recording;
        Ok(())
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StorageError> {
        let mut tables = self.lock()?;
        if tables.sessions.contains_key(&session.id) {
            return Err(StorageError::WriteFailed);
        }
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn update_session_on_finalize(
        &self,
        id: Uuid,
        end_time: DateTime<Utc>,
        duration_secs: i64,
        file_size: u64,
    ) -> Result<(), StorageError> {
        let mut tables = self.lock()?;
        let session = tables
            .sessions
            .get_mut(&id)
            .filter(|s| s.is_live())
            .ok_or(StorageError::NotFound)?;
        session.end_time = Some(end_time);
        session.duration_secs = Some(duration_secs);
        session.file_size = Some(file_size);
        Ok(())
    }

    async fn set_session_thumbnail(&self, id: Uuid, path: &Path) -> Result<(), StorageError> {
        let mut tables = self.lock()?;
        let session = tables.sessions.get_mut(&id).ok_or(StorageError::NotFound)?;
        session.thumbnail_path = Some(path.to_path_buf());
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Session, StorageError> {
        self.lock()?
            .sessions
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StorageError> {
        let mut sessions: Vec<Session> = self.lock()?.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(sessions)
    }

    async fn insert_event(&self, event: &Event) -> Result<(), StorageError> {
        self.lock()?.events.push(event.clone());
        Ok(())
    }

    async fn list_events(&self, limit: usize) -> Result<Vec<Event>, StorageError> {
        let tables = self.lock()?;
        let mut events = tables.events.clone();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.truncate(limit);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::{EventType, Severity, TriggerReason};
    use std::path::PathBuf;

    #[tokio::test]
    async fn finalize_only_touches_live_sessions() {
        let store = MemoryStore::new();
        let session = Session {
            id: Uuid::new_v4(),
            device_id: "cam".into(),
            device_name: "Cam".into(),
            start_time: Utc::now(),
            end_time: None,
            duration_secs: None,
            output_path: PathBuf::from("out.mp4"),
            thumbnail_path: None,
            trigger: TriggerReason::Manual,
            file_size: None,
        };
        store.insert_session(&session).await.unwrap();
        store
            .update_session_on_finalize(session.id, Utc::now(), 3, 10)
            .await
            .unwrap();
        assert!(store
            .update_session_on_finalize(session.id, Utc::now(), 4, 20)
            .await
            .is_err());
        assert_eq!(store.get_session(session.id).await.unwrap().file_size, Some(10));
    }

    #[tokio::test]
    async fn status_updates_require_a_known_device() {
        let store = MemoryStore::new();
        assert_eq!(
            store
                .update_device_status("ghost", DeviceStatus::Active, Utc::now())
                .await
                .unwrap_err(),
            StorageError::NotFound
        );
        store
            .upsert_device(&Device::new("cam", "Cam", "127.0.0.1", "rtsp://127.0.0.1/"))
            .await
            .unwrap();
        store
            .update_device_status("cam", DeviceStatus::Active, Utc::now())
            .await
            .unwrap();
        store
            .insert_event(&Event::new(EventType::DeviceOnline, Severity::Info, Some("cam"), "up".into()))
            .await
            .unwrap();
        assert_eq!(store.get_device("cam").await.unwrap().status, DeviceStatus::Active);
        assert_eq!(store.list_events(10).await.unwrap().len(), 1);
    }
}
