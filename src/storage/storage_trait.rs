//! Record Store Trait
//!
//! This module defines the `RecordStore` trait, the persistence boundary of the
//! engine. The fleet monitor and capture supervisor only ever talk to the store
//! through it, so any backend (SQLite, in-memory, remote) can be injected.
//!
//! All methods return a `Result` to handle potential storage errors. Callers in
//! the engine log those errors and carry on with their in-memory state.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::storage::types::{Device, DeviceStatus, Event, Session};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetches a single device by id.
    async fn get_device(&self, id: &str) -> Result<Device, StorageError>;

    /// Lists every persisted device.
    async fn list_devices(&self) -> Result<Vec<Device>, StorageError>;

    /// Inserts a device or replaces its descriptive fields.
    ///
    /// Status, recording flag and last-seen time of an existing row are kept.
    async fn upsert_device(&self, device: &Device) -> Result<(), StorageError>;

    /// Persists a liveness status change.
    async fn update_device_status(
        &self,
        id: &str,
        status: DeviceStatus,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Persists the recording flag of a device.
    async fn set_recording_flag(
        &self,
        id: &str,
        recording: bool,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Writes a freshly created session row.
    async fn insert_session(&self, session: &Session) -> Result<(), StorageError>;

    /// Writes the terminal fields of a finalized session.
    async fn update_session_on_finalize(
        &self,
        id: Uuid,
        end_time: DateTime<Utc>,
        duration_secs: i64,
        file_size: u64,
    ) -> Result<(), StorageError>;

    /// Records where the still image of a session was written.
    async fn set_session_thumbnail(&self, id: Uuid, path: &Path) -> Result<(), StorageError>;

    async fn get_session(&self, id: Uuid) -> Result<Session, StorageError>;

    /// Lists sessions, most recent first.
    async fn list_sessions(&self) -> Result<Vec<Session>, StorageError>;

    async fn insert_event(&self, event: &Event) -> Result<(), StorageError>;

    /// Lists the most recent `limit` events, newest first.
    async fn list_events(&self, limit: usize) -> Result<Vec<Event>, StorageError>;
}
