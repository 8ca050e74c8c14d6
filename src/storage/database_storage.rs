use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, error, info};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Schema,
};
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::storage::db_entities::{devices, events, sessions};
use crate::storage::storage_trait::RecordStore;
use crate::storage::types::{
    Device, DeviceStatus, Event, EventType, Session, Severity, TriggerReason,
};

/// Timestamps are written with a fixed precision so that string ordering
/// matches chronological ordering.
fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            error!("Invalid timestamp {:?} in database: {}", value, e);
            StorageError::ReadFailed
        })
}

fn device_from_row(row: devices::Model) -> Result<Device, StorageError> {
    Ok(Device {
        id: row.id,
        name: row.name,
        address: row.address,
        stream_url: row.stream_url,
        username: row.username,
        password: row.password,
        motion_detection: row.motion_detection,
        sensitivity: row.sensitivity.clamp(0, 100) as u8,
        status: DeviceStatus::parse(&row.status),
        recording: row.recording,
        last_seen: row.last_seen.as_deref().map(parse_ts).transpose()?,
    })
}

fn session_from_row(row: sessions::Model) -> Result<Session, StorageError> {
    Ok(Session {
        id: Uuid::parse_str(&row.id).map_err(|_| StorageError::ReadFailed)?,
        device_id: row.device_id,
        device_name: row.device_name,
        start_time: parse_ts(&row.start_time)?,
        end_time: row.end_time.as_deref().map(parse_ts).transpose()?,
        duration_secs: row.duration_secs,
        output_path: PathBuf::from(row.output_path),
        thumbnail_path: row.thumbnail_path.map(PathBuf::from),
        trigger: TriggerReason::parse(&row.trigger),
        file_size: row.file_size.map(|s| s.max(0) as u64),
    })
}

fn event_from_row(row: events::Model) -> Result<Event, StorageError> {
    Ok(Event {
        id: Uuid::parse_str(&row.id).map_err(|_| StorageError::ReadFailed)?,
        timestamp: parse_ts(&row.timestamp)?,
        event_type: EventType::parse(&row.event_type).ok_or(StorageError::ReadFailed)?,
        message: row.message,
        device_id: row.device_id,
        severity: Severity::parse(&row.severity),
    })
}

/// SQLite-backed record store built on SeaORM.
pub struct DatabaseStore {
    db: DatabaseConnection,
}

impl DatabaseStore {
    /// Opens (creating if missing) the database file at `path` and ensures the schema exists.
    pub async fn new_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    error!("Failed to create database directory {}: {}", parent.display(), e);
                    StorageError::WriteFailed
                })?;
            }
        }
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let mut opts = ConnectOptions::new(url);
        opts.max_connections(5).sqlx_logging(false);
        let store = Self::connect(opts).await?;
        info!("DatabaseStore opened at {}", path.display());
        Ok(store)
    }

    /// Opens a private in-memory database. A single pooled connection keeps
    /// every query on the same database.
    pub async fn new_in_memory() -> Result<Self, StorageError> {
        let mut opts = ConnectOptions::new("sqlite::memory:".to_string());
        opts.max_connections(1).min_connections(1).sqlx_logging(false);
        Self::connect(opts).await
    }

    async fn connect(opts: ConnectOptions) -> Result<Self, StorageError> {
        let db = Database::connect(opts).await.map_err(|e| {
            error!("Failed to connect to database: {}", e);
            StorageError::ConnectionFailed
        })?;
        let store = Self { db };
        store.create_table(devices::Entity).await?;
        store.create_table(sessions::Entity).await?;
        store.create_table(events::Entity).await?;
        Ok(store)
    }

    async fn create_table<E: EntityTrait>(&self, entity: E) -> Result<(), StorageError> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);
        let mut stmt = schema.create_table_from_entity(entity);
        stmt.if_not_exists();
        self.db.execute(backend.build(&stmt)).await.map_err(|e| {
            error!("Failed to create table: {}", e);
            StorageError::WriteFailed
        })?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for DatabaseStore {
    async fn get_device(&self, id: &str) -> Result<Device, StorageError> {
        let row = devices::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await
            .map_err(|e| {
                error!("Failed to load device {}: {}", id, e);
                StorageError::ReadFailed
            })?
            .ok_or(StorageError::NotFound)?;
        device_from_row(row)
    }

    async fn list_devices(&self) -> Result<Vec<Device>, StorageError> {
        let rows = devices::Entity::find()
            .order_by_asc(devices::Column::Id)
            .all(&self.db)
            .await
            .map_err(|e| {
                error!("Failed to list devices: {}", e);
                StorageError::ReadFailed
            })?;
        rows.into_iter().map(device_from_row).collect()
    }

    async fn upsert_device(&self, device: &Device) -> Result<(), StorageError> {
        let model = devices::ActiveModel {
            id: Set(device.id.clone()),
            name: Set(device.name.clone()),
            address: Set(device.address.clone()),
            stream_url: Set(device.stream_url.clone()),
            username: Set(device.username.clone()),
            password: Set(device.password.clone()),
            motion_detection: Set(device.motion_detection),
            sensitivity: Set(device.sensitivity as i32),
            status: Set(device.status.as_str().to_string()),
            recording: Set(device.recording),
            last_seen: Set(device.last_seen.map(ts)),
            updated_at: Set(Some(ts(Utc::now()))),
        };
        devices::Entity::insert(model)
            .on_conflict(
                OnConflict::column(devices::Column::Id)
                    .update_columns([
                        devices::Column::Name,
                        devices::Column::Address,
                        devices::Column::StreamUrl,
                        devices::Column::Username,
                        devices::Column::Password,
                        devices::Column::MotionDetection,
                        devices::Column::Sensitivity,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .map_err(|e| {
                error!("Failed to upsert device {}: {}", device.id, e);
                StorageError::WriteFailed
            })?;
        debug!("Upserted device {}", device.id);
        Ok(())
    }

    async fn update_device_status(
        &self,
        id: &str,
        status: DeviceStatus,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut update = devices::Entity::update_many()
            .col_expr(devices::Column::Status, Expr::value(status.as_str()))
            .col_expr(devices::Column::UpdatedAt, Expr::value(ts(timestamp)));
        if status == DeviceStatus::Active {
            update = update.col_expr(devices::Column::LastSeen, Expr::value(ts(timestamp)));
        }
        let result = update
            .filter(devices::Column::Id.eq(id))
            .exec(&self.db)
            .await
            .map_err(|e| {
                error!("Failed to update status of device {}: {}", id, e);
                StorageError::WriteFailed
            })?;
        if result.rows_affected == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn set_recording_flag(
        &self,
        id: &str,
        recording: bool,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let result = devices::Entity::update_many()
            .col_expr(devices::Column::Recording, Expr::value(recording))
            .col_expr(devices::Column::UpdatedAt, Expr::value(ts(timestamp)))
            .filter(devices::Column::Id.eq(id))
            .exec(&self.db)
            .await
            .map_err(|e| {
                error!("Failed to set recording flag of device {}: {}", id, e);
                StorageError::WriteFailed
            })?;
        if result.rows_affected == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StorageError> {
        let model = sessions::ActiveModel {
            id: Set(session.id.to_string()),
            device_id: Set(session.device_id.clone()),
            device_name: Set(session.device_name.clone()),
            start_time: Set(ts(session.start_time)),
            end_time: Set(session.end_time.map(ts)),
            duration_secs: Set(session.duration_secs),
            output_path: Set(session.output_path.to_string_lossy().into_owned()),
            thumbnail_path: Set(session
                .thumbnail_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())),
            trigger: Set(session.trigger.as_str().to_string()),
            file_size: Set(session.file_size.map(|s| s as i64)),
        };
        sessions::Entity::insert(model)
            .exec_without_returning(&self.db)
            .await
            .map_err(|e| {
                error!("[{}] Failed to insert session: {}", session.id, e);
                StorageError::WriteFailed
            })?;
        Ok(())
    }

    async fn update_session_on_finalize(
        &self,
        id: Uuid,
        end_time: DateTime<Utc>,
        duration_secs: i64,
        file_size: u64,
    ) -> Result<(), StorageError> {
        let result = sessions::Entity::update_many()
            .col_expr(sessions::Column::EndTime, Expr::value(ts(end_time)))
            .col_expr(sessions::Column::DurationSecs, Expr::value(duration_secs))
            .col_expr(sessions::Column::FileSize, Expr::value(file_size as i64))
            .filter(sessions::Column::Id.eq(id.to_string()))
            .filter(sessions::Column::EndTime.is_null())
            .exec(&self.db)
            .await
            .map_err(|e| {
                error!("[{}] Failed to finalize session: {}", id, e);
                StorageError::WriteFailed
            })?;
        if result.rows_affected == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn set_session_thumbnail(&self, id: Uuid, path: &Path) -> Result<(), StorageError> {
        let result = sessions::Entity::update_many()
            .col_expr(
                sessions::Column::ThumbnailPath,
                Expr::value(path.to_string_lossy().into_owned()),
            )
            .filter(sessions::Column::Id.eq(id.to_string()))
            .exec(&self.db)
            .await
            .map_err(|e| {
                error!("[{}] Failed to store thumbnail path: {}", id, e);
                StorageError::WriteFailed
            })?;
        if result.rows_affected == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Session, StorageError> {
        let row = sessions::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await
            .map_err(|_| StorageError::ReadFailed)?
            .ok_or(StorageError::NotFound)?;
        session_from_row(row)
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StorageError> {
        let rows = sessions::Entity::find()
            .order_by_desc(sessions::Column::StartTime)
            .all(&self.db)
            .await
            .map_err(|e| {
                error!("Failed to list sessions: {}", e);
                StorageError::ReadFailed
            })?;
        rows.into_iter().map(session_from_row).collect()
    }

    async fn insert_event(&self, event: &Event) -> Result<(), StorageError> {
        let model = events::ActiveModel {
            id: Set(event.id.to_string()),
            timestamp: Set(ts(event.timestamp)),
            event_type: Set(event.event_type.as_str().to_string()),
            message: Set(event.message.clone()),
            device_id: Set(event.device_id.clone()),
            severity: Set(event.severity.as_str().to_string()),
        };
        events::Entity::insert(model)
            .exec_without_returning(&self.db)
            .await
            .map_err(|e| {
                error!("Failed to insert event {}: {}", event.id, e);
                StorageError::WriteFailed
            })?;
        Ok(())
    }

    async fn list_events(&self, limit: usize) -> Result<Vec<Event>, StorageError> {
        let rows = events::Entity::find()
            .order_by_desc(events::Column::Timestamp)
            .limit(limit as u64)
            .all(&self.db)
            .await
            .map_err(|e| {
                error!("Failed to list events: {}", e);
                StorageError::ReadFailed
            })?;
        rows.into_iter().map(event_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn temp_db() -> (TempDir, DatabaseStore) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.sqlite3");
        let store = DatabaseStore::new_file(&path).await.unwrap();
        (dir, store)
    }

    fn session_for(device: &Device) -> Session {
        Session {
            id: Uuid::new_v4(),
            device_id: device.id.clone(),
            device_name: device.name.clone(),
            start_time: Utc::now(),
            end_time: None,
            duration_secs: None,
            output_path: PathBuf::from("/tmp/out.mp4"),
            thumbnail_path: None,
            trigger: TriggerReason::Manual,
            file_size: None,
        }
    }

    #[tokio::test]
    async fn test_db_device_upsert_keeps_runtime_fields() {
        let (_dir, storage) = temp_db().await;
        let mut device = Device::new("cam-1", "Front door", "10.0.0.5", "rtsp://10.0.0.5/live");
        storage.upsert_device(&device).await.unwrap();
        storage
            .update_device_status("cam-1", DeviceStatus::Active, Utc::now())
            .await
            .unwrap();
        storage
            .set_recording_flag("cam-1", true, Utc::now())
            .await
            .unwrap();

        device.name = "Front porch".into();
        storage.upsert_device(&device).await.unwrap();

        let loaded = storage.get_device("cam-1").await.unwrap();
        assert_eq!(loaded.name, "Front porch");
        assert_eq!(loaded.status, DeviceStatus::Active);
        assert!(loaded.recording);
        assert!(loaded.last_seen.is_some());
        assert_eq!(storage.list_devices().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_db_missing_device() {
        let (_dir, storage) = temp_db().await;
        assert_eq!(
            storage.get_device("nope").await.unwrap_err(),
            StorageError::NotFound
        );
        assert_eq!(
            storage
                .update_device_status("nope", DeviceStatus::Offline, Utc::now())
                .await
                .unwrap_err(),
            StorageError::NotFound
        );
    }

    #[tokio::test]
    async fn test_db_session_finalize_is_single_shot() {
        let (_dir, storage) = temp_db().await;
        let device = Device::new("cam-2", "Garage", "10.0.0.6", "rtsp://10.0.0.6/live");
        let session = session_for(&device);
        storage.insert_session(&session).await.unwrap();

        let end = Utc::now();
        storage
            .update_session_on_finalize(session.id, end, 12, 4096)
            .await
            .unwrap();
        let second = storage
            .update_session_on_finalize(session.id, end, 99, 1)
            .await;
        assert_eq!(second.unwrap_err(), StorageError::NotFound);

        let loaded = storage.get_session(session.id).await.unwrap();
        assert_eq!(loaded.duration_secs, Some(12));
        assert_eq!(loaded.file_size, Some(4096));
        assert!(!loaded.is_live());
        assert_eq!(loaded.device_name, "Garage");
    }

    #[tokio::test]
    async fn test_db_events_newest_first_with_limit() {
        let storage = DatabaseStore::new_in_memory().await.unwrap();
        for i in 0..5 {
            let mut event = Event::new(
                EventType::DeviceOnline,
                Severity::Info,
                Some("cam-1"),
                format!("event {}", i),
            );
            event.timestamp = Utc::now() + chrono::Duration::seconds(i);
            storage.insert_event(&event).await.unwrap();
        }
        let events = storage.list_events(3).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].message, "event 4");
        assert_eq!(events[2].message, "event 2");
    }

    #[tokio::test]
    async fn test_db_thumbnail_path_is_recorded_after_capture() {
        let (_dir, storage) = temp_db().await;
        let device = Device::new("yard", "Yard", "10.0.0.9", "rtsp://10.0.0.9/");
        storage.upsert_device(&device).await.unwrap();
        let session = session_for(&device);
        storage.insert_session(&session).await.unwrap();
        assert_eq!(storage.get_session(session.id).await.unwrap().thumbnail_path, None);

        let thumb = PathBuf::from("/tmp/out_thumb.jpg");
        storage.set_session_thumbnail(session.id, &thumb).await.unwrap();
        assert_eq!(
            storage.get_session(session.id).await.unwrap().thumbnail_path,
            Some(thumb.clone())
        );
        assert_eq!(
            storage
                .set_session_thumbnail(Uuid::new_v4(), &thumb)
                .await
                .unwrap_err(),
            StorageError::NotFound
        );
    }
}
