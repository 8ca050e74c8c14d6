//! SeaORM entity models used by the database storage backend.
//!
//! These structs map to the SQLite tables created by `database_storage`:
//! - `devices` — device descriptors plus last persisted status
//! - `sessions` — recording sessions, live and finalized
//! - `events` — append-only audit trail

/// Devices table entity models.
pub mod devices {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "devices")]
    pub struct Model {
        /// Opaque device id
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub name: String,
        pub address: String,
        pub stream_url: String,
        pub username: Option<String>,
        pub password: Option<String>,
        pub motion_detection: bool,
        pub sensitivity: i32,
        /// `DeviceStatus` as string
        pub status: String,
        pub recording: bool,
        /// Optional RFC3339 timestamp of the last successful probe
        pub last_seen: Option<String>,
        /// RFC3339 timestamp of the last status or recording change
        pub updated_at: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// Sessions table entity models.
pub mod sessions {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "sessions")]
    pub struct Model {
        /// UUID as string primary key
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        /// Not a foreign key: sessions outlive their device
        pub device_id: String,
        pub device_name: String,
        /// RFC3339 start timestamp
        pub start_time: String,
        /// Optional RFC3339 end timestamp, unset while live
        pub end_time: Option<String>,
        pub duration_secs: Option<i64>,
        pub output_path: String,
        pub thumbnail_path: Option<String>,
        /// `TriggerReason` as string
        pub trigger: String,
        pub file_size: Option<i64>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// Events table entity models.
pub mod events {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "events")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        /// RFC3339 timestamp
        pub timestamp: String,
        pub event_type: String,
        pub message: String,
        pub device_id: Option<String>,
        pub severity: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
