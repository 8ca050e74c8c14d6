//! Storage subsystem
//!
//! This module provides the record store boundary used by the engine to
//! persist devices, recording sessions and events.
//!
//! Components:
//! - `storage_trait`: the `RecordStore` trait defining a uniform async API.
//! - `types`: shared record types (Device, Session, Event and their enums).
//! - `database_storage`: ORM-based SQLite implementation using SeaORM.
//! - `memory_storage`: in-process implementation with no persistence.
//! - `db_entities`: SeaORM entity models for the database backend.

pub mod database_storage;
pub mod db_entities;
pub mod memory_storage;
pub mod storage_trait;
pub mod types;

pub use database_storage::DatabaseStore;
pub use memory_storage::MemoryStore;
pub use storage_trait::RecordStore;
