pub mod capture_supervisor;
pub mod configuration;
pub mod controller;
pub mod error_handling;
pub mod fleet_monitor;
pub mod liveness;
pub mod notification_hub;
pub mod storage;
pub mod storage_locator;
pub mod web_interface;

pub use controller::Controller;
