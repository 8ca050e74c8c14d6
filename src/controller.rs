//! Engine wiring.
//!
//! [`Controller`] builds the store, hub, storage locator, probe, fleet monitor
//! and capture supervisor from configuration, exposes the device-facing
//! operations and drives startup and graceful shutdown.

pub mod controller_handler;

pub use controller_handler::Controller;
