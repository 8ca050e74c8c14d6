//! Fleet monitoring.
//!
//! Tracks the liveness of every registered device. A sweep probes all devices
//! concurrently, debounces failures against the offline threshold and emits
//! one event per status change.
//!
//! Re-exports:
//! - [`FleetMonitor`]: registration, sweeps and the periodic loop.
//! - [`MonitorRegistry`], [`MonitorEntry`]: the in-memory liveness shadow,
//!   shared with the capture supervisor for the cached recording flag.

pub mod monitor;
pub mod monitor_registry;
#[cfg(test)]
pub mod tests;

pub use monitor::{FleetMonitor, SweepHandle, SweepReport};
pub use monitor_registry::{MonitorEntry, MonitorRegistry, Transition};
