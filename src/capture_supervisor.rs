//! Capture supervision.
//!
//! Runs one external capture process per recording device and turns its
//! lifecycle into durable session records, events and notifications.
//!
//! Re-exports:
//! - [`CaptureSupervisor`]: start/stop, the process-exit callback, shutdown.
//! - [`ProcessEvent`], [`SessionHandle`], [`SupervisorStats`]: core types.

pub mod command;
pub mod supervisor;
pub mod thumbnail;
pub mod types;

pub use supervisor::CaptureSupervisor;
pub use types::{ProcessEvent, SessionHandle, SupervisorStats};
