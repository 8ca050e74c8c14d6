//! Web interface.
//!
//! Serves the observer WebSocket at `/ws` and a small JSON API over the
//! engine: device and session listings, recent events and recording control.

pub mod routes;
pub mod types;
pub mod web_server;

pub use types::{ApiError, AppState};
pub use web_server::WebServer;
