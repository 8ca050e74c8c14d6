//! Liveness probing.
//!
//! One probe call answers one question: did this endpoint respond within the
//! timeout? Debouncing and status derivation live in the fleet monitor.

pub mod ping_probe;
pub mod prober;
pub mod tcp_probe;

pub use ping_probe::PingProbe;
pub use prober::{build_probe, LivenessProbe};
pub use tcp_probe::TcpProbe;
