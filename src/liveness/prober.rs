use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::ping_probe::PingProbe;
use super::tcp_probe::TcpProbe;
use crate::configuration::types::{MonitorConfig, ProbeMethod};
use crate::error_handling::types::ProbeError;

/// A single reachability check against a network endpoint.
///
/// Implementations bound every call by their own timeout; `Ok(())` means the
/// endpoint answered.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn probe(&self, address: &str) -> Result<(), ProbeError>;
}

/// Builds the probe selected by the monitor configuration.
pub fn build_probe(config: &MonitorConfig) -> Arc<dyn LivenessProbe> {
    let timeout = Duration::from_millis(config.probe_timeout_ms);
    match config.probe_method {
        ProbeMethod::Tcp => Arc::new(TcpProbe::new(config.probe_port, timeout)),
        ProbeMethod::Ping => Arc::new(PingProbe::new(timeout)),
    }
}
