use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;
use tokio::time::timeout;

use super::prober::LivenessProbe;
use crate::error_handling::types::ProbeError;

/// Reachability through one ICMP echo sent by the system `ping` utility.
///
/// Only the host part of the address is pinged; a `:port` suffix is ignored.
pub struct PingProbe {
    timeout: Duration,
}

impl PingProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn host_of(address: &str) -> &str {
        let address = address.trim();
        if address.parse::<std::net::IpAddr>().is_ok() {
            return address;
        }
        if let Some(rest) = address.strip_prefix('[') {
            return rest.split(']').next().unwrap_or(rest);
        }
        match address.rsplit_once(':') {
            Some((host, port)) if port.parse::<u16>().is_ok() => host,
            _ => address,
        }
    }
}

#[async_trait]
impl LivenessProbe for PingProbe {
    async fn probe(&self, address: &str) -> Result<(), ProbeError> {
        let host = Self::host_of(address);
        if host.is_empty() || host.starts_with('-') || host.contains(char::is_whitespace) {
            return Err(ProbeError::InvalidAddress(address.to_string()));
        }
        let wait_secs = self.timeout.as_secs().max(1).to_string();

        let child = Command::new("ping")
            .args(["-c", "1", "-W", wait_secs.as_str(), host])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        // Extra second of slack: `ping -W` bounds the wait for the reply, not process startup.
        let result = match timeout(self.timeout + Duration::from_secs(1), child).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(ProbeError::Unreachable(format!(
                "ping exited with {}",
                status
            ))),
            Ok(Err(e)) => Err(ProbeError::Unreachable(format!("ping failed to run: {}", e))),
            Err(_) => Err(ProbeError::Timeout),
        };
        debug!("Ping probe {} -> {:?}", host, result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_is_extracted_from_address() {
        assert_eq!(PingProbe::host_of("10.0.0.4"), "10.0.0.4");
        assert_eq!(PingProbe::host_of("10.0.0.4:554"), "10.0.0.4");
        assert_eq!(PingProbe::host_of("cam.local"), "cam.local");
        assert_eq!(PingProbe::host_of("[fe80::1]:554"), "fe80::1");
        assert_eq!(PingProbe::host_of("fe80::1"), "fe80::1");
    }

    #[tokio::test]
    async fn option_like_hosts_are_rejected() {
        let probe = PingProbe::new(Duration::from_millis(200));
        assert!(matches!(
            probe.probe("-f").await,
            Err(ProbeError::InvalidAddress(_))
        ));
        assert!(matches!(
            probe.probe("   ").await,
            Err(ProbeError::InvalidAddress(_))
        ));
    }
}
