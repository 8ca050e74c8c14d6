use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;

use super::prober::LivenessProbe;
use crate::error_handling::types::ProbeError;

/// Reachability through a TCP connect.
///
/// A refused connection still proves the host answered, so it counts as
/// reachable. Only timeouts and routing/lookup failures are failures.
pub struct TcpProbe {
    default_port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(default_port: u16, timeout: Duration) -> Self {
        Self {
            default_port,
            timeout,
        }
    }

    /// Adds the default port to a bare host (`10.0.0.4`, `cam.local`, `[::1]`).
    fn with_port(&self, address: &str) -> String {
        let address = address.trim();
        if address.parse::<SocketAddr>().is_ok() {
            return address.to_string();
        }
        if let Ok(ip) = address.parse::<std::net::IpAddr>() {
            return SocketAddr::new(ip, self.default_port).to_string();
        }
        if address.starts_with('[') && address.ends_with(']') {
            return format!("{}:{}", address, self.default_port);
        }
        match address.rsplit_once(':') {
            Some((_, port)) if port.parse::<u16>().is_ok() => address.to_string(),
            _ => format!("{}:{}", address, self.default_port),
        }
    }
}

#[async_trait]
impl LivenessProbe for TcpProbe {
    async fn probe(&self, address: &str) -> Result<(), ProbeError> {
        if address.trim().is_empty() {
            return Err(ProbeError::InvalidAddress(address.to_string()));
        }
        let target = self.with_port(address);

        let attempt = async {
            let addr = lookup_host(target.as_str())
                .await
                .map_err(|e| ProbeError::InvalidAddress(format!("{}: {}", target, e)))?
                .next()
                .ok_or_else(|| ProbeError::InvalidAddress(target.clone()))?;
            match TcpStream::connect(addr).await {
                Ok(_) => Ok(()),
                Err(e) if e.kind() == ErrorKind::ConnectionRefused => Ok(()),
                Err(e) => Err(ProbeError::Unreachable(e.to_string())),
            }
        };

        let result = match timeout(self.timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout),
        };
        debug!("TCP probe {} -> {:?}", target, result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn probe() -> TcpProbe {
        TcpProbe::new(554, Duration::from_millis(500))
    }

    #[test]
    fn default_port_is_added_only_when_missing() {
        let p = probe();
        assert_eq!(p.with_port("10.0.0.4"), "10.0.0.4:554");
        assert_eq!(p.with_port("10.0.0.4:8554"), "10.0.0.4:8554");
        assert_eq!(p.with_port("cam.local"), "cam.local:554");
        assert_eq!(p.with_port("cam.local:80"), "cam.local:80");
        assert_eq!(p.with_port("::1"), "[::1]:554");
    }

    #[tokio::test]
    async fn listening_port_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert_eq!(probe().probe(&addr.to_string()).await, Ok(()));
    }

    #[tokio::test]
    async fn refused_connection_still_counts_as_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert_eq!(probe().probe(&addr.to_string()).await, Ok(()));
    }

    #[tokio::test]
    async fn garbage_address_is_rejected() {
        assert!(matches!(
            probe().probe("").await,
            Err(ProbeError::InvalidAddress(_))
        ));
        assert!(probe().probe("not a host name").await.is_err());
    }
}
