use std::net::{IpAddr, SocketAddr};

use log::info;
use tokio::net::TcpListener;
use warp::{Filter, Rejection, Reply};

use super::routes::{
    devices_route, events_route, observer_route, sessions_route, start_recording_route,
    stop_recording_route,
};
use super::types::AppState;
use crate::error_handling::types::WebError;

/// Observer WebSocket plus a small JSON API over the engine.
pub struct WebServer {
    state: AppState,
}

impl WebServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Parses the bind address and checks that the port can be bound.
    pub async fn resolve(&self, bind_address: &str, port: u16) -> Result<SocketAddr, WebError> {
        let ip: IpAddr = bind_address
            .parse()
            .map_err(|e| WebError::BindFailed(format!("{}: {}", bind_address, e)))?;
        let addr = SocketAddr::new(ip, port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| WebError::BindFailed(format!("{}: {}", addr, e)))?;
        drop(listener);
        Ok(addr)
    }

    pub fn routes(&self) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
        observer_route(self.state.clone())
            .or(devices_route(self.state.clone()))
            .or(sessions_route(self.state.clone()))
            .or(events_route(self.state.clone()))
            .or(start_recording_route(self.state.clone()))
            .or(stop_recording_route(self.state.clone()))
    }

    /// Serves until the task is aborted.
    pub async fn start(self, addr: SocketAddr) -> Result<(), WebError> {
        info!("Web interface listening on http://{}", addr);
        warp::serve(self.routes()).run(addr).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::config::Config;
    use crate::controller::Controller;
    use crate::liveness::TcpProbe;
    use crate::storage::MemoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn server() -> WebServer {
        let controller = Controller::with_components(
            Config::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(TcpProbe::new(554, Duration::from_millis(100))),
        );
        WebServer::new(controller.web_state())
    }

    #[tokio::test]
    async fn bad_bind_addresses_are_rejected() {
        let server = server();
        assert!(matches!(
            server.resolve("not-an-ip", 8080).await,
            Err(WebError::BindFailed(_))
        ));

        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        assert!(server.resolve("127.0.0.1", port).await.is_err());
    }

    #[tokio::test]
    async fn free_ports_resolve() {
        let addr = server().resolve("127.0.0.1", 0).await.unwrap();
        assert!(addr.ip().is_loopback());
    }
}
