use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::capture_supervisor::{CaptureSupervisor, SessionHandle};
use crate::configuration::config::Config;
use crate::configuration::types::StorageBackend;
use crate::error_handling::types::{CaptureError, ControllerError, StorageError};
use crate::fleet_monitor::{FleetMonitor, MonitorRegistry, SweepHandle};
use crate::liveness::{build_probe, LivenessProbe};
use crate::notification_hub::NotificationHub;
use crate::storage::types::Device;
use crate::storage::{DatabaseStore, MemoryStore, RecordStore};
use crate::storage_locator::ConfiguredStorageLocator;
use crate::web_interface::{AppState, WebServer};

/// Owns every engine component and exposes the device-facing operations.
pub struct Controller {
    pub config: Config,
    store: Arc<dyn RecordStore>,
    hub: Arc<NotificationHub>,
    locator: Arc<ConfiguredStorageLocator>,
    monitor: Arc<FleetMonitor>,
    supervisor: Arc<CaptureSupervisor>,
}

impl Controller {
    /// Builds the engine from configuration, opening the configured store.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        config.validate()?;
        let store: Arc<dyn RecordStore> = match config.storage.backend {
            StorageBackend::Sqlite => {
                info!(
                    "Opening SQLite store at {}",
                    config.storage.database_path.display()
                );
                Arc::new(DatabaseStore::new_file(&config.storage.database_path).await?)
            }
            StorageBackend::Memory => {
                warn!("Using in-memory store, nothing will survive a restart");
                Arc::new(MemoryStore::new())
            }
        };
        let probe = build_probe(&config.monitor);
        Ok(Self::with_components(config, store, probe))
    }

    /// Builds the engine around an existing store and probe.
    pub fn with_components(
        config: Config,
        store: Arc<dyn RecordStore>,
        probe: Arc<dyn LivenessProbe>,
    ) -> Self {
        let hub = Arc::new(NotificationHub::new());
        let locator = Arc::new(ConfiguredStorageLocator::new(
            config.storage.local_root.clone(),
            config.storage.network_root.clone(),
        ));
        let registry = Arc::new(MonitorRegistry::new());
        let monitor = Arc::new(FleetMonitor::new(
            registry.clone(),
            probe,
            store.clone(),
            hub.clone(),
            config.offline_threshold(),
        ));
        let supervisor = Arc::new(
            CaptureSupervisor::new(
                config.capture.clone(),
                locator.clone(),
                store.clone(),
                hub.clone(),
            )
            .with_monitor_registry(registry),
        );

        Self {
            config,
            store,
            hub,
            locator,
            monitor,
            supervisor,
        }
    }

    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn locator(&self) -> &Arc<ConfiguredStorageLocator> {
        &self.locator
    }

    pub fn monitor(&self) -> &Arc<FleetMonitor> {
        &self.monitor
    }

    pub fn supervisor(&self) -> &Arc<CaptureSupervisor> {
        &self.supervisor
    }

    /// Shared handles for the web layer.
    pub fn web_state(&self) -> AppState {
        AppState {
            store: self.store.clone(),
            hub: self.hub.clone(),
            monitor: self.monitor.clone(),
            supervisor: self.supervisor.clone(),
        }
    }

    /// Upserts the `[[devices]]` from configuration into the store.
    pub async fn seed_devices(&self) -> Result<usize, ControllerError> {
        for device in self.config.devices.iter().map(|d| d.to_device()) {
            self.store.upsert_device(&device).await?;
            debug!("Seeded device {}", device.id);
        }
        Ok(self.config.devices.len())
    }

    /// Closes sessions and clears recording flags a previous run left open.
    pub async fn recover_interrupted(&self) -> Result<usize, ControllerError> {
        Ok(self.supervisor.recover_interrupted().await?)
    }

    /// Persists a device and starts monitoring it.
    pub async fn add_device(&self, device: &Device) -> Result<(), ControllerError> {
        self.store.upsert_device(device).await?;
        self.register_monitoring(device).await;
        Ok(())
    }

    pub async fn register_monitoring(&self, device: &Device) {
        self.monitor.register(device).await
    }

    pub async fn deregister_monitoring(&self, device_id: &str) {
        self.monitor.deregister(device_id).await
    }

    pub async fn start_recording(&self, device: &Device) -> Result<SessionHandle, ControllerError> {
        Ok(self.supervisor.start_recording(device).await?)
    }

    /// Looks the device up in the store and starts recording it.
    pub async fn start_recording_by_id(
        &self,
        device_id: &str,
    ) -> Result<SessionHandle, ControllerError> {
        let device = match self.store.get_device(device_id).await {
            Ok(device) => device,
            Err(StorageError::NotFound) => {
                return Err(ControllerError::DeviceNotFound(device_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        self.start_recording(&device).await
    }

    pub async fn stop_recording(&self, device_id: &str) -> Result<(), ControllerError> {
        Ok(self.supervisor.stop_recording(device_id).await?)
    }

    pub fn is_recording(&self, device_id: &str) -> bool {
        self.supervisor.is_recording(device_id)
    }

    pub async fn stop_all(&self) -> usize {
        self.supervisor.stop_all().await
    }

    pub fn start_sweep_loop(&self, interval: Duration) -> SweepHandle {
        self.monitor.run(interval)
    }

    /// Force-stops any recording and removes monitoring, so the device can
    /// be deleted.
    pub async fn release_device(&self, device_id: &str) -> Result<(), ControllerError> {
        match self.supervisor.stop_recording(device_id).await {
            Ok(()) => info!("[{}] Recording stopped for release", device_id),
            Err(CaptureError::NotRecording) => {}
            Err(e) => return Err(e.into()),
        }
        self.monitor.deregister(device_id).await;
        Ok(())
    }

    /// Runs until SIGINT/SIGTERM, then stops sweeping and every recording.
    ///
    /// Leftovers of an interrupted run are reconciled before the first sweep.
    pub async fn run(&self) -> Result<(), ControllerError> {
        info!("Starting controller");
        let seeded = self.seed_devices().await?;
        if seeded > 0 {
            info!("Seeded {} devices from configuration", seeded);
        }
        match self.recover_interrupted().await {
            Ok(0) => {}
            Ok(closed) => warn!("Closed {} recordings interrupted by the previous run", closed),
            Err(e) => error!("Unable to reconcile interrupted recordings: {}", e),
        }

        let web = if self.config.web.enabled {
            let server = WebServer::new(self.web_state());
            let addr = server
                .resolve(&self.config.web.bind_address, self.config.web.port)
                .await?;
            Some(tokio::spawn(async move { server.start(addr).await }))
        } else {
            info!("Web interface disabled");
            None
        };

        let sweeps = self.start_sweep_loop(self.config.sweep_interval());

        let signal = wait_for_stop_signal().await;
        info!("Received {}, shutting down", signal);

        sweeps.stop().await;
        let stopped = self.stop_all().await;
        info!("Stopped {} recordings", stopped);

        if let Some(web) = web {
            web.abort();
        }
        info!("Controller shut down");
        Ok(())
    }
}

#[cfg(unix)]
async fn wait_for_stop_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut terminate, mut interrupt) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(t), Ok(i)) => (t, i),
            (Err(e), _) | (_, Err(e)) => {
                error!("Cannot install signal handlers: {}", e);
                return ctrl_c_or_pending().await;
            }
        };

    tokio::select! {
        _ = terminate.recv() => "SIGTERM",
        _ = interrupt.recv() => "SIGINT",
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() -> &'static str {
    ctrl_c_or_pending().await
}

async fn ctrl_c_or_pending() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    "Ctrl-C"
}
