use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::monitor_registry::{MonitorRegistry, Transition};
use crate::error_handling::types::StorageError;
use crate::liveness::LivenessProbe;
use crate::notification_hub::NotificationHub;
use crate::storage::types::{Device, DeviceStatus, Event, EventType, Severity};
use crate::storage::RecordStore;

/// Outcome of one sweep, mostly for logging and tests.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    pub probed: usize,
    pub reachable: usize,
    pub transitions: Vec<Transition>,
}

/// Periodically probes every registered device and publishes status changes.
///
/// Probes of one sweep run concurrently and never hold the registry lock.
/// A status change is persisted, recorded as an event and broadcast exactly
/// once; repeated identical results are silent.
pub struct FleetMonitor {
    registry: Arc<MonitorRegistry>,
    probe: Arc<dyn LivenessProbe>,
    store: Arc<dyn RecordStore>,
    hub: Arc<NotificationHub>,
    offline_threshold: chrono::Duration,
}

impl FleetMonitor {
    pub fn new(
        registry: Arc<MonitorRegistry>,
        probe: Arc<dyn LivenessProbe>,
        store: Arc<dyn RecordStore>,
        hub: Arc<NotificationHub>,
        offline_threshold: Duration,
    ) -> Self {
        let offline_threshold = chrono::Duration::from_std(offline_threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));
        Self {
            registry,
            probe,
            store,
            hub,
            offline_threshold,
        }
    }

    pub fn registry(&self) -> &Arc<MonitorRegistry> {
        &self.registry
    }

    /// Starts tracking `device`. Re-registering refreshes its cached fields
    /// but keeps the current status.
    pub async fn register(&self, device: &Device) {
        self.register_at(device, Utc::now()).await
    }

    pub(crate) async fn register_at(&self, device: &Device, now: DateTime<Utc>) {
        if self.registry.register(device, now).await {
            info!("[{}] Monitoring started for {}", device.id, device.address);
        } else {
            debug!("[{}] Monitor entry refreshed", device.id);
        }
    }

    /// Stops tracking a device. Unknown ids are ignored.
    pub async fn deregister(&self, device_id: &str) {
        if self.registry.deregister(device_id).await {
            info!("[{}] Monitoring stopped", device_id);
        }
    }

    /// Registers every device currently in the record store.
    pub async fn load_from_store(&self) -> Result<usize, StorageError> {
        let devices = self.store.list_devices().await?;
        for device in &devices {
            self.register(device).await;
        }
        Ok(devices.len())
    }

    /// Probes all registered devices once.
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_inner(None).await
    }

    /// Like [`FleetMonitor::sweep`], but evaluates every result at `now`
    /// instead of the wall clock.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        self.sweep_inner(Some(now)).await
    }

    async fn sweep_inner(&self, now: Option<DateTime<Utc>>) -> SweepReport {
        let targets = self.registry.snapshot().await;
        let mut report = SweepReport {
            probed: targets.len(),
            ..SweepReport::default()
        };
        if targets.is_empty() {
            return report;
        }

        let mut probes = JoinSet::new();
        for entry in targets {
            let probe = Arc::clone(&self.probe);
            probes.spawn(async move {
                let result = probe.probe(&entry.address).await;
                (entry.device_id, result)
            });
        }

        let mut results = Vec::with_capacity(report.probed);
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((device_id, result)) => {
                    if let Err(e) = &result {
                        debug!("[{}] Probe failed: {}", device_id, e);
                    }
                    results.push((device_id, result.is_ok()));
                }
                Err(e) => error!("Probe task aborted: {}", e),
            }
        }

        let now = now.unwrap_or_else(Utc::now);
        for (device_id, reachable) in results {
            if reachable {
                report.reachable += 1;
            }
            if let Some(transition) = self
                .registry
                .record_probe(&device_id, reachable, now, self.offline_threshold)
                .await
            {
                self.publish(&transition).await;
                report.transitions.push(transition);
            }
        }

        debug!(
            "Sweep finished: {}/{} reachable, {} transitions",
            report.reachable,
            report.probed,
            report.transitions.len()
        );
        report
    }

    async fn publish(&self, t: &Transition) {
        let (event_type, severity, message) = match t.to {
            DeviceStatus::Active => (
                EventType::DeviceOnline,
                Severity::Info,
                format!("Device {} is online", t.device_name),
            ),
            DeviceStatus::Offline => (
                EventType::DeviceOffline,
                Severity::Warning,
                format!("Device {} went offline", t.device_name),
            ),
            DeviceStatus::Unknown => return,
        };
        match t.to {
            DeviceStatus::Offline => warn!("[{}] {} -> {}", t.device_id, t.from.as_str(), t.to.as_str()),
            _ => info!("[{}] {} -> {}", t.device_id, t.from.as_str(), t.to.as_str()),
        }

        if let Err(e) = self
            .store
            .update_device_status(&t.device_id, t.to, t.at)
            .await
        {
            error!("[{}] Failed to persist status: {}", t.device_id, e);
        }

        let event = Event::new(event_type, severity, Some(&t.device_id), message);
        if let Err(e) = self.store.insert_event(&event).await {
            error!("[{}] Failed to store event: {}", t.device_id, e);
        }
        self.hub.broadcast_event(&event).await;
        self.hub
            .broadcast_status(&t.device_id, t.to, t.recording)
            .await;
    }

    /// Spawns the periodic sweep loop.
    ///
    /// Devices already in the record store are registered first; the first
    /// sweep then runs immediately and every `interval` afterwards.
    pub fn run(self: &Arc<Self>, interval: Duration) -> SweepHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let monitor = Arc::clone(self);

        let task = tokio::spawn(async move {
            match monitor.load_from_store().await {
                Ok(count) => info!("Loaded {} devices for monitoring", count),
                Err(e) => error!("Failed to load devices from store: {}", e),
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Sweep loop started, interval {:?}", interval);

            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor.sweep().await;
                    }
                }
            }
            info!("Sweep loop stopped");
        });

        SweepHandle { token, task }
    }
}

/// Handle to a running sweep loop.
pub struct SweepHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Requests the loop to stop after the current sweep.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancels the loop and waits for it to exit.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            error!("Sweep loop task failed: {}", e);
        }
    }
}
