#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::error_handling::types::ProbeError;
    use crate::fleet_monitor::{FleetMonitor, MonitorRegistry};
    use crate::liveness::LivenessProbe;
    use crate::notification_hub::{HubMessage, NotificationHub};
    use crate::storage::types::{Device, DeviceStatus, EventType, Severity};
    use crate::storage::{MemoryStore, RecordStore};

    // Probe answering from a table keyed by address; unknown addresses are unreachable.
    #[derive(Default)]
    struct ScriptedProbe {
        reachable: Mutex<HashMap<String, bool>>,
    }

    impl ScriptedProbe {
        fn set(&self, address: &str, up: bool) {
            self.reachable.lock().unwrap().insert(address.to_string(), up);
        }
    }

    #[async_trait]
    impl LivenessProbe for ScriptedProbe {
        async fn probe(&self, address: &str) -> Result<(), ProbeError> {
            if address == "panic" {
                panic!("probe blew up");
            }
            let up = self.reachable.lock().unwrap().get(address).copied();
            match up {
                Some(true) => Ok(()),
                _ => Err(ProbeError::Unreachable(address.to_string())),
            }
        }
    }

    struct Fixture {
        monitor: Arc<FleetMonitor>,
        probe: Arc<ScriptedProbe>,
        store: Arc<MemoryStore>,
        hub: Arc<NotificationHub>,
    }

    fn fixture() -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();
        let probe = Arc::new(ScriptedProbe::default());
        let store = Arc::new(MemoryStore::new());
        let hub = Arc::new(NotificationHub::new());
        let monitor = Arc::new(FleetMonitor::new(
            Arc::new(MonitorRegistry::new()),
            probe.clone(),
            store.clone(),
            hub.clone(),
            Duration::from_secs(60),
        ));
        Fixture {
            monitor,
            probe,
            store,
            hub,
        }
    }

    // Devices use their id as probe address.
    async fn seed(f: &Fixture, id: &str) -> Device {
        let device = Device::new(id, &format!("Camera {}", id), id, &format!("rtsp://{}/stream", id));
        f.store.upsert_device(&device).await.unwrap();
        device
    }

    async fn event_types(store: &MemoryStore) -> Vec<EventType> {
        let mut events = store.list_events(100).await.unwrap();
        events.reverse();
        events.into_iter().map(|e| e.event_type).collect()
    }

    #[tokio::test]
    async fn repeated_successes_emit_a_single_online_event() {
        let f = fixture();
        let (_id, mut rx) = f.hub.register().await;
        let device = seed(&f, "cam-a").await;
        f.probe.set("cam-a", true);
        f.monitor.register(&device).await;

        let first = f.monitor.sweep().await;
        assert_eq!(first.transitions.len(), 1);
        assert_eq!(first.transitions[0].from, DeviceStatus::Unknown);
        assert_eq!(first.transitions[0].to, DeviceStatus::Active);

        for _ in 0..3 {
            assert!(f.monitor.sweep().await.transitions.is_empty());
        }

        assert_eq!(event_types(&f.store).await, vec![EventType::DeviceOnline]);
        let stored = f.store.get_device("cam-a").await.unwrap();
        assert_eq!(stored.status, DeviceStatus::Active);
        assert!(stored.last_seen.is_some());

        // One event message plus one device status message, nothing more.
        let mut kinds = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            let msg: HubMessage = serde_json::from_str(&raw).unwrap();
            kinds.push(msg.kind());
        }
        assert_eq!(kinds, vec!["event", "device_status"]);
    }

    #[tokio::test]
    async fn offline_only_after_threshold_since_last_seen() {
        let f = fixture();
        let t0 = Utc::now();
        let a = seed(&f, "a").await;
        let b = seed(&f, "b").await;
        let c = seed(&f, "c").await;
        f.probe.set("a", true);

        // b was last seen long before c was registered.
        f.monitor.register_at(&b, t0 - chrono::Duration::seconds(120)).await;
        f.monitor.register_at(&a, t0).await;
        f.monitor.register_at(&c, t0).await;

        let report = f.monitor.sweep_at(t0 + chrono::Duration::seconds(30)).await;
        assert_eq!(report.probed, 3);
        assert_eq!(report.reachable, 1);

        let registry = f.monitor.registry();
        assert_eq!(registry.get("a").await.unwrap().status, DeviceStatus::Active);
        assert_eq!(registry.get("b").await.unwrap().status, DeviceStatus::Offline);
        assert_eq!(registry.get("c").await.unwrap().status, DeviceStatus::Unknown);

        let events = f.store.list_events(10).await.unwrap();
        let offline: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == EventType::DeviceOffline)
            .collect();
        assert_eq!(offline.len(), 1);
        assert_eq!(offline[0].device_id.as_deref(), Some("b"));
        assert_eq!(offline[0].severity, Severity::Warning);
    }

    #[tokio::test]
    async fn events_follow_status_changes_only() {
        let f = fixture();
        let t0 = Utc::now();
        let device = seed(&f, "cam").await;
        f.monitor.register_at(&device, t0).await;
        let at = |secs: i64| t0 + chrono::Duration::seconds(secs);

        f.probe.set("cam", true);
        f.monitor.sweep_at(at(10)).await;
        f.probe.set("cam", false);
        f.monitor.sweep_at(at(40)).await;
        f.monitor.sweep_at(at(80)).await;
        f.monitor.sweep_at(at(120)).await;
        f.probe.set("cam", true);
        f.monitor.sweep_at(at(150)).await;
        f.monitor.sweep_at(at(180)).await;

        assert_eq!(
            event_types(&f.store).await,
            vec![
                EventType::DeviceOnline,
                EventType::DeviceOffline,
                EventType::DeviceOnline
            ]
        );
    }

    #[tokio::test]
    async fn deregistered_devices_are_no_longer_probed() {
        let f = fixture();
        let device = seed(&f, "cam").await;
        f.probe.set("cam", true);
        f.monitor.register(&device).await;
        f.monitor.deregister("cam").await;
        f.monitor.deregister("never-registered").await;

        let report = f.monitor.sweep().await;
        assert_eq!(report.probed, 0);
        assert!(f.store.list_events(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reregistering_keeps_current_status() {
        let f = fixture();
        let device = seed(&f, "cam").await;
        f.probe.set("cam", true);
        f.monitor.register(&device).await;
        f.monitor.sweep().await;

        f.monitor.register(&device).await;
        assert_eq!(
            f.monitor.registry().get("cam").await.unwrap().status,
            DeviceStatus::Active
        );
        assert!(f.monitor.sweep().await.transitions.is_empty());
    }

    #[tokio::test]
    async fn a_panicking_probe_does_not_break_the_sweep() {
        let f = fixture();
        let good = seed(&f, "good").await;
        let bad = Device::new("bad", "Bad", "panic", "rtsp://panic/");
        f.probe.set("good", true);
        f.monitor.register(&good).await;
        f.monitor.register(&bad).await;

        let report = f.monitor.sweep().await;
        assert_eq!(report.probed, 2);
        assert_eq!(report.transitions.len(), 1);
        assert_eq!(report.transitions[0].device_id, "good");
    }

    #[tokio::test]
    async fn storage_failures_do_not_block_notifications() {
        let f = fixture();
        let (_id, mut rx) = f.hub.register().await;
        // Never written to the store, so the status update fails.
        let ghost = Device::new("ghost", "Ghost", "ghost", "rtsp://ghost/");
        f.probe.set("ghost", true);
        f.monitor.register(&ghost).await;

        let report = f.monitor.sweep().await;
        assert_eq!(report.transitions.len(), 1);
        assert!(rx.try_recv().is_ok());
        assert_eq!(
            f.monitor.registry().get("ghost").await.unwrap().status,
            DeviceStatus::Active
        );
    }

    #[tokio::test]
    async fn run_loop_loads_devices_and_stops_on_cancel() {
        let f = fixture();
        seed(&f, "cam").await;
        f.probe.set("cam", true);

        let handle = f.monitor.run(Duration::from_millis(20));
        let registry = f.monitor.registry().clone();
        let became_active = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(entry) = registry.get("cam").await {
                    if entry.status == DeviceStatus::Active {
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(became_active.is_ok());

        handle.cancel();
        assert!(handle.is_cancelled());
        tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .unwrap();
        assert_eq!(event_types(&f.store).await, vec![EventType::DeviceOnline]);
    }
}
