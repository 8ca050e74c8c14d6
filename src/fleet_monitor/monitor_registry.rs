use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::storage::types::{Device, DeviceStatus};

/// In-memory liveness shadow of a device. Never persisted; rebuilt from the
/// record store on startup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorEntry {
    pub device_id: String,
    pub name: String,
    pub address: String,
    pub stream_url: String,
    pub status: DeviceStatus,
    /// Last successful probe, or registration time before the first one.
    pub last_seen: DateTime<Utc>,
    pub recording: bool,
}

/// A status change derived from one probe result.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub device_id: String,
    pub device_name: String,
    pub from: DeviceStatus,
    pub to: DeviceStatus,
    pub at: DateTime<Utc>,
    pub recording: bool,
}

/// Guarded map of monitor entries keyed by device id.
///
/// The lock is only held for the in-memory mutation itself; probing and
/// persistence happen outside of it.
pub struct MonitorRegistry {
    entries: RwLock<HashMap<String, MonitorEntry>>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts a new entry in `unknown` state, or refreshes the cached fields
    /// of an existing one without touching its status or last-seen time.
    ///
    /// Returns `true` when the device was not tracked before.
    pub async fn register(&self, device: &Device, now: DateTime<Utc>) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&device.id) {
            Some(entry) => {
                entry.name = device.name.clone();
                entry.address = device.address.clone();
                entry.stream_url = device.stream_url.clone();
                entry.recording = device.recording;
                false
            }
            None => {
                entries.insert(
                    device.id.clone(),
                    MonitorEntry {
                        device_id: device.id.clone(),
                        name: device.name.clone(),
                        address: device.address.clone(),
                        stream_url: device.stream_url.clone(),
                        status: DeviceStatus::Unknown,
                        last_seen: now,
                        recording: device.recording,
                    },
                );
                true
            }
        }
    }

    pub async fn deregister(&self, device_id: &str) -> bool {
        self.entries.write().await.remove(device_id).is_some()
    }

    pub async fn get(&self, device_id: &str) -> Option<MonitorEntry> {
        self.entries.read().await.get(device_id).cloned()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Copies every entry, sorted by device id.
    pub async fn snapshot(&self) -> Vec<MonitorEntry> {
        let mut entries: Vec<MonitorEntry> = self.entries.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        entries
    }

    /// Updates the cached recording flag; untracked devices are ignored.
    pub async fn set_recording(&self, device_id: &str, recording: bool) {
        if let Some(entry) = self.entries.write().await.get_mut(device_id) {
            entry.recording = recording;
        }
    }

    /// Folds one probe result into the entry and returns the resulting
    /// transition, if any.
    ///
    /// A success always refreshes `last_seen`. A failure only moves the device
    /// to `offline` once more than `offline_threshold` has elapsed since it was
    /// last seen. Entries removed while the probe was in flight yield `None`.
    pub async fn record_probe(
        &self,
        device_id: &str,
        reachable: bool,
        now: DateTime<Utc>,
        offline_threshold: Duration,
    ) -> Option<Transition> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(device_id)?;
        let from = entry.status;

        let to = if reachable {
            entry.last_seen = now;
            DeviceStatus::Active
        } else if now - entry.last_seen > offline_threshold {
            DeviceStatus::Offline
        } else {
            from
        };

        if to == from {
            return None;
        }
        entry.status = to;
        Some(Transition {
            device_id: entry.device_id.clone(),
            device_name: entry.name.clone(),
            from,
            to,
            at: now,
            recording: entry.recording,
        })
    }
}

impl Default for MonitorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str) -> Device {
        Device::new(id, id, "10.0.0.1", "rtsp://10.0.0.1/")
    }

    #[tokio::test]
    async fn failures_inside_threshold_are_debounced() {
        let registry = MonitorRegistry::new();
        let t0 = Utc::now();
        let threshold = Duration::seconds(60);
        registry.register(&device("a"), t0).await;

        assert_eq!(
            registry
                .record_probe("a", false, t0 + Duration::seconds(59), threshold)
                .await,
            None
        );
        let t = registry
            .record_probe("a", false, t0 + Duration::seconds(61), threshold)
            .await
            .unwrap();
        assert_eq!((t.from, t.to), (DeviceStatus::Unknown, DeviceStatus::Offline));
        assert_eq!(
            registry
                .record_probe("a", false, t0 + Duration::seconds(200), threshold)
                .await,
            None
        );
    }

    #[tokio::test]
    async fn refresh_keeps_status_and_last_seen() {
        let registry = MonitorRegistry::new();
        let t0 = Utc::now();
        assert!(registry.register(&device("a"), t0).await);
        registry
            .record_probe("a", true, t0, Duration::seconds(60))
            .await
            .unwrap();

        let mut renamed = device("a");
        renamed.name = "Lobby".into();
        renamed.recording = true;
        assert!(!registry.register(&renamed, t0 + Duration::seconds(30)).await);

        let entry = registry.get("a").await.unwrap();
        assert_eq!(entry.status, DeviceStatus::Active);
        assert_eq!(entry.last_seen, t0);
        assert_eq!(entry.name, "Lobby");
        assert!(entry.recording);
    }

    #[tokio::test]
    async fn removed_entries_produce_no_transition() {
        let registry = MonitorRegistry::new();
        registry.register(&device("a"), Utc::now()).await;
        assert!(registry.deregister("a").await);
        assert!(!registry.deregister("a").await);
        assert_eq!(
            registry
                .record_probe("a", true, Utc::now(), Duration::seconds(60))
                .await,
            None
        );
        assert!(registry.is_empty().await);
    }
}
