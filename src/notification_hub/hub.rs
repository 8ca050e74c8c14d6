use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::types::{DeviceStatusMessage, HubMessage, RecordingStatusMessage};
use crate::storage::types::{DeviceStatus, Event};

/// Fan-out point for real-time notifications.
///
/// Every observer gets its own unbounded channel of serialized messages.
/// Delivery is fire-and-forget: an observer whose receiver is gone is skipped
/// (and pruned), and nothing is replayed to observers that connect later.
pub struct NotificationHub {
    observers: RwLock<HashMap<Uuid, mpsc::UnboundedSender<String>>>,
    delivered: AtomicU64,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(HashMap::new()),
            delivered: AtomicU64::new(0),
        }
    }

    /// Registers a new observer and returns its id and message stream.
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.write().await.insert(id, tx);
        info!("Observer {} connected", id);
        (id, rx)
    }

    pub async fn unregister(&self, id: &Uuid) {
        if self.observers.write().await.remove(id).is_some() {
            info!("Observer {} disconnected", id);
        }
    }

    pub async fn observer_count(&self) -> usize {
        self.observers.read().await.len()
    }

    /// Total number of messages handed to observer channels since start.
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Sends `message` to every connected observer.
    pub async fn broadcast(&self, message: HubMessage) {
        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                error!("Failed to serialize {} message: {}", message.kind(), e);
                return;
            }
        };

        let mut closed = Vec::new();
        {
            let observers = self.observers.read().await;
            debug!(
                "Broadcasting {} message to {} observers",
                message.kind(),
                observers.len()
            );
            for (id, tx) in observers.iter() {
                if tx.send(json.clone()).is_err() {
                    closed.push(*id);
                } else {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if !closed.is_empty() {
            let mut observers = self.observers.write().await;
            for id in closed {
                warn!("Dropping observer {} with closed channel", id);
                observers.remove(&id);
            }
        }
    }

    pub async fn broadcast_status(&self, device_id: &str, status: DeviceStatus, recording: bool) {
        self.broadcast(HubMessage::DeviceStatus(DeviceStatusMessage {
            device_id: device_id.to_string(),
            status,
            recording,
        }))
        .await
    }

    pub async fn broadcast_recording(
        &self,
        device_id: &str,
        recording: bool,
        session_id: Option<Uuid>,
    ) {
        self.broadcast(HubMessage::RecordingStatus(RecordingStatusMessage {
            device_id: device_id.to_string(),
            recording,
            session_id,
        }))
        .await
    }

    pub async fn broadcast_event(&self, event: &Event) {
        self.broadcast(HubMessage::Event(event.clone())).await
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::{EventType, Severity};

    #[tokio::test]
    async fn every_observer_receives_broadcasts() {
        let hub = NotificationHub::new();
        let (_a, mut rx_a) = hub.register().await;
        let (_b, mut rx_b) = hub.register().await;

        hub.broadcast_status("cam-1", DeviceStatus::Active, false).await;

        for rx in [&mut rx_a, &mut rx_b] {
            let raw = rx.recv().await.unwrap();
            let msg: HubMessage = serde_json::from_str(&raw).unwrap();
            assert_eq!(
                msg,
                HubMessage::DeviceStatus(DeviceStatusMessage {
                    device_id: "cam-1".into(),
                    status: DeviceStatus::Active,
                    recording: false,
                })
            );
        }
        assert_eq!(hub.delivered_count(), 2);
    }

    #[tokio::test]
    async fn closed_observers_are_pruned() {
        let hub = NotificationHub::new();
        let (_a, rx_a) = hub.register().await;
        let (_b, mut rx_b) = hub.register().await;
        drop(rx_a);

        let event = Event::new(EventType::RecordingStarted, Severity::Info, Some("cam"), "go".into());
        hub.broadcast_event(&event).await;

        assert_eq!(hub.observer_count().await, 1);
        let raw = rx_b.recv().await.unwrap();
        assert!(raw.contains("\"type\":\"event\""));
        assert!(raw.contains("recording_started"));
    }

    #[tokio::test]
    async fn late_observers_get_no_replay() {
        let hub = NotificationHub::new();
        hub.broadcast_recording("cam", true, None).await;
        let (id, mut rx) = hub.register().await;
        assert!(rx.try_recv().is_err());
        hub.unregister(&id).await;
        assert_eq!(hub.observer_count().await, 0);
    }
}
