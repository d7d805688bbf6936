//! Event fan-out to connected WebSocket clients.
//!
//! Fire-and-forget: events are serialized once and pushed to every attached
//! subscriber with `try_send`. There is no queueing, replay, or delivery
//! guarantee: a subscriber with a full or closed channel just misses the
//! event.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// Per-subscriber outbound buffer. Slow readers start dropping events once
/// this many are in flight.
const SUBSCRIBER_BUFFER: usize = 32;

/// Event name for connection-status pushes.
pub const STATUS_EVENT: &str = "status";

/// Event name for scheduled-job list pushes.
pub const JOBS_EVENT: &str = "scheduledJobsUpdate";

/// A wire event pushed over the real-time channel.
#[derive(Debug, Clone, Serialize)]
pub struct WireEvent<T: Serialize> {
    pub event: &'static str,
    pub data: T,
}

impl<T: Serialize> WireEvent<T> {
    pub fn new(event: &'static str, data: T) -> Self {
        Self { event, data }
    }
}

/// A connected real-time subscriber.
struct Subscriber {
    tx: mpsc::Sender<String>,
}

impl Subscriber {
    /// Send a pre-serialized event. Returns `false` when the event was
    /// dropped (channel full or closed).
    fn send(&self, json: String) -> bool {
        self.tx.try_send(json).is_ok()
    }
}

/// Manages event broadcasting to connected clients.
pub struct Broadcaster {
    subscribers: RwLock<HashMap<String, Subscriber>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Attach a subscriber. Returns the receiving half the WebSocket write
    /// task drains.
    pub async fn subscribe(&self, id: String) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut subs = self.subscribers.write().await;
        let _ = subs.insert(id, Subscriber { tx });
        rx
    }

    /// Detach a subscriber by id.
    pub async fn unsubscribe(&self, id: &str) {
        let mut subs = self.subscribers.write().await;
        let _ = subs.remove(id);
    }

    /// Number of attached subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Broadcast an event to every attached subscriber.
    pub async fn publish<T: Serialize>(&self, event: &'static str, data: T) {
        let json = match serde_json::to_string(&WireEvent::new(event, data)) {
            Ok(j) => j,
            Err(e) => {
                warn!(event, error = %e, "failed to serialize broadcast event");
                return;
            }
        };
        let subs = self.subscribers.read().await;
        debug!(event, recipients = subs.len(), "broadcasting event");
        for (id, sub) in subs.iter() {
            if !sub.send(json.clone()) {
                debug!(subscriber = %id, event, "dropped event for slow or gone subscriber");
            }
        }
    }

    /// Send a single event to one subscriber (initial sync on connect).
    pub async fn send_to<T: Serialize>(&self, id: &str, event: &'static str, data: T) {
        let json = match serde_json::to_string(&WireEvent::new(event, data)) {
            Ok(j) => j,
            Err(e) => {
                warn!(event, error = %e, "failed to serialize sync event");
                return;
            }
        };
        let subs = self.subscribers.read().await;
        if let Some(sub) = subs.get(id)
            && !sub.send(json)
        {
            debug!(subscriber = %id, event, "dropped sync event");
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[tokio::test]
    async fn subscribe_and_count() {
        let bc = Broadcaster::new();
        assert_eq!(bc.subscriber_count().await, 0);
        let _rx1 = bc.subscribe("a".into()).await;
        let _rx2 = bc.subscribe("b".into()).await;
        assert_eq!(bc.subscriber_count().await, 2);
        bc.unsubscribe("a").await;
        assert_eq!(bc.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn unsubscribe_unknown_is_noop() {
        let bc = Broadcaster::new();
        bc.unsubscribe("ghost").await;
        assert_eq!(bc.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let bc = Broadcaster::new();
        let mut rx1 = bc.subscribe("a".into()).await;
        let mut rx2 = bc.subscribe("b".into()).await;

        bc.publish("status", serde_json::json!({"connected": false}))
            .await;

        let m1: Value = serde_json::from_str(&rx1.try_recv().unwrap()).unwrap();
        let m2: Value = serde_json::from_str(&rx2.try_recv().unwrap()).unwrap();
        assert_eq!(m1["event"], "status");
        assert_eq!(m1["data"]["connected"], false);
        assert_eq!(m1, m2);
    }

    #[tokio::test]
    async fn publish_to_nobody_does_not_panic() {
        let bc = Broadcaster::new();
        bc.publish("scheduledJobsUpdate", Vec::<u32>::new()).await;
    }

    #[tokio::test]
    async fn dropped_receiver_is_skipped() {
        let bc = Broadcaster::new();
        let rx = bc.subscribe("gone".into()).await;
        drop(rx);
        let mut rx_live = bc.subscribe("live".into()).await;

        bc.publish("status", serde_json::json!({"connected": true}))
            .await;

        // The live subscriber still gets the event.
        assert!(rx_live.try_recv().is_ok());
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let bc = Broadcaster::new();
        let mut rx = bc.subscribe("slow".into()).await;

        for _ in 0..(SUBSCRIBER_BUFFER + 5) {
            bc.publish("status", serde_json::json!({})).await;
        }

        // Exactly the buffered events arrive; the rest were dropped.
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_BUFFER);
    }

    #[tokio::test]
    async fn send_to_targets_one_subscriber() {
        let bc = Broadcaster::new();
        let mut rx1 = bc.subscribe("a".into()).await;
        let mut rx2 = bc.subscribe("b".into()).await;

        bc.send_to("a", "status", serde_json::json!({"connected": false}))
            .await;

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }
}
