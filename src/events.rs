//! Fan-out notification bus: every state-changing operation publishes here so
//! UI observers can refresh. Each subscriber owns a bounded mailbox; a slow
//! subscriber loses events rather than blocking the publisher.

use log::debug;
use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;
use tokio::sync::mpsc;

pub const EVENT_LOG_UPDATE: &str = "log_update";

const MAILBOX_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub kind: String,
    pub payload: Value,
}

#[derive(Default)]
pub struct EventBroadcaster {
    subscribers: Mutex<Vec<mpsc::Sender<Event>>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Delivery is best-effort: full mailboxes drop the event, closed
    /// mailboxes are pruned. Publishers never block and never fail.
    pub fn publish(&self, kind: &str, payload: Value) {
        let event = Event {
            kind: kind.to_string(),
            payload,
        };
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("subscriber mailbox full, dropping '{}' event", event.kind);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let bus = EventBroadcaster::new();
        let mut rx = bus.subscribe();
        bus.publish(EVENT_LOG_UPDATE, json!({"id": 1}));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EVENT_LOG_UPDATE);
        assert_eq!(event.payload["id"], 1);
    }

    #[tokio::test]
    async fn full_mailbox_drops_instead_of_blocking() {
        let bus = EventBroadcaster::new();
        let mut rx = bus.subscribe();
        for i in 0..(MAILBOX_CAPACITY + 10) {
            bus.publish("tick", json!({ "seq": i }));
        }
        // The first MAILBOX_CAPACITY events survive; the overflow was dropped.
        let mut received = 0;
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.payload["seq"], received);
            received += 1;
        }
        assert_eq!(received, MAILBOX_CAPACITY);
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let bus = EventBroadcaster::new();
        let rx = bus.subscribe();
        drop(rx);
        bus.publish("tick", json!({}));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
