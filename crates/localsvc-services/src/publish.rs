use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{ServiceStatus, StatusEvent};

const BROADCAST_CAPACITY: usize = 256;

/// Receives status changes keyed by a per-service topic. Fire-and-forget.
pub trait StatusPublisher: Send + Sync {
    fn publish(&self, topic: &str, status: ServiceStatus);
}

/// Fan-out status events to every subscriber via a tokio broadcast channel.
pub struct EventBroadcaster {
    tx: broadcast::Sender<StatusEvent>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPublisher for EventBroadcaster {
    /// Silently drops the event if nobody is subscribed.
    fn publish(&self, topic: &str, status: ServiceStatus) {
        let event = StatusEvent {
            topic: topic.to_string(),
            status,
        };
        if self.tx.send(event).is_err() {
            debug!(topic = %topic, "no status subscribers");
        }
    }
}
