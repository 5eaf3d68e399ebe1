//! In-process bus for committed queue mutations.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// A committed change to the queue, published for live displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    TicketIssued {
        ticket_number: u64,
        ticket_id: String,
        rolled_over: bool,
    },
    TicketCalled {
        ticket_number: u64,
        ticket_id: String,
        finalized: Option<u64>,
        missed: Vec<u64>,
    },
    QueueReset {
        /// "manual" or "scheduled"
        trigger: String,
        deleted_count: usize,
    },
}

impl QueueEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            QueueEvent::TicketIssued { .. } => "ticket_issued",
            QueueEvent::TicketCalled { .. } => "ticket_called",
            QueueEvent::QueueReset { .. } => "queue_reset",
        }
    }
}

/// Default channel capacity of a [`QueueBroadcaster`].
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Fan-out of [`QueueEvent`]s over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct QueueBroadcaster {
    sender: broadcast::Sender<QueueEvent>,
}

impl QueueBroadcaster {
    /// Create a new broadcaster with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: QueueEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(receivers) => trace!(event_type, receivers, "Published queue event"),
            Err(_) => trace!(event_type, "Queue event dropped, no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for QueueBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let broadcaster = QueueBroadcaster::default();
        broadcaster.publish(QueueEvent::QueueReset {
            trigger: "scheduled".to_string(),
            deleted_count: 0,
        });
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let broadcaster = QueueBroadcaster::new(8);
        let mut rx = broadcaster.subscribe();

        broadcaster.publish(QueueEvent::TicketIssued {
            ticket_number: 1,
            ticket_id: "t1".to_string(),
            rolled_over: false,
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "ticket_issued");
    }

    #[test]
    fn test_event_serialization() {
        let event = QueueEvent::TicketCalled {
            ticket_number: 4,
            ticket_id: "t4".to_string(),
            finalized: Some(3),
            missed: vec![],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ticket_called");
        assert_eq!(json["ticket_number"], 4);
        assert_eq!(json["finalized"], 3);
    }
}
