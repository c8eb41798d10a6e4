//! Event bus for command observability.
//!
//! Accepted commands are broadcast here so that loggers, reporters and tests
//! can observe them. State mutation does not depend on the bus: the
//! aggregator receives power changes through its own ordered intake queue.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::event::{CoolerEvent, EventMetadata};

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Broadcast event bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<(CoolerEvent, EventMetadata)>,
    name: String,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the specified capacity.
    ///
    /// The capacity determines how many events are buffered for slow subscribers.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            name: "default".to_string(),
        }
    }

    /// Create a new event bus with a name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            tx: broadcast::channel(DEFAULT_CHANNEL_CAPACITY).0,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event from the given source.
    ///
    /// Returns `true` if there was at least one subscriber. Without
    /// subscribers the event is discarded.
    pub fn publish(&self, event: CoolerEvent, source: impl Into<String>) -> bool {
        self.tx.send((event, EventMetadata::new(source))).is_ok()
    }

    /// Subscribe to all events published after this call.
    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver for events from the event bus.
pub struct EventBusReceiver {
    rx: broadcast::Receiver<(CoolerEvent, EventMetadata)>,
}

impl EventBusReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` once the bus is closed. Lagging receivers skip the
    /// events they missed and continue with the oldest one still buffered.
    pub async fn recv(&mut self) -> Option<(CoolerEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event bus receiver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<(CoolerEvent, EventMetadata)> {
        self.rx.try_recv().ok()
    }
}

/// Shared event bus handle.
pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let event = CoolerEvent::PowerStateChanged {
            device_id: "c1".to_string(),
            state: false,
        };
        assert!(bus.publish(event.clone(), "test"));

        let (received, meta) = rx.recv().await.unwrap();
        assert_eq!(received, event);
        assert_eq!(meta.source, "test");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::with_name("commands");
        assert_eq!(bus.name(), "commands");
        assert_eq!(bus.subscriber_count(), 0);
        assert!(!bus.publish(
            CoolerEvent::NightLightChanged {
                device_id: "c1".to_string(),
                state: true,
            },
            "test",
        ));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(
            CoolerEvent::MaintenanceModeChanged {
                device_id: "c2".to_string(),
                enabled: true,
            },
            "test",
        );

        assert_eq!(rx1.recv().await.unwrap().0.device_id(), "c2");
        assert_eq!(rx2.recv().await.unwrap().0.type_name(), "MaintenanceModeChanged");
    }
}
