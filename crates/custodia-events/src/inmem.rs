//! Single-process event bus.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::bus::{fan_out, lock, register, EventBus, SubscriberMap, Subscription};
use crate::event::StorageEvent;

#[derive(Clone, Default)]
pub struct InMemEventBus {
    subscribers: Arc<SubscriberMap>,
}

impl InMemEventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Synchronous delivery path, shared with the pub/sub listener.
    pub(crate) fn deliver(&self, event: &StorageEvent) {
        fan_out(&self.subscribers, event);
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

#[async_trait]
impl EventBus for InMemEventBus {
    async fn publish(&self, event: StorageEvent) {
        self.deliver(&event);
    }

    async fn subscribe(&self) -> Subscription {
        register(&self.subscribers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EVENT_BUFFER_SIZE;
    use crate::event::StoragePingEvent;

    fn ping(message: &str) -> StorageEvent {
        StorageEvent::StoragePing(StoragePingEvent {
            message: Some(message.to_string()),
        })
    }

    #[tokio::test]
    async fn test_subscriber_receives_published_events() {
        let bus = InMemEventBus::new();
        let mut sub = bus.subscribe().await;

        bus.publish(ping("one")).await;
        bus.publish(ping("two")).await;

        match sub.recv().await {
            Some(StorageEvent::StoragePing(p)) => assert_eq!(p.message.as_deref(), Some("one")),
            other => panic!("unexpected event: {:?}", other),
        }
        match sub.recv().await {
            Some(StorageEvent::StoragePing(p)) => assert_eq!(p.message.as_deref(), Some("two")),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_disconnected() {
        let bus = InMemEventBus::new();
        let mut sub = bus.subscribe().await;

        for i in 0..=EVENT_BUFFER_SIZE {
            bus.publish(ping(&i.to_string())).await;
        }
        assert_eq!(bus.subscriber_count(), 0);

        // The buffered events drain, then the closed channel ends the stream.
        for _ in 0..EVENT_BUFFER_SIZE {
            assert!(sub.recv().await.is_some());
        }
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let bus = InMemEventBus::new();
        let sub = bus.subscribe().await;
        assert_eq!(bus.subscriber_count(), 1);

        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);

        bus.publish(ping("nobody home")).await;
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = InMemEventBus::new();
        let mut first = bus.subscribe().await;
        let mut second = bus.subscribe().await;

        bus.publish(ping("fan-out")).await;

        assert!(first.recv().await.is_some());
        assert!(second.recv().await.is_some());
    }
}
