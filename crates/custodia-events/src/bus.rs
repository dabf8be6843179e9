use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::event::StorageEvent;

/// Buffer size of the channel behind each subscription.
pub const EVENT_BUFFER_SIZE: usize = 16;

pub(crate) type SubscriberMap = Mutex<HashMap<Uuid, mpsc::Sender<StorageEvent>>>;

/// Fan-out of storage events to any number of subscribers.
///
/// Publishing is best-effort and never blocks: a subscriber whose buffer is
/// full gets disconnected rather than slowing the publisher down.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: StorageEvent);

    async fn subscribe(&self) -> Subscription;
}

/// A stream of events held open by one monitor client. Dropping the
/// subscription disconnects it from the bus.
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<StorageEvent>,
    subscribers: Weak<SubscriberMap>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<StorageEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            lock(&subscribers).remove(&self.id);
        }
    }
}

pub(crate) fn register(subscribers: &Arc<SubscriberMap>) -> Subscription {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER_SIZE);
    let id = Uuid::new_v4();
    lock(subscribers).insert(id, tx);

    Subscription {
        id,
        rx,
        subscribers: Arc::downgrade(subscribers),
    }
}

pub(crate) fn fan_out(subscribers: &SubscriberMap, event: &StorageEvent) {
    lock(subscribers).retain(|id, tx| match tx.try_send(event.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            tracing::warn!(subscription = %id, "subscriber buffer full, disconnecting");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    });
}

pub(crate) fn lock(
    subscribers: &SubscriberMap,
) -> MutexGuard<'_, HashMap<Uuid, mpsc::Sender<StorageEvent>>> {
    subscribers.lock().unwrap_or_else(PoisonError::into_inner)
}
