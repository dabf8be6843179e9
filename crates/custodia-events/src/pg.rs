//! Pub/sub event bus over PostgreSQL LISTEN/NOTIFY.
//!
//! Events published here reach subscribers in every replica: publishing
//! sends the serialized envelope through `pg_notify`, and a listener task
//! per process receives notifications and fans them out locally. The
//! listener reconnects with a fixed delay when the connection drops.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::PgPool;

use crate::bus::{EventBus, Subscription};
use crate::event::StorageEvent;
use crate::inmem::InMemEventBus;

/// Channel name for storage event notifications.
pub const EVENT_CHANNEL: &str = "custodia_storage_events";

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct PgEventBus {
    pool: PgPool,
    local: InMemEventBus,
}

impl PgEventBus {
    pub fn new(pool: PgPool) -> Self {
        let bus = Self {
            pool,
            local: InMemEventBus::new(),
        };
        bus.spawn_listener();
        bus
    }

    fn spawn_listener(&self) {
        let pool = self.pool.clone();
        let local = self.local.clone();

        tokio::spawn(async move {
            loop {
                match PgListener::connect_with(&pool).await {
                    Ok(mut listener) => {
                        if let Err(e) = listener.listen(EVENT_CHANNEL).await {
                            tracing::warn!(error = %e, "LISTEN failed, will retry");
                            tokio::time::sleep(RECONNECT_DELAY).await;
                            continue;
                        }
                        loop {
                            match listener.recv().await {
                                Ok(notification) => {
                                    match serde_json::from_str::<StorageEvent>(
                                        notification.payload(),
                                    ) {
                                        Ok(event) => local.deliver(&event),
                                        Err(e) => {
                                            tracing::warn!(
                                                error = %e,
                                                "discarding undecodable storage event"
                                            );
                                        }
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(
                                        error = %e,
                                        "event listener disconnected, will retry"
                                    );
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "PgListener connect failed, will retry");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl EventBus for PgEventBus {
    async fn publish(&self, event: StorageEvent) {
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, kind = event.kind(), "encoding storage event");
                return;
            }
        };

        if let Err(e) = sqlx::query("SELECT pg_notify($1, $2)")
            .bind(EVENT_CHANNEL)
            .bind(&payload)
            .execute(&self.pool)
            .await
        {
            tracing::error!(error = %e, kind = event.kind(), "publishing storage event");
        }
    }

    async fn subscribe(&self) -> Subscription {
        self.local.subscribe().await
    }
}
