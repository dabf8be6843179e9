//! Custodia Event Bus
//!
//! Typed fan-out of storage lifecycle events. Two backends share the
//! [`EventBus`] interface: [`InMemEventBus`] for single-process setups
//! and tests, and [`PgEventBus`] for multi-replica deployments, which
//! relays the serialized envelope through PostgreSQL LISTEN/NOTIFY.

pub mod bus;
pub mod event;
pub mod inmem;
pub mod pg;

pub use bus::{EventBus, Subscription, EVENT_BUFFER_SIZE};
pub use event::{
    AipCreatedEvent, AipDeletionRequestEvent, AipLocationUpdatedEvent, AipStatusUpdatedEvent,
    AipTaskEvent, AipWorkflowEvent, LocationCreatedEvent, StorageEvent, StoragePingEvent,
};
pub use inmem::InMemEventBus;
pub use pg::PgEventBus;
