//! Shared fixtures for workflow tests.

use std::sync::Arc;
use std::time::Duration;

use custodia_core::models::{Location, LocationConfig, LocationPurpose, UrlConfig};
use custodia_db::store::NewLocation;
use custodia_db::{ArchiveStore, MemoryArchiveStore};
use custodia_events::InMemEventBus;
use custodia_storage::{LocationSet, MemoryBucket, StorageLocation};

use crate::custody::CustodyService;
use crate::engine::WorkflowEngine;
use crate::executions::{ExecutionStatus, MemoryExecutionStore};

/// In-memory store, bus, and location set wired into one custody service.
pub(crate) struct TestHarness {
    pub store: Arc<MemoryArchiveStore>,
    pub events: Arc<InMemEventBus>,
    pub locations: Arc<LocationSet>,
    pub custody: Arc<CustodyService>,
}

impl TestHarness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryArchiveStore::new());
        let events = Arc::new(InMemEventBus::new());
        let locations = Arc::new(LocationSet::in_memory());
        let custody = Arc::new(CustodyService::new(
            store.clone(),
            events.clone(),
            locations.clone(),
        ));
        Self {
            store,
            events,
            locations,
            custody,
        }
    }

    pub fn engine(&self) -> WorkflowEngine {
        WorkflowEngine::new(Arc::new(MemoryExecutionStore::new()), 4)
    }

    /// Persists a location backed by a fresh in-memory bucket. Returns the
    /// persisted row together with a handle on the bucket for assertions.
    pub async fn memory_location(&self, name: &str) -> (Location, Arc<MemoryBucket>) {
        self.memory_location_with(
            name,
            LocationConfig::Url(UrlConfig {
                url: "memory:///".to_string(),
            }),
        )
        .await
    }

    /// Like [`Self::memory_location`], but with an explicit backend config.
    /// The config determines the location's source; the bucket stays
    /// in-memory either way.
    pub async fn memory_location_with(
        &self,
        name: &str,
        config: LocationConfig,
    ) -> (Location, Arc<MemoryBucket>) {
        let location = self
            .store
            .create_location(NewLocation {
                name: name.to_string(),
                description: None,
                purpose: LocationPurpose::AipStore,
                config,
            })
            .await
            .unwrap();
        let bucket = Arc::new(MemoryBucket::new(name));
        self.locations.insert(Arc::new(StorageLocation::with_bucket(
            location.uuid,
            location.config.clone(),
            bucket.clone(),
        )));
        (location, bucket)
    }
}

/// Polls the engine until the execution reaches the wanted status.
pub(crate) async fn wait_status(
    engine: &WorkflowEngine,
    execution_id: &str,
    want: ExecutionStatus,
) {
    for _ in 0..500 {
        if engine.describe(execution_id).await.unwrap() == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution {} never reached {:?}", execution_id, want);
}
