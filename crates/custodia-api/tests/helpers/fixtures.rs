//! Fixtures for seeding AIPs and locations into the in-memory stack.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use custodia_core::models::{Aip, AipStatus, Location, LocationConfig, LocationPurpose, S3Config, UrlConfig};
use custodia_db::store::{NewAip, NewLocation};
use custodia_db::ArchiveStore;
use custodia_storage::{MemoryBucket, StorageLocation};
use custodia_workflows::ExecutionStatus;
use uuid::Uuid;

use super::TestApp;

/// Package payload written for seeded AIPs.
pub const AIP_BYTES: &[u8] = b"aip-package-bytes";

/// Persists a location backed by a fresh in-memory bucket. Returns the
/// persisted row together with a handle on the bucket for assertions.
pub async fn memory_location(app: &TestApp, name: &str) -> (Location, Arc<MemoryBucket>) {
    memory_location_with(
        app,
        name,
        LocationConfig::Url(UrlConfig {
            url: "memory:///".to_string(),
        }),
    )
    .await
}

/// Like [`memory_location`], but with an explicit backend config. The config
/// determines the location's source; the bucket stays in-memory either way.
pub async fn memory_location_with(
    app: &TestApp,
    name: &str,
    config: LocationConfig,
) -> (Location, Arc<MemoryBucket>) {
    let location = app
        .store
        .create_location(NewLocation {
            name: name.to_string(),
            description: None,
            purpose: LocationPurpose::AipStore,
            config,
        })
        .await
        .expect("Failed to create test location");
    let bucket = Arc::new(MemoryBucket::new(name));
    app.locations.insert(Arc::new(StorageLocation::with_bucket(
        location.uuid,
        location.config.clone(),
        bucket.clone(),
    )));
    (location, bucket)
}

/// A location whose config reports an S3-compatible source. Deletions on
/// such locations go through the bucket layer, which stays in-memory here.
pub async fn s3_memory_location(app: &TestApp, name: &str) -> (Location, Arc<MemoryBucket>) {
    memory_location_with(
        app,
        name,
        LocationConfig::S3(S3Config {
            bucket: name.to_string(),
            region: "eu-west-1".to_string(),
            endpoint: None,
            profile: None,
            key: None,
            secret: None,
            token: None,
            path_style: false,
        }),
    )
    .await
}

/// A stored AIP at the given permanent location, its package object keyed
/// by the AIP uuid.
pub async fn stored_aip(app: &TestApp, name: &str, location_uuid: Uuid) -> Aip {
    let aip = app
        .custody
        .create_aip(NewAip {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            object_key: Uuid::new_v4(),
            status: AipStatus::Stored,
            location_uuid: Some(location_uuid),
        })
        .await
        .expect("Failed to create test AIP");
    let (location, key) = app
        .custody
        .aip_object(&aip)
        .await
        .expect("Failed to resolve AIP object");
    location
        .bucket()
        .await
        .expect("Failed to open location bucket")
        .write_bytes(&key, Bytes::from_static(AIP_BYTES))
        .await
        .expect("Failed to seed AIP object");
    aip
}

/// An AIP awaiting review, its uploaded package sitting in the internal
/// bucket under the submission object key.
pub async fn in_review_aip(app: &TestApp, name: &str) -> Aip {
    let aip = app
        .custody
        .create_aip(NewAip {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            object_key: Uuid::new_v4(),
            status: AipStatus::InReview,
            location_uuid: None,
        })
        .await
        .expect("Failed to create test AIP");
    let internal = app
        .locations
        .internal()
        .bucket()
        .await
        .expect("Failed to open internal bucket");
    internal
        .write_bytes(&aip.object_key.to_string(), Bytes::from_static(AIP_BYTES))
        .await
        .expect("Failed to seed AIP object");
    aip
}

/// Polls the store until the AIP reaches the wanted status.
pub async fn wait_aip_status(app: &TestApp, aip_uuid: Uuid, want: AipStatus) {
    for _ in 0..500 {
        let aip = app
            .store
            .read_aip(aip_uuid)
            .await
            .expect("Failed to read AIP");
        if aip.status == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("AIP {} never reached {:?}", aip_uuid, want);
}

/// Polls the engine until the execution reaches the wanted status.
pub async fn wait_execution(app: &TestApp, execution_id: &str, want: ExecutionStatus) {
    for _ in 0..500 {
        if app
            .engine
            .describe(execution_id)
            .await
            .expect("Failed to describe execution")
            == want
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution {} never reached {:?}", execution_id, want);
}
