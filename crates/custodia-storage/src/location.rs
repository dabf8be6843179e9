//! Runtime registry of opened storage locations.
//!
//! A [`StorageLocation`] pairs a location's persisted config with a lazily
//! opened [`Bucket`]. The [`LocationSet`] caches one instance per location
//! so S3 stores and HTTP clients are reused across requests. The internal
//! location (nil uuid) is built from startup config and never persisted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use custodia_core::models::{Location, LocationConfig, LocationSource, INTERNAL_LOCATION_UUID};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::amss::AmssBucket;
use crate::bucket::Bucket;
use crate::error::{BucketError, BucketResult};
use crate::memory::MemoryBucket;
use crate::s3::S3Bucket;
use crate::sftp::SftpBucket;
use crate::url::UrlBucket;

/// Builds the backend matching the config variant. Fails on configs that do
/// not satisfy their validity predicate.
pub fn open_bucket(config: &LocationConfig) -> BucketResult<Arc<dyn Bucket>> {
    let bucket: Arc<dyn Bucket> = match config {
        LocationConfig::S3(c) => Arc::new(S3Bucket::new(c)?),
        LocationConfig::Sftp(c) => Arc::new(SftpBucket::new(c)?),
        LocationConfig::Url(c) => Arc::new(UrlBucket::new(c)?),
        LocationConfig::Amss(c) => Arc::new(AmssBucket::new(c)?),
    };
    Ok(bucket)
}

pub struct StorageLocation {
    uuid: Uuid,
    config: LocationConfig,
    bucket: OnceCell<Arc<dyn Bucket>>,
}

impl std::fmt::Debug for StorageLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageLocation")
            .field("uuid", &self.uuid)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StorageLocation {
    pub fn new(uuid: Uuid, config: LocationConfig) -> BucketResult<Self> {
        if !config.valid() {
            return Err(BucketError::InvalidConfig(
                "invalid location configuration".to_string(),
            ));
        }

        Ok(Self {
            uuid,
            config,
            bucket: OnceCell::new(),
        })
    }

    /// Builds a location around an already opened bucket. Used by tests and
    /// development setups that run on in-memory buckets.
    pub fn with_bucket(uuid: Uuid, config: LocationConfig, bucket: Arc<dyn Bucket>) -> Self {
        Self {
            uuid,
            config,
            bucket: OnceCell::new_with(Some(bucket)),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn config(&self) -> &LocationConfig {
        &self.config
    }

    pub fn source(&self) -> LocationSource {
        self.config.source()
    }

    pub async fn bucket(&self) -> BucketResult<Arc<dyn Bucket>> {
        let bucket = self
            .bucket
            .get_or_try_init(|| async { open_bucket(&self.config) })
            .await?;
        Ok(bucket.clone())
    }
}

pub struct LocationSet {
    internal: Arc<StorageLocation>,
    locations: Mutex<HashMap<Uuid, Arc<StorageLocation>>>,
}

impl LocationSet {
    pub fn new(internal_config: LocationConfig) -> BucketResult<Self> {
        let internal = Arc::new(StorageLocation::new(INTERNAL_LOCATION_UUID, internal_config)?);

        Ok(Self {
            internal,
            locations: Mutex::new(HashMap::new()),
        })
    }

    /// Builds a set whose internal location runs on an in-memory bucket.
    pub fn in_memory() -> Self {
        let config = LocationConfig::Url(custodia_core::models::UrlConfig {
            url: "memory:///".to_string(),
        });
        let internal = Arc::new(StorageLocation::with_bucket(
            INTERNAL_LOCATION_UUID,
            config,
            Arc::new(MemoryBucket::new("internal")),
        ));

        Self {
            internal,
            locations: Mutex::new(HashMap::new()),
        }
    }

    pub fn internal(&self) -> Arc<StorageLocation> {
        self.internal.clone()
    }

    /// Returns the cached instance for a persisted location, opening it on
    /// first use.
    pub fn open(&self, location: &Location) -> BucketResult<Arc<StorageLocation>> {
        if location.uuid == INTERNAL_LOCATION_UUID {
            return Ok(self.internal.clone());
        }

        let mut locations = self.lock();
        if let Some(found) = locations.get(&location.uuid) {
            return Ok(found.clone());
        }

        let opened = Arc::new(StorageLocation::new(
            location.uuid,
            location.config.clone(),
        )?);
        locations.insert(location.uuid, opened.clone());

        Ok(opened)
    }

    pub fn insert(&self, location: Arc<StorageLocation>) {
        self.lock().insert(location.uuid(), location);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<StorageLocation>>> {
        self.locations.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
