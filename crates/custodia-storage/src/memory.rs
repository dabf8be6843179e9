//! In-memory bucket for tests and single-process development setups.
//!
//! Signed URLs carry no credentials; they encode the bucket name, key,
//! method and TTL so callers can assert on what would have been signed.

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use http::Method;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, ObjectStoreExt, PutPayload};

use crate::bucket::{Bucket, BucketReader, ByteStream};
use crate::error::{BucketError, BucketResult};

pub struct MemoryBucket {
    name: String,
    store: InMemory,
}

impl MemoryBucket {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            store: InMemory::new(),
        }
    }
}

impl Default for MemoryBucket {
    fn default() -> Self {
        Self::new("memory")
    }
}

#[async_trait]
impl Bucket for MemoryBucket {
    async fn reader(&self, key: &str) -> BucketResult<BucketReader> {
        let result = self.store.get(&Path::from(key)).await?;

        let content_type = result
            .attributes
            .get(&object_store::Attribute::ContentType)
            .map(|v| v.to_string());
        let size = u64::try_from(result.meta.size).ok();
        let stream = result
            .into_stream()
            .map(|chunk| chunk.map_err(BucketError::from));

        Ok(BucketReader {
            content_type,
            size,
            stream: Box::pin(stream),
        })
    }

    async fn write(&self, key: &str, mut data: ByteStream) -> BucketResult<u64> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = data.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let written = buf.len() as u64;

        self.store
            .put(&Path::from(key), PutPayload::from(buf.freeze()))
            .await?;

        Ok(written)
    }

    async fn signed_url(&self, key: &str, method: Method, ttl: Duration) -> BucketResult<String> {
        Ok(format!(
            "memory://{}/{}?method={}&expires_in={}",
            self.name,
            key,
            method,
            ttl.as_secs()
        ))
    }

    async fn delete(&self, key: &str) -> BucketResult<()> {
        self.store.delete(&Path::from(key)).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> BucketResult<bool> {
        match self.store.head(&Path::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
