//! Bucket backend opened from an `object_store`-compatible URL.
//!
//! Useful for the internal staging location in development
//! (`file:///var/custodia/aips`, `memory:///`) and for read/write access
//! to any store `object_store` can parse. Signed URLs are not available
//! through this backend; use an s3 location for direct-upload flows.

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use custodia_core::models::UrlConfig;
use futures::StreamExt;
use http::Method;
use object_store::path::Path;
use object_store::{ObjectStore, ObjectStoreExt, PutPayload};
use url::Url;

use crate::bucket::{Bucket, BucketReader, ByteStream};
use crate::error::{BucketError, BucketResult};

#[derive(Debug)]
pub struct UrlBucket {
    store: Box<dyn ObjectStore>,
    prefix: Path,
}

impl UrlBucket {
    pub fn new(config: &UrlConfig) -> BucketResult<Self> {
        if !config.valid() {
            return Err(BucketError::InvalidConfig(
                "url locations require a url".to_string(),
            ));
        }

        let url = Url::parse(&config.url)
            .map_err(|e| BucketError::InvalidConfig(format!("{}: {}", config.url, e)))?;
        let (store, prefix) = object_store::parse_url(&url)
            .map_err(|e| BucketError::InvalidConfig(e.to_string()))?;

        Ok(Self { store, prefix })
    }

    fn object_path(&self, key: &str) -> Path {
        if self.prefix.as_ref().is_empty() {
            Path::from(key)
        } else {
            Path::from(format!("{}/{}", self.prefix, key))
        }
    }
}

#[async_trait]
impl Bucket for UrlBucket {
    async fn reader(&self, key: &str) -> BucketResult<BucketReader> {
        let result = self.store.get(&self.object_path(key)).await?;

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
            .put(&self.object_path(key), PutPayload::from(buf.freeze()))
            .await?;

        Ok(written)
    }

    async fn signed_url(
        &self,
        _key: &str,
        _method: Method,
        _ttl: Duration,
    ) -> BucketResult<String> {
        Err(BucketError::Unsupported(
            "signed URLs are not available for url locations".to_string(),
        ))
    }

    async fn delete(&self, key: &str) -> BucketResult<()> {
        self.store.delete(&self.object_path(key)).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> BucketResult<bool> {
        match self.store.head(&self.object_path(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
