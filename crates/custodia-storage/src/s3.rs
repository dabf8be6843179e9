//! S3-compatible bucket backend (AWS S3, MinIO).

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use custodia_core::models::S3Config;
use futures::StreamExt;
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::{Attribute, ObjectStore, ObjectStoreExt, PutPayload};

use crate::bucket::{Bucket, BucketReader, ByteStream};
use crate::error::{BucketError, BucketResult};

/// Bucket over an S3-compatible object store.
///
/// Credentials fall back to the ambient AWS environment when not present
/// in the location config, so MinIO-style explicit keys and IAM-style
/// implicit credentials both work.
#[derive(Clone)]
pub struct S3Bucket {
    store: AmazonS3,
}

impl S3Bucket {
    pub fn new(config: &S3Config) -> BucketResult<Self> {
        if !config.valid() {
            return Err(BucketError::InvalidConfig(
                "s3 locations require a bucket and region".to_string(),
            ));
        }

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
            if endpoint.starts_with("http://") {
                builder = builder.with_allow_http(true);
            }
        }
        if let Some(key) = &config.key {
            builder = builder.with_access_key_id(key);
        }
        if let Some(secret) = &config.secret {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(token) = &config.token {
            builder = builder.with_token(token);
        }
        if config.path_style {
            builder = builder.with_virtual_hosted_style_request(false);
        }

        let store = builder
            .build()
            .map_err(|e| BucketError::InvalidConfig(e.to_string()))?;

        Ok(Self { store })
    }
}

#[async_trait]
impl Bucket for S3Bucket {
    #[tracing::instrument(skip(self), fields(s3.key = %key, s3.operation = "GetObject"))]
    async fn reader(&self, key: &str) -> BucketResult<BucketReader> {
        let location = Path::from(key.to_string());
        let result = self.store.get(&location).await?;

        let content_type = result
            .attributes
            .get(&Attribute::ContentType)
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

    #[tracing::instrument(skip(self, data), fields(s3.key = %key, s3.operation = "PutObject"))]
    async fn write(&self, key: &str, mut data: ByteStream) -> BucketResult<u64> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = data.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let written = buf.len() as u64;

        let location = Path::from(key.to_string());
        self.store
            .put(&location, PutPayload::from(buf.freeze()))
            .await?;

        Ok(written)
    }

    #[tracing::instrument(skip(self), fields(s3.key = %key))]
    async fn signed_url(
        &self,
        key: &str,
        method: Method,
        ttl: Duration,
    ) -> BucketResult<String> {
        let location = Path::from(key.to_string());
        let url = self
            .store
            .signed_url(method, &location, ttl)
            .await
            .map_err(BucketError::from)?;
        Ok(url.to_string())
    }

    #[tracing::instrument(skip(self), fields(s3.key = %key, s3.operation = "DeleteObject"))]
    async fn delete(&self, key: &str) -> BucketResult<()> {
        let location = Path::from(key.to_string());
        self.store.delete(&location).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(s3.key = %key, s3.operation = "HeadObject"))]
    async fn exists(&self, key: &str) -> BucketResult<bool> {
        let location = Path::from(key.to_string());
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
