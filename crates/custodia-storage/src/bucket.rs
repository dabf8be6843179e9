//! The bucket capability trait implemented by every location backend.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use http::Method;

use crate::error::BucketResult;

/// Stream of object content chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = BucketResult<Bytes>> + Send>>;

/// An open reader over one object.
pub struct BucketReader {
    pub content_type: Option<String>,
    pub size: Option<u64>,
    pub stream: ByteStream,
}

impl BucketReader {
    /// Drains the stream into a single buffer.
    pub async fn read_all(mut self) -> BucketResult<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

/// Narrow capability set over one object store.
///
/// Backends are shared across concurrent readers; a single writer per
/// `(bucket, key)` is assumed. Operations a backend cannot perform fail
/// with `Unsupported` or `Unimplemented`.
#[async_trait]
pub trait Bucket: Send + Sync {
    /// Opens a streaming reader over `key`.
    async fn reader(&self, key: &str) -> BucketResult<BucketReader>;

    /// Writes `data` under `key`, returning the number of bytes written.
    async fn write(&self, key: &str, data: ByteStream) -> BucketResult<u64>;

    /// Mints a presigned URL for direct client access to `key`.
    async fn signed_url(&self, key: &str, method: Method, ttl: Duration)
        -> BucketResult<String>;

    /// Removes the object under `key`.
    async fn delete(&self, key: &str) -> BucketResult<()>;

    /// Reports whether an object exists under `key`.
    async fn exists(&self, key: &str) -> BucketResult<bool>;

    /// Writes a single in-memory buffer under `key`.
    async fn write_bytes(&self, key: &str, data: Bytes) -> BucketResult<u64> {
        self.write(key, Box::pin(futures::stream::once(async move { Ok(data) })))
            .await
    }

    /// Copies `src_key` from another bucket into `dst_key` on this one.
    ///
    /// Streams chunk by chunk; cancellation takes effect at chunk
    /// boundaries.
    async fn copy_from(
        &self,
        dst_key: &str,
        src: &dyn Bucket,
        src_key: &str,
    ) -> BucketResult<u64> {
        let reader = src.reader(src_key).await?;
        self.write(dst_key, reader.stream).await
    }
}
