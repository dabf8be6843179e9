//! Custodia Storage Library
//!
//! Location and bucket abstraction for AIP custody. A [`Bucket`] is the
//! narrow capability set every backend implements: read, write, delete,
//! copy and signed URLs. Backends declare which operations they support;
//! unsupported ones fail with [`BucketError::Unsupported`] or
//! [`BucketError::Unimplemented`] instead of silently degrading.
//!
//! Supported backends:
//!
//! - **S3** (and MinIO) through `object_store`, including presigned URLs.
//! - **URL** locations opened from an `object_store`-compatible URL.
//! - **SFTP** over `ssh2`, one session per operation.
//! - **AMSS**, the Archivematica Storage Service HTTP API (read only;
//!   deletion goes through its asynchronous request workflow).
//! - **Memory** for tests and local development.
//!
//! [`StorageLocation`] wraps a persisted location and opens its bucket
//! lazily; [`LocationSet`] is the process-wide registry including the
//! internal staging location.

pub mod amss;
pub mod bucket;
pub mod error;
pub mod location;
pub mod memory;
pub mod s3;
pub mod sftp;
pub mod url;

pub use amss::{AmssBucket, AmssClient, AmssPackage};
pub use bucket::{Bucket, BucketReader, ByteStream};
pub use error::{BucketError, BucketResult};
pub use location::{open_bucket, LocationSet, StorageLocation};
pub use memory::MemoryBucket;
pub use s3::S3Bucket;
pub use sftp::SftpBucket;
pub use url::UrlBucket;
