//! SFTP bucket backend built on libssh2.
//!
//! libssh2 is synchronous, so every operation opens a fresh session inside
//! `spawn_blocking` and closes it when the operation finishes. Transfers are
//! whole-object; AIP packages are small enough for that to hold.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use custodia_core::models::SftpConfig;
use futures::StreamExt;
use http::Method;
use ssh2::Session;

use crate::bucket::{Bucket, BucketReader, ByteStream};
use crate::error::{BucketError, BucketResult};

// SFTP protocol status codes surfaced through libssh2.
const SFTP_NO_SUCH_FILE: i32 = 2;
const SFTP_PERMISSION_DENIED: i32 = 3;

const SESSION_TIMEOUT_MS: u32 = 30_000;

#[derive(Debug, Clone)]
pub struct SftpBucket {
    config: SftpConfig,
}

impl SftpBucket {
    pub fn new(config: &SftpConfig) -> BucketResult<Self> {
        if !config.valid() {
            return Err(BucketError::InvalidConfig(
                "sftp locations require an address, username, password and directory".to_string(),
            ));
        }

        Ok(Self {
            config: config.clone(),
        })
    }

    fn remote_path(&self, key: &str) -> PathBuf {
        Path::new(&self.config.directory).join(key)
    }
}

fn dial_address(config: &SftpConfig) -> String {
    if config.address.contains(':') {
        config.address.clone()
    } else {
        format!("{}:22", config.address)
    }
}

fn connect(config: &SftpConfig) -> BucketResult<ssh2::Sftp> {
    let tcp = TcpStream::connect(dial_address(config))
        .map_err(|e| BucketError::Unavailable(format!("{}: {}", config.address, e)))?;

    let mut session = Session::new().map_err(|e| BucketError::Unavailable(e.to_string()))?;
    session.set_timeout(SESSION_TIMEOUT_MS);
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| BucketError::Unavailable(e.to_string()))?;
    session
        .userauth_password(&config.username, &config.password)
        .map_err(|e| BucketError::PermissionDenied(e.to_string()))?;

    // The returned handle keeps the session and its TCP stream alive.
    session
        .sftp()
        .map_err(|e| BucketError::Unavailable(e.to_string()))
}

fn sftp_error(err: ssh2::Error) -> BucketError {
    match err.code() {
        ssh2::ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => BucketError::NotFound(err.to_string()),
        ssh2::ErrorCode::SFTP(SFTP_PERMISSION_DENIED) => {
            BucketError::PermissionDenied(err.to_string())
        }
        _ => BucketError::Unavailable(err.to_string()),
    }
}

fn ensure_parent(sftp: &ssh2::Sftp, path: &Path) -> BucketResult<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };

    let mut built = PathBuf::new();
    for component in parent.components() {
        built.push(component);
        if built == Path::new("/") {
            continue;
        }
        if sftp.stat(&built).is_err() {
            // mkdir may race with another writer; create surfaces real failures
            let _ = sftp.mkdir(&built, 0o755);
        }
    }

    Ok(())
}

#[async_trait]
impl Bucket for SftpBucket {
    #[tracing::instrument(skip(self), fields(sftp.address = %self.config.address))]
    async fn reader(&self, key: &str) -> BucketResult<BucketReader> {
        let config = self.config.clone();
        let path = self.remote_path(key);

        let bytes = tokio::task::spawn_blocking(move || -> BucketResult<Bytes> {
            let sftp = connect(&config)?;
            let mut file = sftp.open(&path).map_err(sftp_error)?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            Ok(Bytes::from(buf))
        })
        .await
        .map_err(|e| BucketError::Internal(e.to_string()))??;

        let size = bytes.len() as u64;
        let stream = futures::stream::once(async move { Ok(bytes) });

        Ok(BucketReader {
            content_type: None,
            size: Some(size),
            stream: Box::pin(stream),
        })
    }

    #[tracing::instrument(skip(self, data), fields(sftp.address = %self.config.address))]
    async fn write(&self, key: &str, mut data: ByteStream) -> BucketResult<u64> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = data.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let bytes = buf.freeze();
        let written = bytes.len() as u64;

        let config = self.config.clone();
        let path = self.remote_path(key);

        tokio::task::spawn_blocking(move || -> BucketResult<()> {
            let sftp = connect(&config)?;
            ensure_parent(&sftp, &path)?;
            let mut file = sftp.create(&path).map_err(sftp_error)?;
            file.write_all(&bytes)?;
            Ok(())
        })
        .await
        .map_err(|e| BucketError::Internal(e.to_string()))??;

        Ok(written)
    }

    async fn signed_url(
        &self,
        _key: &str,
        _method: Method,
        _ttl: Duration,
    ) -> BucketResult<String> {
        Err(BucketError::Unsupported(
            "signed URLs are not available for sftp locations".to_string(),
        ))
    }

    #[tracing::instrument(skip(self), fields(sftp.address = %self.config.address))]
    async fn delete(&self, key: &str) -> BucketResult<()> {
        let config = self.config.clone();
        let path = self.remote_path(key);

        tokio::task::spawn_blocking(move || -> BucketResult<()> {
            let sftp = connect(&config)?;
            sftp.unlink(&path).map_err(sftp_error)
        })
        .await
        .map_err(|e| BucketError::Internal(e.to_string()))?
    }

    #[tracing::instrument(skip(self), fields(sftp.address = %self.config.address))]
    async fn exists(&self, key: &str) -> BucketResult<bool> {
        let config = self.config.clone();
        let path = self.remote_path(key);

        tokio::task::spawn_blocking(move || -> BucketResult<bool> {
            let sftp = connect(&config)?;
            match sftp.stat(&path) {
                Ok(_) => Ok(true),
                Err(e) => match sftp_error(e) {
                    BucketError::NotFound(_) => Ok(false),
                    other => Err(other),
                },
            }
        })
        .await
        .map_err(|e| BucketError::Internal(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SftpConfig {
        SftpConfig {
            address: "sftp.example.org".to_string(),
            username: "preservation".to_string(),
            password: "secret".to_string(),
            directory: "upload".to_string(),
        }
    }

    #[test]
    fn test_new_rejects_incomplete_config() {
        let mut cfg = config();
        cfg.directory = String::new();
        let err = SftpBucket::new(&cfg).unwrap_err();
        assert!(matches!(err, BucketError::InvalidConfig(_)));
    }

    #[test]
    fn test_dial_address_defaults_to_port_22() {
        assert_eq!(dial_address(&config()), "sftp.example.org:22");

        let mut cfg = config();
        cfg.address = "sftp.example.org:2222".to_string();
        assert_eq!(dial_address(&cfg), "sftp.example.org:2222");
    }

    #[test]
    fn test_remote_path_is_rooted_in_directory() {
        let bucket = SftpBucket::new(&config()).unwrap();
        assert_eq!(bucket.remote_path("pkg-1"), PathBuf::from("upload/pkg-1"));

        let mut cfg = config();
        cfg.directory = "/var/aips".to_string();
        let bucket = SftpBucket::new(&cfg).unwrap();
        assert_eq!(
            bucket.remote_path("pkg-1"),
            PathBuf::from("/var/aips/pkg-1")
        );
    }

    #[tokio::test]
    async fn test_signed_url_unsupported() {
        let bucket = SftpBucket::new(&config()).unwrap();
        let err = bucket
            .signed_url("pkg-1", Method::GET, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, BucketError::Unsupported(_)));
    }
}
