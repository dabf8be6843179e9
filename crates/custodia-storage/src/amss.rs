//! Archivematica Storage Service (AMSS) client and bucket backend.
//!
//! AMSS keeps custody of its own packages, so this backend is read-only:
//! downloads stream through the AMSS API, while deletion goes through the
//! request/review endpoints driven by the deletion workflow. Writes, direct
//! deletes and signed URLs are unsupported.

use std::time::Duration;

use async_trait::async_trait;
use custodia_core::models::AmssConfig;
use futures::StreamExt;
use http::Method;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bucket::{Bucket, BucketReader, ByteStream};
use crate::error::{BucketError, BucketResult};

pub const PACKAGE_STATUS_UPLOADED: &str = "UPLOADED";
pub const PACKAGE_STATUS_DELETION_REQUESTED: &str = "DEL_REQ";
pub const PACKAGE_STATUS_DELETED: &str = "DELETED";

// AMSS wants a numeric requester id, which custodia does not track.
const DELETE_USER_ID: i64 = 123;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Package record returned by `GET /api/v2/file/{uuid}/`.
#[derive(Debug, Clone, Deserialize)]
pub struct AmssPackage {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub origin_pipeline: String,
}

impl AmssPackage {
    /// The origin pipeline comes back as a resource path like
    /// `/api/v2/pipeline/<uuid>/`.
    pub fn pipeline_uuid(&self) -> String {
        self.origin_pipeline
            .trim_end_matches('/')
            .trim_start_matches("/api/v2/pipeline/")
            .to_string()
    }
}

#[derive(Serialize)]
struct DeleteAipBody<'a> {
    event_reason: &'a str,
    pipeline: &'a str,
    user_id: i64,
    user_email: &'a str,
}

#[derive(Deserialize)]
struct DeleteAipResponse {
    id: i64,
}

#[derive(Serialize)]
struct ReviewDeletionBody<'a> {
    event_id: i64,
    decision: &'a str,
    reason: &'a str,
}

#[derive(Deserialize)]
struct ReviewDeletionResponse {
    #[serde(default)]
    error_message: String,
}

#[derive(Debug, Clone)]
pub struct AmssClient {
    base_url: String,
    username: String,
    api_key: String,
    http: reqwest::Client,
}

impl AmssClient {
    pub fn new(config: &AmssConfig) -> BucketResult<Self> {
        if !config.valid() {
            return Err(BucketError::InvalidConfig(
                "amss locations require a url, username and api key".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| BucketError::Internal(e.to_string()))?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            api_key: config.api_key.clone(),
            http,
        })
    }

    fn package_url(&self, aip_uuid: Uuid) -> String {
        format!("{}/api/v2/file/{}/", self.base_url, aip_uuid)
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("Username", &self.username)
            .header("ApiKey", &self.api_key)
    }

    #[tracing::instrument(skip(self))]
    pub async fn read_package(&self, aip_uuid: Uuid) -> BucketResult<AmssPackage> {
        let resp = self
            .request(Method::GET, &self.package_url(aip_uuid))
            .send()
            .await
            .map_err(|e| transport_error("read package", e))?;

        if !resp.status().is_success() {
            return Err(status_error("read package", resp.status()));
        }

        resp.json::<AmssPackage>()
            .await
            .map_err(|e| BucketError::Internal(format!("read package: {}", e)))
    }

    /// Files a deletion request with AMSS and returns its event id, which a
    /// pipeline administrator (or [`Self::approve_delete`]) then reviews.
    #[tracing::instrument(skip(self, reason))]
    pub async fn request_delete(
        &self,
        aip_uuid: Uuid,
        pipeline: &str,
        reason: &str,
        user_email: &str,
    ) -> BucketResult<i64> {
        let url = format!("{}/api/v2/file/{}/delete_aip/", self.base_url, aip_uuid);
        let body = DeleteAipBody {
            event_reason: reason,
            pipeline,
            user_id: DELETE_USER_ID,
            user_email,
        };

        let resp = self
            .request(Method::POST, &url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("request deletion", e))?;

        if !resp.status().is_success() {
            return Err(status_error("request deletion", resp.status()));
        }

        let parsed = resp
            .json::<DeleteAipResponse>()
            .await
            .map_err(|e| BucketError::Internal(format!("request deletion: {}", e)))?;

        Ok(parsed.id)
    }

    #[tracing::instrument(skip(self, reason))]
    pub async fn approve_delete(
        &self,
        aip_uuid: Uuid,
        event_id: i64,
        reason: &str,
    ) -> BucketResult<()> {
        let url = format!(
            "{}/api/v2/file/{}/review_aip_deletion/",
            self.base_url, aip_uuid
        );
        let body = ReviewDeletionBody {
            event_id,
            decision: "approve",
            reason,
        };

        let resp = self
            .request(Method::POST, &url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("approve deletion", e))?;

        if !resp.status().is_success() {
            return Err(status_error("approve deletion", resp.status()));
        }

        let parsed = resp
            .json::<ReviewDeletionResponse>()
            .await
            .map_err(|e| BucketError::Internal(format!("approve deletion: {}", e)))?;

        if !parsed.error_message.is_empty() {
            return Err(BucketError::Unknown(format!(
                "approve deletion: {}",
                parsed.error_message
            )));
        }

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn download(&self, key: &str) -> BucketResult<BucketReader> {
        let url = format!("{}/api/v2/file/{}/download", self.base_url, key);

        let resp = self
            .request(Method::GET, &url)
            .send()
            .await
            .map_err(|e| transport_error("download", e))?;

        if !resp.status().is_success() {
            return Err(status_error("download", resp.status()));
        }

        let content_type = resp
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let size = resp.content_length();
        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| BucketError::Internal(e.to_string())));

        Ok(BucketReader {
            content_type,
            size,
            stream: Box::pin(stream),
        })
    }
}

fn transport_error(context: &str, err: reqwest::Error) -> BucketError {
    BucketError::Unavailable(format!("{}: {}", context, err))
}

fn status_error(context: &str, status: reqwest::StatusCode) -> BucketError {
    let message = format!("{}: response code: {}", context, status.as_u16());
    match status {
        reqwest::StatusCode::NOT_FOUND => BucketError::NotFound(message),
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
            BucketError::PermissionDenied(message)
        }
        s if s.is_server_error() => BucketError::Internal(message),
        _ => BucketError::Unknown(message),
    }
}

pub struct AmssBucket {
    client: AmssClient,
}

impl AmssBucket {
    pub fn new(config: &AmssConfig) -> BucketResult<Self> {
        Ok(Self {
            client: AmssClient::new(config)?,
        })
    }

    pub fn client(&self) -> &AmssClient {
        &self.client
    }
}

#[async_trait]
impl Bucket for AmssBucket {
    async fn reader(&self, key: &str) -> BucketResult<BucketReader> {
        self.client.download(key).await
    }

    async fn write(&self, _key: &str, _data: ByteStream) -> BucketResult<u64> {
        Err(BucketError::Unimplemented(
            "writes are not supported for amss locations".to_string(),
        ))
    }

    async fn signed_url(
        &self,
        _key: &str,
        _method: Method,
        _ttl: Duration,
    ) -> BucketResult<String> {
        Err(BucketError::Unimplemented(
            "signed URLs are not supported for amss locations".to_string(),
        ))
    }

    async fn delete(&self, _key: &str) -> BucketResult<()> {
        Err(BucketError::Unimplemented(
            "direct deletes are not supported for amss locations".to_string(),
        ))
    }

    async fn exists(&self, key: &str) -> BucketResult<bool> {
        let aip_uuid = key
            .parse::<Uuid>()
            .map_err(|_| BucketError::Unknown(format!("invalid amss key: {}", key)))?;

        match self.client.read_package(aip_uuid).await {
            Ok(_) => Ok(true),
            Err(BucketError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
