//! Storage locations and their backend configurations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// UUID of the implicit internal location. The internal bucket is configured
/// at startup and never persisted, so it is addressed by the nil UUID.
pub const INTERNAL_LOCATION_UUID: Uuid = Uuid::nil();

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "location_source", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LocationSource {
    Unspecified,
    Minio,
    Sftp,
    Amss,
}

impl Display for LocationSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            LocationSource::Unspecified => write!(f, "unspecified"),
            LocationSource::Minio => write!(f, "minio"),
            LocationSource::Sftp => write!(f, "sftp"),
            LocationSource::Amss => write!(f, "amss"),
        }
    }
}

impl FromStr for LocationSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unspecified" => Ok(LocationSource::Unspecified),
            "minio" => Ok(LocationSource::Minio),
            "sftp" => Ok(LocationSource::Sftp),
            "amss" => Ok(LocationSource::Amss),
            _ => Err(anyhow::anyhow!("Invalid location source: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "location_purpose", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LocationPurpose {
    Unspecified,
    AipStore,
}

impl Display for LocationPurpose {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            LocationPurpose::Unspecified => write!(f, "unspecified"),
            LocationPurpose::AipStore => write!(f, "aip_store"),
        }
    }
}

impl FromStr for LocationPurpose {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unspecified" => Ok(LocationPurpose::Unspecified),
            "aip_store" => Ok(LocationPurpose::AipStore),
            _ => Err(anyhow::anyhow!("Invalid location purpose: {}", s)),
        }
    }
}

/// S3-compatible bucket settings (AWS S3, MinIO, and friends).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub path_style: bool,
}

impl S3Config {
    pub fn valid(&self) -> bool {
        !self.bucket.is_empty() && !self.region.is_empty()
    }
}

/// SFTP server settings. The directory is relative to the SSH user's home
/// unless absolute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SftpConfig {
    pub address: String,
    pub username: String,
    pub password: String,
    pub directory: String,
}

impl SftpConfig {
    pub fn valid(&self) -> bool {
        !self.address.is_empty()
            && !self.username.is_empty()
            && !self.password.is_empty()
            && !self.directory.is_empty()
    }
}

/// Driver-parsed URL settings (e.g. `s3://bucket`, `file:///path`,
/// `memory:///`). Mostly used for the internal bucket in development.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlConfig {
    pub url: String,
}

impl UrlConfig {
    pub fn valid(&self) -> bool {
        !self.url.is_empty()
    }
}

/// Archivematica Storage Service API settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmssConfig {
    pub url: String,
    pub username: String,
    pub api_key: String,
}

impl AmssConfig {
    pub fn valid(&self) -> bool {
        !self.url.is_empty() && !self.username.is_empty() && !self.api_key.is_empty()
    }
}

/// Backend configuration of a location, tagged by backend kind on the wire:
/// `{"s3": {...}}`, `{"sftp": {...}}`, `{"url": {...}}` or `{"amss": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationConfig {
    S3(S3Config),
    Sftp(SftpConfig),
    Url(UrlConfig),
    #[serde(alias = "ss")]
    Amss(AmssConfig),
}

impl LocationConfig {
    pub fn valid(&self) -> bool {
        match self {
            LocationConfig::S3(c) => c.valid(),
            LocationConfig::Sftp(c) => c.valid(),
            LocationConfig::Url(c) => c.valid(),
            LocationConfig::Amss(c) => c.valid(),
        }
    }

    /// Source kind a config variant belongs to. Creating a location requires
    /// the declared source to match.
    pub fn source(&self) -> LocationSource {
        match self {
            LocationConfig::S3(_) => LocationSource::Minio,
            LocationConfig::Sftp(_) => LocationSource::Sftp,
            LocationConfig::Url(_) => LocationSource::Unspecified,
            LocationConfig::Amss(_) => LocationSource::Amss,
        }
    }
}

/// A storage location able to hold AIPs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub uuid: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source: LocationSource,
    pub purpose: LocationPurpose,
    pub config: LocationConfig,
    pub created_at: DateTime<Utc>,
}
