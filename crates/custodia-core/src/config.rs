//! Configuration module
//!
//! This module provides configuration structures for the storage service,
//! including database, internal bucket, authentication, and workflow engine
//! settings.

use std::env;

use crate::models::{LocationConfig, S3Config, UrlConfig};

// Common constants
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const SUBMIT_URL_EXPIRY_SECS: u64 = 900;
const TICKET_TTL_SECS: u64 = 5;
const ENGINE_MAX_WORKERS: usize = 4;
const AMSS_POLL_INTERVAL_SECS: u64 = 60;

/// Base configuration shared by server and worker processes
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub environment: String,
}

/// Storage service configuration
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub base: BaseConfig,
    pub database_url: String,
    // Authentication configuration
    pub auth_enabled: bool,
    pub jwt_secret: Option<String>,
    pub jwt_issuer: Option<String>,
    // Internal bucket configuration. Either a driver URL or explicit
    // S3-compatible settings; the URL wins when both are present.
    pub internal_url: Option<String>,
    pub internal_bucket: Option<String>,
    pub internal_region: Option<String>,
    pub internal_endpoint: Option<String>,
    pub internal_access_key: Option<String>,
    pub internal_secret_key: Option<String>,
    pub internal_token: Option<String>,
    pub internal_profile: Option<String>,
    pub internal_path_style: bool,
    // Upload configuration
    pub submit_url_expiry_secs: u64,
    // Ticketed access configuration
    pub ticket_ttl_secs: u64,
    pub ticket_store: String,
    // Event bus configuration
    pub event_bus: String,
    // Workflow engine configuration
    pub engine_max_workers: usize,
    pub amss_poll_interval_secs: u64,
    // Approve AMSS deletion requests from this service instead of waiting
    // for a pipeline administrator.
    pub amss_auto_approve: bool,
}

/// Application configuration (storage service).
#[derive(Clone, Debug)]
pub struct Config(pub Box<StorageConfig>);

impl Config {
    fn as_storage(&self) -> &StorageConfig {
        &self.0
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let environment = self.as_storage().base.environment.to_lowercase();
        environment.eq("production") || environment.eq("prod")
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        let config = StorageConfig::from_env()?;
        Ok(Config(Box::new(config)))
    }

    // Convenience getters for common fields
    pub fn server_port(&self) -> u16 {
        self.as_storage().base.server_port
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.as_storage().base.cors_origins
    }

    pub fn environment(&self) -> &str {
        &self.as_storage().base.environment
    }

    pub fn db_max_connections(&self) -> u32 {
        self.as_storage().base.db_max_connections
    }

    pub fn db_timeout_seconds(&self) -> u64 {
        self.as_storage().base.db_timeout_seconds
    }

    pub fn database_url(&self) -> &str {
        &self.as_storage().database_url
    }

    pub fn auth_enabled(&self) -> bool {
        self.as_storage().auth_enabled
    }

    pub fn jwt_secret(&self) -> Option<&str> {
        self.as_storage().jwt_secret.as_deref()
    }

    pub fn jwt_issuer(&self) -> Option<&str> {
        self.as_storage().jwt_issuer.as_deref()
    }

    pub fn submit_url_expiry_secs(&self) -> u64 {
        self.as_storage().submit_url_expiry_secs
    }

    pub fn ticket_ttl_secs(&self) -> u64 {
        self.as_storage().ticket_ttl_secs
    }

    pub fn ticket_store(&self) -> &str {
        &self.as_storage().ticket_store
    }

    pub fn event_bus(&self) -> &str {
        &self.as_storage().event_bus
    }

    pub fn engine_max_workers(&self) -> usize {
        self.as_storage().engine_max_workers
    }

    pub fn amss_poll_interval_secs(&self) -> u64 {
        self.as_storage().amss_poll_interval_secs
    }

    pub fn amss_auto_approve(&self) -> bool {
        self.as_storage().amss_auto_approve
    }

    /// Build the internal bucket configuration from the startup settings.
    pub fn internal_location_config(&self) -> Result<LocationConfig, anyhow::Error> {
        let storage = self.as_storage();

        let config = match &storage.internal_url {
            Some(url) if !url.is_empty() => LocationConfig::Url(UrlConfig { url: url.clone() }),
            _ => LocationConfig::S3(S3Config {
                bucket: storage.internal_bucket.clone().unwrap_or_default(),
                region: storage.internal_region.clone().unwrap_or_default(),
                endpoint: storage.internal_endpoint.clone(),
                profile: storage.internal_profile.clone(),
                key: storage.internal_access_key.clone(),
                secret: storage.internal_secret_key.clone(),
                token: storage.internal_token.clone(),
                path_style: storage.internal_path_style,
            }),
        };

        if !config.valid() {
            return Err(anyhow::anyhow!(
                "invalid internal bucket configuration: set INTERNAL_BUCKET_URL or INTERNAL_BUCKET and INTERNAL_REGION"
            ));
        }
        Ok(config)
    }
}

impl StorageConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let cors_origins_str = env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string());
        let is_production =
            environment.to_lowercase() == "production" || environment.to_lowercase() == "prod";
        if is_production && cors_origins_str.trim() == "*" {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }

        let cors_origins: Vec<String> = cors_origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        let base = BaseConfig {
            server_port: env::var("PORT")
                .unwrap_or_else(|_| "9500".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            cors_origins,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: env::var("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| CONNECTION_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
            environment: environment.clone(),
        };

        let auth_enabled = env::var("AUTH_ENABLED")
            .unwrap_or_else(|_| "false".to_string())
            .to_lowercase()
            .parse()
            .unwrap_or(false);

        let jwt_secret = env::var("JWT_SECRET").ok();
        if auth_enabled && jwt_secret.is_none() {
            return Err(anyhow::anyhow!(
                "JWT_SECRET must be set when AUTH_ENABLED is true"
            ));
        }

        let config = StorageConfig {
            base,
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            auth_enabled,
            jwt_secret,
            jwt_issuer: env::var("JWT_ISSUER").ok(),
            internal_url: env::var("INTERNAL_BUCKET_URL").ok(),
            internal_bucket: env::var("INTERNAL_BUCKET").ok(),
            internal_region: env::var("INTERNAL_REGION").ok(),
            internal_endpoint: env::var("INTERNAL_ENDPOINT").ok(),
            internal_access_key: env::var("INTERNAL_ACCESS_KEY").ok(),
            internal_secret_key: env::var("INTERNAL_SECRET_KEY").ok(),
            internal_token: env::var("INTERNAL_TOKEN").ok(),
            internal_profile: env::var("INTERNAL_PROFILE").ok(),
            internal_path_style: env::var("INTERNAL_PATH_STYLE")
                .unwrap_or_else(|_| "false".to_string())
                .to_lowercase()
                .parse()
                .unwrap_or(false),
            submit_url_expiry_secs: env::var("SUBMIT_URL_EXPIRY_SECS")
                .unwrap_or_else(|_| SUBMIT_URL_EXPIRY_SECS.to_string())
                .parse()
                .unwrap_or(SUBMIT_URL_EXPIRY_SECS),
            ticket_ttl_secs: env::var("TICKET_TTL_SECS")
                .unwrap_or_else(|_| TICKET_TTL_SECS.to_string())
                .parse()
                .unwrap_or(TICKET_TTL_SECS),
            ticket_store: env::var("TICKET_STORE")
                .unwrap_or_else(|_| "memory".to_string())
                .to_lowercase(),
            event_bus: env::var("EVENT_BUS")
                .unwrap_or_else(|_| "memory".to_string())
                .to_lowercase(),
            engine_max_workers: env::var("ENGINE_MAX_WORKERS")
                .unwrap_or_else(|_| ENGINE_MAX_WORKERS.to_string())
                .parse()
                .unwrap_or(ENGINE_MAX_WORKERS),
            amss_poll_interval_secs: env::var("AMSS_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| AMSS_POLL_INTERVAL_SECS.to_string())
                .parse()
                .unwrap_or(AMSS_POLL_INTERVAL_SECS),
            amss_auto_approve: env::var("AMSS_AUTO_APPROVE")
                .unwrap_or_else(|_| "false".to_string())
                .to_lowercase()
                .parse()
                .unwrap_or(false),
        };

        Ok(config)
    }
}
