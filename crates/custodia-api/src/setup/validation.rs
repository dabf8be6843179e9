//! Configuration validation
//!
//! Validates critical configuration values at startup to catch
//! misconfigurations early.

use anyhow::Result;
use custodia_core::Config;

/// Validate critical configuration values
pub fn validate_config(config: &Config) -> Result<()> {
    let is_production = config.is_production();

    if is_production && config.cors_origins().contains(&"*".to_string()) {
        return Err(anyhow::anyhow!(
            "CORS configured to allow all origins (*) in production - this is a security risk. \
            Please set specific allowed origins via CORS_ORIGINS environment variable."
        ));
    }

    if config.auth_enabled() && config.jwt_secret().is_none() {
        return Err(anyhow::anyhow!(
            "AUTH_ENABLED is set but JWT_SECRET is missing"
        ));
    }

    if !config.auth_enabled() && is_production {
        tracing::warn!("Authentication is disabled in production");
    }

    if config.db_max_connections() == 0 {
        return Err(anyhow::anyhow!("Database max connections cannot be 0"));
    }

    if config.db_timeout_seconds() == 0 {
        return Err(anyhow::anyhow!("Database timeout cannot be 0"));
    }

    if config.engine_max_workers() == 0 {
        return Err(anyhow::anyhow!("Workflow engine worker count cannot be 0"));
    }

    match config.event_bus() {
        "memory" | "postgres" => {}
        other => {
            return Err(anyhow::anyhow!(
                "EVENT_BUS must be 'memory' or 'postgres', got '{}'",
                other
            ));
        }
    }

    match config.ticket_store() {
        "memory" | "postgres" => {}
        other => {
            return Err(anyhow::anyhow!(
                "TICKET_STORE must be 'memory' or 'postgres', got '{}'",
                other
            ));
        }
    }

    Ok(())
}
