//! Custodia Core Library
//!
//! This crate provides the domain models, error types, configuration, and
//! authorization claims shared across all Custodia components.

pub mod auth;
pub mod config;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use auth::Claims;
pub use config::{Config, StorageConfig};
pub use error::{AppError, ErrorMetadata, LogLevel};
