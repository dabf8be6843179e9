//! Custodia Storage API
//!
//! This crate provides the HTTP API handlers, middleware, and application setup.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod monitor;
pub mod service;
pub mod setup;
pub mod state;
pub mod telemetry;
pub mod tickets;

// Re-exports
pub use error::ErrorResponse;
pub use service::StorageService;
pub use state::AppState;
