//! Shared application state for axum handlers.

use std::sync::Arc;

use custodia_core::Config;
use sqlx::PgPool;

use crate::service::StorageService;

/// Application state shared across all request handlers.
///
/// Handlers extract `State<Arc<AppState>>`; sub-states below are available
/// through `FromRef` for handlers that only need a slice of it.
pub struct AppState {
    pub service: Arc<StorageService>,
    pub config: Config,
    /// Present when running against Postgres; `None` for the in-memory profile.
    pub pool: Option<PgPool>,
}

impl axum::extract::FromRef<AppState> for Arc<StorageService> {
    fn from_ref(state: &AppState) -> Self {
        state.service.clone()
    }
}

impl axum::extract::FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

// Compile-time check: state must be shareable across the tokio runtime.
#[allow(dead_code)]
fn _assert_app_state_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<AppState>();
}
