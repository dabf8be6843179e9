//! Route configuration and setup

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use custodia_core::Config;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::auth::middleware::auth_middleware;
use crate::auth::AuthVerifier;
use crate::handlers;
use crate::state::AppState;

/// All request bodies are JSON; AIP payloads go straight to the bucket
/// through signed URLs and never pass through this API.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Setup all application routes
pub fn setup_routes(config: &Config, state: Arc<AppState>) -> Result<Router, anyhow::Error> {
    let cors = setup_cors(config)?;
    let verifier = Arc::new(AuthVerifier::from_config(config)?);

    // Public routes (ticket-authorized or unauthenticated)
    let public_routes = public_routes();

    // Protected routes (require a bearer token when authentication is enabled)
    let protected_routes = protected_routes().layer(axum::middleware::from_fn_with_state(
        verifier,
        auth_middleware,
    ));

    let app = public_routes
        .merge(protected_routes)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    Ok(app)
}

/// Setup CORS configuration
fn setup_cors(config: &Config) -> Result<CorsLayer, anyhow::Error> {
    let cors = if config.cors_origins().contains(&"*".to_string()) {
        tracing::warn!("CORS configured to allow all origins - not recommended for production");
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    } else {
        let origins: Result<Vec<HeaderValue>, _> =
            config.cors_origins().iter().map(|o| o.parse()).collect();

        CorsLayer::new()
            .allow_origin(origins.unwrap_or_default())
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    };
    Ok(cors)
}

/// Routes that carry their own authorization: health probes and the
/// ticket-redeeming download and monitor endpoints.
fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/storage/aip/{uuid}/download",
            get(handlers::download::download_aip),
        )
        .route(
            "/storage/aip/{uuid}/deletion-report",
            get(handlers::download::download_deletion_report),
        )
        .route("/storage/monitor", get(handlers::monitor::monitor))
}

/// Routes behind the authentication middleware.
fn protected_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/storage/aip",
            get(handlers::aips::list_aips).post(handlers::aips::create_aip),
        )
        .route("/storage/aip/{uuid}", get(handlers::aips::show_aip))
        .route(
            "/storage/aip/{uuid}/submit",
            post(handlers::aips::submit_aip),
        )
        .route(
            "/storage/aip/{uuid}/update",
            post(handlers::aips::update_aip),
        )
        .route(
            "/storage/aip/{uuid}/download-request",
            get(handlers::download::download_aip_request),
        )
        .route(
            "/storage/aip/{uuid}/store",
            post(handlers::aips::move_aip).get(handlers::aips::move_aip_status),
        )
        .route(
            "/storage/aip/{uuid}/reject",
            post(handlers::aips::reject_aip),
        )
        .route(
            "/storage/aip/{uuid}/workflows",
            get(handlers::aips::list_aip_workflows),
        )
        .route(
            "/storage/aip/{uuid}/deletion-request",
            post(handlers::deletion::request_deletion),
        )
        .route(
            "/storage/aip/{uuid}/deletion-review",
            post(handlers::deletion::review_deletion),
        )
        .route(
            "/storage/aip/{uuid}/deletion-cancel",
            post(handlers::deletion::cancel_deletion),
        )
        .route(
            "/storage/aip/{uuid}/deletion-report-request",
            get(handlers::download::deletion_report_request),
        )
        .route(
            "/storage/location",
            get(handlers::locations::list_locations).post(handlers::locations::create_location),
        )
        .route(
            "/storage/location/{uuid}",
            get(handlers::locations::show_location),
        )
        .route(
            "/storage/location/{uuid}/aips",
            get(handlers::locations::list_location_aips),
        )
        .route(
            "/storage/monitor-request",
            get(handlers::monitor::monitor_request),
        )
}

#[derive(Serialize)]
struct HealthCheckResponse {
    status: String,
    database: String,
    storage: String,
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    const TIMEOUT: Duration = Duration::from_secs(5);

    let mut response = HealthCheckResponse {
        status: "healthy".to_string(),
        database: "unknown".to_string(),
        storage: "unknown".to_string(),
    };

    let mut overall_healthy = true;

    // Check database using the pool directly with timeout
    match &state.pool {
        Some(pool) => match tokio::time::timeout(TIMEOUT, sqlx::query("SELECT 1").execute(pool))
            .await
        {
            Ok(Ok(_)) => {
                response.database = "healthy".to_string();
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Database health check failed");
                response.database = format!("unhealthy: {}", e);
                overall_healthy = false;
            }
            Err(_) => {
                tracing::error!("Database health check timed out");
                response.database = "timeout".to_string();
                overall_healthy = false;
            }
        },
        None => {
            response.database = "not_configured".to_string();
        }
    }

    // Check the internal bucket. Storage issues degrade but do not fail
    // overall health.
    match tokio::time::timeout(
        TIMEOUT,
        state.service.custody().locations().internal().bucket(),
    )
    .await
    {
        Ok(Ok(_)) => {
            response.storage = "healthy".to_string();
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Storage health check warning");
            response.storage = format!("degraded: {}", e);
        }
        Err(_) => {
            tracing::warn!("Storage health check timed out");
            response.storage = "timeout".to_string();
        }
    }

    if !overall_healthy {
        response.status = "unhealthy".to_string();
    }

    let status_code = if overall_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}
