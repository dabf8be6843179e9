//! Location handlers.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use custodia_core::auth::{
    LOCATIONS_AIPS_LIST_ATTR, LOCATIONS_CREATE_ATTR, LOCATIONS_LIST_ATTR, LOCATIONS_READ_ATTR,
};
use custodia_core::models::LocationConfig;

use crate::auth::{authorize, AuthContext};
use crate::error::{HttpAppError, ValidatedJson};
use crate::service::CreateLocationParams;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateLocationRequest {
    #[validate(length(min = 1, max = 1024))]
    pub name: String,
    pub description: Option<String>,
    pub source: Option<String>,
    pub purpose: Option<String>,
    pub config: LocationConfig,
}

#[derive(Debug, Serialize)]
pub struct CreateLocationResult {
    pub uuid: Uuid,
}

/// List locations
#[tracing::instrument(skip(state, ctx))]
pub async fn list_locations(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse, HttpAppError> {
    authorize(&ctx.0, &[LOCATIONS_LIST_ATTR])?;

    let locations = state.service.list_locations().await?;
    Ok(Json(locations))
}

/// Register a new location
#[tracing::instrument(skip(state, ctx, request))]
pub async fn create_location(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    ValidatedJson(request): ValidatedJson<CreateLocationRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    authorize(&ctx.0, &[LOCATIONS_CREATE_ATTR])?;

    let location = state
        .service
        .create_location(CreateLocationParams {
            name: request.name,
            description: request.description,
            source: request.source,
            purpose: request.purpose,
            config: request.config,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateLocationResult {
            uuid: location.uuid,
        }),
    ))
}

/// Show one location
#[tracing::instrument(skip(state, ctx))]
pub async fn show_location(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(location_id): Path<String>,
) -> Result<impl IntoResponse, HttpAppError> {
    authorize(&ctx.0, &[LOCATIONS_READ_ATTR])?;

    let location = state.service.show_location(&location_id).await?;
    Ok(Json(location))
}

/// List the AIPs held by one location
#[tracing::instrument(skip(state, ctx))]
pub async fn list_location_aips(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(location_id): Path<String>,
) -> Result<impl IntoResponse, HttpAppError> {
    authorize(&ctx.0, &[LOCATIONS_AIPS_LIST_ATTR])?;

    let aips = state.service.list_location_aips(&location_id).await?;
    Ok(Json(aips))
}
