//! Reviewed-deletion handlers.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use validator::Validate;

use custodia_core::auth::AIPS_REVIEW_ATTR;
use custodia_core::AppError;

use crate::auth::{authorize, AuthContext};
use crate::error::{HttpAppError, ValidatedJson};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct RequestDeletionBody {
    #[validate(length(min = 1, max = 4096))]
    pub reason: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewDeletionBody {
    pub approved: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelDeletionBody {
    #[serde(default)]
    pub check: bool,
}

/// Ask for an AIP to be deleted
#[tracing::instrument(skip(state, ctx, body))]
pub async fn request_deletion(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(aip_id): Path<String>,
    ValidatedJson(body): ValidatedJson<RequestDeletionBody>,
) -> Result<impl IntoResponse, HttpAppError> {
    authorize(&ctx.0, &[AIPS_REVIEW_ATTR])?;

    state
        .service
        .request_aip_deletion(ctx.0.as_ref(), &aip_id, &body.reason)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// Record a review decision on the pending deletion request
#[tracing::instrument(skip(state, ctx, body))]
pub async fn review_deletion(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(aip_id): Path<String>,
    ValidatedJson(body): ValidatedJson<ReviewDeletionBody>,
) -> Result<impl IntoResponse, HttpAppError> {
    authorize(&ctx.0, &[AIPS_REVIEW_ATTR])?;

    state
        .service
        .review_aip_deletion(ctx.0.as_ref(), &aip_id, body.approved)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// Withdraw the caller's own deletion request
#[tracing::instrument(skip(state, ctx, body))]
pub async fn cancel_deletion(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(aip_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, HttpAppError> {
    authorize(&ctx.0, &[AIPS_REVIEW_ATTR])?;

    // The body is optional; a bare POST is a plain cancellation.
    let body: CancelDeletionBody = if body.is_empty() {
        CancelDeletionBody::default()
    } else {
        serde_json::from_slice(&body).map_err(AppError::from)?
    };

    state
        .service
        .cancel_aip_deletion(ctx.0.as_ref(), &aip_id, body.check)
        .await?;
    Ok(StatusCode::ACCEPTED)
}
