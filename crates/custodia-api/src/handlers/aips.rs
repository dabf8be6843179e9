//! AIP lifecycle handlers.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use custodia_core::auth::{
    AIPS_CREATE_ATTR, AIPS_LIST_ATTR, AIPS_MOVE_ATTR, AIPS_READ_ATTR, AIPS_REVIEW_ATTR,
    AIPS_SUBMIT_ATTR, AIPS_WORKFLOWS_LIST_ATTR,
};
use custodia_core::AppError;
use custodia_db::store::AipFilter;

use crate::auth::{authorize, AuthContext};
use crate::error::{HttpAppError, ValidatedJson};
use crate::service::CreateAipParams;
use crate::state::AppState;

/// Query parameters of the AIP listing. Everything arrives as strings so
/// a malformed value answers with the regular error body instead of a
/// bare rejection.
#[derive(Debug, Default, Deserialize)]
pub struct ListAipsQuery {
    pub name: Option<String>,
    pub status: Option<String>,
    pub location_uuid: Option<String>,
    pub earliest_created_time: Option<String>,
    pub latest_created_time: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl ListAipsQuery {
    fn into_filter(self) -> Result<AipFilter, AppError> {
        let mut filter = AipFilter {
            name: self.name,
            ..Default::default()
        };
        if let Some(status) = non_empty(self.status) {
            filter.status = Some(
                status
                    .parse()
                    .map_err(|_| AppError::NotValid("status: invalid value".to_string()))?,
            );
        }
        if let Some(uuid) = non_empty(self.location_uuid) {
            filter.location_uuid = Some(
                Uuid::parse_str(&uuid)
                    .map_err(|_| AppError::NotValid("location_uuid: invalid value".to_string()))?,
            );
        }
        if let Some(value) = non_empty(self.earliest_created_time) {
            filter.earliest_created_time = Some(parse_time("earliest_created_time", &value)?);
        }
        if let Some(value) = non_empty(self.latest_created_time) {
            filter.latest_created_time = Some(parse_time("latest_created_time", &value)?);
        }
        if let Some(value) = non_empty(self.limit) {
            filter.limit = Some(
                value
                    .parse()
                    .map_err(|_| AppError::NotValid("limit: invalid value".to_string()))?,
            );
        }
        if let Some(value) = non_empty(self.offset) {
            filter.offset = Some(
                value
                    .parse()
                    .map_err(|_| AppError::NotValid("offset: invalid value".to_string()))?,
            );
        }
        Ok(filter)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn parse_time(field: &str, value: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| AppError::NotValid(format!("{}: invalid value", field)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAipRequest {
    #[validate(length(min = 1, max = 1024))]
    pub name: String,
    pub uuid: String,
    pub status: Option<String>,
    pub object_key: String,
    pub location_uuid: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAipRequest {
    #[validate(length(min = 1, max = 1024))]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct MoveAipRequest {
    pub location_uuid: Uuid,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListWorkflowsQuery {
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// List AIPs with optional filters
#[tracing::instrument(skip(state, ctx))]
pub async fn list_aips(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<ListAipsQuery>,
) -> Result<impl IntoResponse, HttpAppError> {
    authorize(&ctx.0, &[AIPS_LIST_ATTR])?;

    let page = state.service.list_aips(query.into_filter()?).await?;
    Ok(Json(page))
}

/// Register an AIP already held in a bucket
#[tracing::instrument(skip(state, ctx, request))]
pub async fn create_aip(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    ValidatedJson(request): ValidatedJson<CreateAipRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    authorize(&ctx.0, &[AIPS_CREATE_ATTR])?;

    let status = match request.status.as_deref() {
        None | Some("") => None,
        Some(value) => Some(
            value
                .parse()
                .map_err(|_| AppError::NotValid("status: invalid value".to_string()))?,
        ),
    };

    let aip = state
        .service
        .create_aip(CreateAipParams {
            name: request.name,
            uuid: request.uuid,
            status,
            object_key: request.object_key,
            location_uuid: request.location_uuid,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(aip)))
}

/// Open a submission and return the signed upload URL
#[tracing::instrument(skip(state, ctx, request))]
pub async fn submit_aip(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(aip_id): Path<String>,
    ValidatedJson(request): ValidatedJson<SubmitAipRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    authorize(&ctx.0, &[AIPS_SUBMIT_ATTR])?;

    let result = state.service.submit_aip(&aip_id, &request.name).await?;
    Ok((StatusCode::ACCEPTED, Json(result)))
}

/// Mark a submission as uploaded
#[tracing::instrument(skip(state, ctx))]
pub async fn update_aip(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(aip_id): Path<String>,
) -> Result<impl IntoResponse, HttpAppError> {
    authorize(&ctx.0, &[AIPS_SUBMIT_ATTR])?;

    state.service.update_aip(&aip_id).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Show one AIP
#[tracing::instrument(skip(state, ctx))]
pub async fn show_aip(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(aip_id): Path<String>,
) -> Result<impl IntoResponse, HttpAppError> {
    authorize(&ctx.0, &[AIPS_READ_ATTR])?;

    let aip = state.service.show_aip(&aip_id).await?;
    Ok(Json(aip))
}

/// Start moving an AIP to a permanent location
#[tracing::instrument(skip(state, ctx, request))]
pub async fn move_aip(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(aip_id): Path<String>,
    ValidatedJson(request): ValidatedJson<MoveAipRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    authorize(&ctx.0, &[AIPS_MOVE_ATTR])?;

    state.service.move_aip(&aip_id, request.location_uuid).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Report whether the move finished
#[tracing::instrument(skip(state, ctx))]
pub async fn move_aip_status(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(aip_id): Path<String>,
) -> Result<impl IntoResponse, HttpAppError> {
    authorize(&ctx.0, &[AIPS_MOVE_ATTR])?;

    let status = state.service.move_aip_status(&aip_id).await?;
    Ok(Json(status))
}

/// Reject an AIP under review
#[tracing::instrument(skip(state, ctx))]
pub async fn reject_aip(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(aip_id): Path<String>,
) -> Result<impl IntoResponse, HttpAppError> {
    authorize(&ctx.0, &[AIPS_REVIEW_ATTR])?;

    state.service.reject_aip(&aip_id).await?;
    Ok(StatusCode::ACCEPTED)
}

/// List the workflow history of an AIP
#[tracing::instrument(skip(state, ctx))]
pub async fn list_aip_workflows(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(aip_id): Path<String>,
    Query(query): Query<ListWorkflowsQuery>,
) -> Result<impl IntoResponse, HttpAppError> {
    authorize(&ctx.0, &[AIPS_WORKFLOWS_LIST_ATTR])?;

    let workflows = state
        .service
        .list_aip_workflows(&aip_id, query.status.as_deref(), query.kind.as_deref())
        .await?;
    Ok(Json(workflows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodia_core::models::AipStatus;

    #[test]
    fn test_filter_parses_status_and_pagination() {
        let query = ListAipsQuery {
            status: Some("in_review".to_string()),
            limit: Some("50".to_string()),
            offset: Some("100".to_string()),
            ..Default::default()
        };

        let filter = query.into_filter().unwrap();
        assert_eq!(filter.status, Some(AipStatus::InReview));
        assert_eq!(filter.limit, Some(50));
        assert_eq!(filter.offset, Some(100));
    }

    #[test]
    fn test_filter_rejects_bad_status() {
        let query = ListAipsQuery {
            status: Some("nonsense".to_string()),
            ..Default::default()
        };

        let err = query.into_filter().unwrap_err();
        assert!(matches!(err, AppError::NotValid(msg) if msg == "status: invalid value"));
    }

    #[test]
    fn test_filter_rejects_bad_timestamp() {
        let query = ListAipsQuery {
            earliest_created_time: Some("yesterday".to_string()),
            ..Default::default()
        };

        let err = query.into_filter().unwrap_err();
        assert!(
            matches!(err, AppError::NotValid(msg) if msg == "earliest_created_time: invalid value")
        );
    }

    #[test]
    fn test_filter_accepts_rfc3339_times() {
        let query = ListAipsQuery {
            earliest_created_time: Some("2024-05-01T00:00:00Z".to_string()),
            latest_created_time: Some("2024-06-01T12:30:00+02:00".to_string()),
            ..Default::default()
        };

        let filter = query.into_filter().unwrap();
        assert!(filter.earliest_created_time.is_some());
        assert!(filter.latest_created_time.is_some());
    }

    #[test]
    fn test_empty_strings_are_ignored() {
        let query = ListAipsQuery {
            status: Some(String::new()),
            location_uuid: Some(String::new()),
            ..Default::default()
        };

        let filter = query.into_filter().unwrap();
        assert!(filter.status.is_none());
        assert!(filter.location_uuid.is_none());
    }
}
