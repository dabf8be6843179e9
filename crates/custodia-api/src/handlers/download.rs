//! Ticketed download handlers.
//!
//! Downloads run in two steps so a browser can fetch large objects
//! without carrying the Authorization header: an authenticated request
//! endpoint mints a one-shot ticket, and the public endpoint redeems it
//! and streams the object.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Extension, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;

use custodia_core::auth::AIPS_DOWNLOAD_ATTR;
use custodia_core::AppError;

use crate::auth::{authorize, AuthContext};
use crate::error::HttpAppError;
use crate::handlers::TicketResponse;
use crate::service::AipDownload;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct TicketQuery {
    pub ticket: Option<String>,
}

/// Mint a one-shot ticket for downloading an AIP
#[tracing::instrument(skip(state, ctx))]
pub async fn download_aip_request(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(aip_id): Path<String>,
) -> Result<impl IntoResponse, HttpAppError> {
    authorize(&ctx.0, &[AIPS_DOWNLOAD_ATTR])?;

    let ticket = state.service.download_aip_request(&aip_id).await?;
    Ok(Json(TicketResponse { ticket }))
}

/// Stream an AIP package. Public; authorization is the ticket.
#[tracing::instrument(skip(state, query))]
pub async fn download_aip(
    State(state): State<Arc<AppState>>,
    Path(aip_id): Path<String>,
    Query(query): Query<TicketQuery>,
) -> Result<Response, HttpAppError> {
    let download = state
        .service
        .download_aip(query.ticket.as_deref(), &aip_id)
        .await?;
    stream_response(download)
}

/// Mint a one-shot ticket for downloading a deletion report
#[tracing::instrument(skip(state, ctx))]
pub async fn deletion_report_request(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(aip_id): Path<String>,
) -> Result<impl IntoResponse, HttpAppError> {
    authorize(&ctx.0, &[AIPS_DOWNLOAD_ATTR])?;

    let ticket = state.service.deletion_report_request(&aip_id).await?;
    Ok(Json(TicketResponse { ticket }))
}

/// Stream a deletion report. Public; authorization is the ticket.
#[tracing::instrument(skip(state, query))]
pub async fn download_deletion_report(
    State(state): State<Arc<AppState>>,
    Path(aip_id): Path<String>,
    Query(query): Query<TicketQuery>,
) -> Result<Response, HttpAppError> {
    let download = state
        .service
        .download_deletion_report(query.ticket.as_deref(), &aip_id)
        .await?;
    stream_response(download)
}

fn stream_response(download: AipDownload) -> Result<Response, HttpAppError> {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            download
                .content_type
                .as_deref()
                .unwrap_or("application/octet-stream"),
        )
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", download.filename),
        );
    if let Some(size) = download.size {
        builder = builder.header(header::CONTENT_LENGTH, size);
    }

    builder
        .body(Body::from_stream(download.reader.stream))
        .map_err(|err| {
            HttpAppError(AppError::Internal(format!(
                "cannot build download response: {}",
                err
            )))
        })
}
