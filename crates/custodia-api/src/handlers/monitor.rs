//! Monitor (SSE) handlers.

use std::sync::Arc;

use axum::{
    extract::{Extension, Query, State},
    response::{sse::Sse, IntoResponse, Json},
};
use serde::Deserialize;

use crate::auth::AuthContext;
use crate::error::HttpAppError;
use crate::handlers::TicketResponse;
use crate::monitor::monitor_stream;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct MonitorQuery {
    pub ticket: Option<String>,
}

/// Mint a ticket for the event stream, bound to the caller's claims
#[tracing::instrument(skip(state, ctx))]
pub async fn monitor_request(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse, HttpAppError> {
    let ticket = state.service.monitor_request(ctx.0.as_ref()).await?;
    Ok(Json(TicketResponse { ticket }))
}

/// Open the event stream. Public; authorization is the ticket.
#[tracing::instrument(skip(state, query))]
pub async fn monitor(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MonitorQuery>,
) -> Result<impl IntoResponse, HttpAppError> {
    let (claims, subscription) = state.service.monitor(query.ticket.as_deref()).await?;
    Ok(Sse::new(monitor_stream(claims, subscription)))
}
