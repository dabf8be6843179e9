//! Authentication middleware for protected routes.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use custodia_core::{AppError, Claims};

use crate::error::HttpAppError;

use super::AuthVerifier;

/// Verified caller identity, attached to the request by [`auth_middleware`].
/// `None` means authentication is disabled and every operation runs
/// unattributed.
#[derive(Debug, Clone)]
pub struct AuthContext(pub Option<Claims>);

/// Verifies the bearer token on protected routes and attaches the resulting
/// [`AuthContext`] for downstream handlers.
pub async fn auth_middleware(
    State(verifier): State<Arc<AuthVerifier>>,
    mut request: Request,
    next: Next,
) -> Response {
    if !verifier.enabled() {
        request.extensions_mut().insert(AuthContext(None));
        return next.run(request).await;
    }

    let auth_header = match request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        Some(header) => header,
        None => {
            return HttpAppError(AppError::Unauthorized(
                "Missing authorization header".to_string(),
            ))
            .into_response();
        }
    };

    if !auth_header.starts_with("Bearer ") {
        return HttpAppError(AppError::Unauthorized(
            "Invalid authorization header format".to_string(),
        ))
        .into_response();
    }

    let token = &auth_header[7..];

    match verifier.verify(token) {
        Ok(claims) => {
            request.extensions_mut().insert(AuthContext(claims));
            next.run(request).await
        }
        Err(err) => HttpAppError(err).into_response(),
    }
}
