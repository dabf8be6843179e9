//! Request authentication: bearer token verification and attribute checks.

pub mod middleware;
pub mod verifier;

pub use middleware::{auth_middleware, AuthContext};
pub use verifier::AuthVerifier;

use custodia_core::auth::check_attributes;
use custodia_core::{AppError, Claims};

/// Rejects the request when the caller's attributes do not cover the
/// required set. Absent claims (auth disabled) pass every check.
pub fn authorize(claims: &Option<Claims>, required: &[&str]) -> Result<(), AppError> {
    if check_attributes(claims.as_ref(), required) {
        Ok(())
    } else {
        Err(AppError::Forbidden("Forbidden".to_string()))
    }
}
