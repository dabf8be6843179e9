//! Bucket operation errors shared by all backends.

use custodia_core::AppError;
use thiserror::Error;

/// Errors raised by location and bucket operations.
///
/// Remote backend failures are mapped to a small portable set so callers
/// can react without knowing which backend is behind a location.
#[derive(Debug, Error)]
pub enum BucketError {
    #[error("invalid location config: {0}")]
    InvalidConfig(String),

    /// The backend cannot perform this operation at all.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// The backend could support this operation but does not implement it.
    #[error("operation not implemented: {0}")]
    Unimplemented(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("backend error: {0}")]
    Internal(String),

    #[error("unexpected backend response: {0}")]
    Unknown(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bucket operations.
pub type BucketResult<T> = Result<T, BucketError>;

impl From<object_store::Error> for BucketError {
    fn from(err: object_store::Error) -> Self {
        let message = err.to_string();
        match err {
            object_store::Error::NotFound { .. } => BucketError::NotFound(message),
            object_store::Error::PermissionDenied { .. } => {
                BucketError::PermissionDenied(message)
            }
            object_store::Error::Unauthenticated { .. } => {
                BucketError::PermissionDenied(message)
            }
            _ => BucketError::Internal(message),
        }
    }
}

impl From<BucketError> for AppError {
    fn from(err: BucketError) -> Self {
        match err {
            BucketError::NotFound(_) => AppError::NotFound("object not found".to_string()),
            BucketError::PermissionDenied(msg) => AppError::Forbidden(msg),
            BucketError::InvalidConfig(msg) => {
                AppError::NotValid(format!("invalid location config: {}", msg))
            }
            BucketError::Unavailable(msg) => AppError::NotAvailable(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}
