//! Error types for workflow runs and their activities.

use custodia_core::AppError;
use custodia_storage::BucketError;
use thiserror::Error;

/// Failure raised by a single activity attempt.
///
/// The retry loop in [`crate::context::WorkflowContext`] keys off the
/// variant: `Retryable` failures are attempted again under the step's
/// retry policy, the others end the step immediately.
#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("{0}")]
    Retryable(String),

    #[error("{0}")]
    NonRetryable(String),

    #[error("activity canceled")]
    Canceled,
}

impl ActivityError {
    pub fn retryable(err: impl std::fmt::Display) -> Self {
        ActivityError::Retryable(err.to_string())
    }

    pub fn non_retryable(err: impl std::fmt::Display) -> Self {
        ActivityError::NonRetryable(err.to_string())
    }
}

impl From<AppError> for ActivityError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Database(_)
            | AppError::Internal(_)
            | AppError::InternalWithSource { .. }
            | AppError::NotAvailable(_) => ActivityError::Retryable(err.to_string()),
            other => ActivityError::NonRetryable(other.to_string()),
        }
    }
}

impl From<BucketError> for ActivityError {
    fn from(err: BucketError) -> Self {
        match err {
            BucketError::Unavailable(_) | BucketError::Internal(_) | BucketError::Io(_) => {
                ActivityError::Retryable(err.to_string())
            }
            other => ActivityError::NonRetryable(other.to_string()),
        }
    }
}

/// Terminal outcome of a workflow run.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The run ended by an internal cancellation, for example a rejected
    /// deletion review or an engine shutdown.
    #[error("workflow canceled")]
    Canceled,

    #[error("{0}")]
    Failed(String),
}

impl WorkflowError {
    pub fn failed(err: impl std::fmt::Display) -> Self {
        WorkflowError::Failed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_retryability() {
        let err: ActivityError = AppError::Database(sqlx::Error::PoolClosed).into();
        assert!(matches!(err, ActivityError::Retryable(_)));

        let err: ActivityError = AppError::NotAvailable("busy".to_string()).into();
        assert!(matches!(err, ActivityError::Retryable(_)));

        let err: ActivityError = AppError::NotFound("AIP not found".to_string()).into();
        assert!(matches!(err, ActivityError::NonRetryable(_)));

        let err: ActivityError = AppError::NotValid("bad uuid".to_string()).into();
        assert!(matches!(err, ActivityError::NonRetryable(_)));
    }

    #[test]
    fn test_bucket_error_retryability() {
        let err: ActivityError = BucketError::Unavailable("connect refused".to_string()).into();
        assert!(matches!(err, ActivityError::Retryable(_)));

        let err: ActivityError = BucketError::NotFound("gone".to_string()).into();
        assert!(matches!(err, ActivityError::NonRetryable(_)));

        let err: ActivityError = BucketError::Unknown("status FAIL".to_string()).into();
        assert!(matches!(err, ActivityError::NonRetryable(_)));
    }
}
