//! Status transition tables for AIPs and deletion requests.
//!
//! Both stores consult these before committing an update. A transition not
//! present in the table fails with `NotValid`, keeping illegal states out of
//! the database regardless of which code path attempted the change.

use custodia_core::models::{AipStatus, DeletionRequest, DeletionRequestStatus};
use custodia_core::AppError;

/// Reports whether an AIP may move from `from` to `to`.
///
/// A no-op transition (`from == to`) is always allowed so repeated updates
/// are idempotent.
pub fn aip_transition_allowed(from: AipStatus, to: AipStatus) -> bool {
    use AipStatus::*;

    if from == to {
        return true;
    }

    matches!(
        (from, to),
        (Unspecified, Pending)
            | (Unspecified, InReview)
            | (Unspecified, Processing)
            | (Pending, InReview)
            | (Pending, Processing)
            | (Pending, Stored)
            | (Pending, Rejected)
            | (InReview, Pending)
            | (InReview, Processing)
            | (InReview, Stored)
            | (InReview, Rejected)
            | (InReview, Moving)
            | (Moving, Stored)
            | (Moving, InReview)
            | (Stored, Processing)
            | (Stored, Moving)
            | (Stored, Pending)
            | (Processing, Pending)
            | (Processing, InReview)
            | (Processing, Stored)
            | (Processing, Deleted)
    )
}

/// Reports whether a deletion request may move from `from` to `to`.
///
/// Requests leave `pending` exactly once; review outcomes are final.
pub fn deletion_request_transition_allowed(
    from: DeletionRequestStatus,
    to: DeletionRequestStatus,
) -> bool {
    use DeletionRequestStatus::*;

    if from == to {
        return true;
    }

    matches!((from, to), (Pending, Approved) | (Pending, Rejected) | (Pending, Canceled))
}

/// Validates an AIP status change, failing with `NotValid` when disallowed.
pub fn check_aip_transition(from: AipStatus, to: AipStatus) -> Result<(), AppError> {
    if !aip_transition_allowed(from, to) {
        return Err(AppError::NotValid(format!(
            "AIP status cannot change from {} to {}",
            from, to
        )));
    }
    Ok(())
}

/// Validates a deletion request status change, failing with `NotValid` when
/// disallowed.
pub fn check_deletion_request_transition(
    from: DeletionRequestStatus,
    to: DeletionRequestStatus,
) -> Result<(), AppError> {
    if !deletion_request_transition_allowed(from, to) {
        return Err(AppError::NotValid(format!(
            "deletion request status cannot change from {} to {}",
            from, to
        )));
    }
    Ok(())
}

/// Enforces dual control on a reviewed deletion request.
///
/// A request moved to `approved` or `rejected` must carry a reviewer
/// identity distinct from the requester's `(iss, sub)` pair.
pub fn check_deletion_review(request: &DeletionRequest) -> Result<(), AppError> {
    if !matches!(
        request.status,
        DeletionRequestStatus::Approved | DeletionRequestStatus::Rejected
    ) {
        return Ok(());
    }

    let (iss, sub) = match (&request.reviewer_iss, &request.reviewer_sub) {
        (Some(iss), Some(sub)) if !iss.is_empty() && !sub.is_empty() => (iss, sub),
        _ => {
            return Err(AppError::NotValid(
                "reviewer identity is required".to_string(),
            ));
        }
    };

    if request.requested_by(iss, sub) {
        return Err(AppError::NotValid(
            "requester cannot review their own request".to_string(),
        ));
    }

    Ok(())
}
