//! Deletion requests and their review lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "deletion_request_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeletionRequestStatus {
    Pending,
    Approved,
    Rejected,
    Canceled,
}

impl Display for DeletionRequestStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DeletionRequestStatus::Pending => write!(f, "pending"),
            DeletionRequestStatus::Approved => write!(f, "approved"),
            DeletionRequestStatus::Rejected => write!(f, "rejected"),
            DeletionRequestStatus::Canceled => write!(f, "canceled"),
        }
    }
}

impl FromStr for DeletionRequestStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeletionRequestStatus::Pending),
            "approved" => Ok(DeletionRequestStatus::Approved),
            "rejected" => Ok(DeletionRequestStatus::Rejected),
            "canceled" => Ok(DeletionRequestStatus::Canceled),
            _ => Err(anyhow::anyhow!("Invalid deletion request status: {}", s)),
        }
    }
}

/// A request to delete a stored AIP, subject to dual-control review.
///
/// The requester is recorded by email for display and by `(iss, sub)` for
/// identity checks. At most one request per AIP can be pending at a time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DeletionRequest {
    #[serde(skip)]
    #[sqlx(rename = "id")]
    pub db_id: i64,
    pub uuid: Uuid,
    pub aip_uuid: Uuid,
    #[serde(skip)]
    #[sqlx(rename = "workflow_id")]
    pub workflow_db_id: i64,
    pub reason: String,
    pub requester: String,
    #[serde(skip)]
    pub requester_iss: String,
    #[serde(skip)]
    pub requester_sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
    #[serde(skip)]
    pub reviewer_iss: Option<String>,
    #[serde(skip)]
    pub reviewer_sub: Option<String>,
    pub status: DeletionRequestStatus,
    pub requested_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl DeletionRequest {
    /// Reports whether `(iss, sub)` identifies the original requester.
    pub fn requested_by(&self, iss: &str, sub: &str) -> bool {
        self.requester_iss == iss && self.requester_sub == sub
    }
}
