use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle status of an AIP in custody.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "aip_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AipStatus {
    Unspecified,
    Pending,
    InReview,
    Rejected,
    Stored,
    Moving,
    Processing,
    Deleted,
}

impl Display for AipStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            AipStatus::Unspecified => write!(f, "unspecified"),
            AipStatus::Pending => write!(f, "pending"),
            AipStatus::InReview => write!(f, "in_review"),
            AipStatus::Rejected => write!(f, "rejected"),
            AipStatus::Stored => write!(f, "stored"),
            AipStatus::Moving => write!(f, "moving"),
            AipStatus::Processing => write!(f, "processing"),
            AipStatus::Deleted => write!(f, "deleted"),
        }
    }
}

impl FromStr for AipStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unspecified" => Ok(AipStatus::Unspecified),
            "pending" => Ok(AipStatus::Pending),
            "in_review" => Ok(AipStatus::InReview),
            "rejected" => Ok(AipStatus::Rejected),
            "stored" => Ok(AipStatus::Stored),
            "moving" => Ok(AipStatus::Moving),
            "processing" => Ok(AipStatus::Processing),
            "deleted" => Ok(AipStatus::Deleted),
            _ => Err(anyhow::anyhow!("Invalid AIP status: {}", s)),
        }
    }
}

/// An Archival Information Package under custody.
///
/// `object_key` names the package object in the internal bucket and never
/// changes after creation; once an AIP is moved to a permanent location the
/// object there is keyed by the AIP UUID instead.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Aip {
    pub uuid: Uuid,
    pub name: String,
    pub status: AipStatus,
    pub object_key: Uuid,
    /// Current location holding the package. `None` means the package still
    /// lives in the internal bucket.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_uuid: Option<Uuid>,
    /// Object key of the deletion report, set when the AIP is deleted
    /// through the reviewed deletion flow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_report_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aip_status_round_trip() {
        for status in [
            AipStatus::Unspecified,
            AipStatus::Pending,
            AipStatus::InReview,
            AipStatus::Rejected,
            AipStatus::Stored,
            AipStatus::Moving,
            AipStatus::Processing,
            AipStatus::Deleted,
        ] {
            let parsed: AipStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_aip_status_rejects_unknown() {
        assert!("gone".parse::<AipStatus>().is_err());
    }

    #[test]
    fn test_aip_status_serde_uses_snake_case() {
        let json = serde_json::to_string(&AipStatus::InReview).unwrap();
        assert_eq!(json, "\"in_review\"");
    }
}
