//! Storage lifecycle events.
//!
//! Events serialize to an adjacently tagged envelope, `{"type": ...,
//! "value": ...}`, which is also the wire form sent to monitor clients
//! and through the pub/sub backend.

use custodia_core::models::{Aip, AipStatus, DeletionRequest, Location, Task, Workflow};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StorageEvent {
    StoragePing(StoragePingEvent),
    LocationCreated(LocationCreatedEvent),
    AipCreated(AipCreatedEvent),
    AipStatusUpdated(AipStatusUpdatedEvent),
    AipLocationUpdated(AipLocationUpdatedEvent),
    AipWorkflowCreated(AipWorkflowEvent),
    AipWorkflowUpdated(AipWorkflowEvent),
    AipTaskCreated(AipTaskEvent),
    AipTaskUpdated(AipTaskEvent),
    AipDeletionRequestCreated(AipDeletionRequestEvent),
    AipDeletionRequestUpdated(AipDeletionRequestEvent),
}

impl StorageEvent {
    /// The wire tag, for logging and filter tables.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageEvent::StoragePing(_) => "storage_ping",
            StorageEvent::LocationCreated(_) => "location_created",
            StorageEvent::AipCreated(_) => "aip_created",
            StorageEvent::AipStatusUpdated(_) => "aip_status_updated",
            StorageEvent::AipLocationUpdated(_) => "aip_location_updated",
            StorageEvent::AipWorkflowCreated(_) => "aip_workflow_created",
            StorageEvent::AipWorkflowUpdated(_) => "aip_workflow_updated",
            StorageEvent::AipTaskCreated(_) => "aip_task_created",
            StorageEvent::AipTaskUpdated(_) => "aip_task_updated",
            StorageEvent::AipDeletionRequestCreated(_) => "aip_deletion_request_created",
            StorageEvent::AipDeletionRequestUpdated(_) => "aip_deletion_request_updated",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoragePingEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationCreatedEvent {
    pub uuid: Uuid,
    pub item: Location,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AipCreatedEvent {
    pub uuid: Uuid,
    pub item: Aip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AipStatusUpdatedEvent {
    pub uuid: Uuid,
    pub status: AipStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AipLocationUpdatedEvent {
    pub uuid: Uuid,
    pub location_uuid: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AipWorkflowEvent {
    pub uuid: Uuid,
    pub item: Workflow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AipTaskEvent {
    pub uuid: Uuid,
    pub item: Task,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AipDeletionRequestEvent {
    pub uuid: Uuid,
    pub item: DeletionRequest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let uuid = Uuid::new_v4();
        let event = StorageEvent::AipStatusUpdated(AipStatusUpdatedEvent {
            uuid,
            status: AipStatus::Stored,
        });

        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(encoded["type"], "aip_status_updated");
        assert_eq!(encoded["value"]["uuid"], uuid.to_string());
        assert_eq!(encoded["value"]["status"], "stored");
    }

    #[test]
    fn test_roundtrip() {
        let event = StorageEvent::StoragePing(StoragePingEvent {
            message: Some("hello".to_string()),
        });

        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: StorageEvent = serde_json::from_str(&encoded).unwrap();
        match decoded {
            StorageEvent::StoragePing(ping) => assert_eq!(ping.message.as_deref(), Some("hello")),
            other => panic!("unexpected event: {}", other.kind()),
        }
    }

    #[test]
    fn test_kind_matches_wire_tag() {
        let event = StorageEvent::AipDeletionRequestCreated(AipDeletionRequestEvent {
            uuid: Uuid::new_v4(),
            item: deletion_request(),
        });
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(encoded["type"], event.kind());
    }

    fn deletion_request() -> DeletionRequest {
        DeletionRequest {
            db_id: 1,
            uuid: Uuid::new_v4(),
            aip_uuid: Uuid::new_v4(),
            workflow_db_id: 1,
            reason: "duplicate holdings".to_string(),
            requester: "curator@example.org".to_string(),
            requester_iss: "https://sso.example.org".to_string(),
            requester_sub: "curator".to_string(),
            reviewer: None,
            reviewer_iss: None,
            reviewer_sub: None,
            status: custodia_core::models::DeletionRequestStatus::Pending,
            requested_at: chrono::Utc::now(),
            reviewed_at: None,
        }
    }
}
