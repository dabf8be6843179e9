//! Custodia Workflow Engine
//!
//! Durable, resumable execution for the long-running storage operations:
//! uploading, moving and deleting AIPs. A workflow is a plain async
//! function composed of named steps; every completed step checkpoints its
//! result through an [`ExecutionStore`], so a run interrupted by a crash
//! or restart is re-driven from its last checkpoint by
//! [`WorkflowEngine::resume_pending`] instead of starting over.
//!
//! Workflows coordinate with the rest of the service through signals
//! ([`WorkflowContext::wait_signal`]) and act on the world through
//! [`CustodyService`], which pairs every persisted change with an event
//! on the bus.

pub mod activities;
pub mod context;
pub mod custody;
pub mod delete;
pub mod engine;
pub mod error;
pub mod executions;
pub mod move_aip;
mod signals;
pub mod upload;

#[cfg(test)]
pub(crate) mod test_support;

use uuid::Uuid;

pub use context::{Heartbeat, RemoteActivityOptions, RetryPolicy, WorkflowContext};
pub use custody::CustodyService;
pub use delete::{DeleteWorkflow, DeleteWorkflowRequest, DeletionDecisionSignal};
pub use engine::{decode_input, IdReusePolicy, WorkflowEngine, WorkflowHandler};
pub use error::{ActivityError, WorkflowError};
pub use executions::{
    ExecutionRecord, ExecutionStatus, ExecutionStore, MemoryExecutionStore, PgExecutionStore,
};
pub use move_aip::{MoveWorkflow, MoveWorkflowRequest};
pub use upload::{UploadDoneSignal, UploadWorkflow, UploadWorkflowRequest};

pub const UPLOAD_WORKFLOW_NAME: &str = "storage-upload-workflow";
pub const MOVE_WORKFLOW_NAME: &str = "storage-move-workflow";
pub const DELETE_WORKFLOW_NAME: &str = "storage-delete-workflow";

/// Signal telling an upload workflow that the AIP object has landed.
pub const UPLOAD_DONE_SIGNAL: &str = "upload-done";
/// Signal carrying the review decision for a deletion workflow.
pub const DELETION_DECISION_SIGNAL: &str = "deletion-decision";

/// Execution id of the upload workflow for an AIP. One logical run per
/// AIP at a time; the id makes signals addressable without bookkeeping.
pub fn upload_workflow_id(aip_uuid: Uuid) -> String {
    format!("{}-{}", UPLOAD_WORKFLOW_NAME, aip_uuid)
}

pub fn move_workflow_id(aip_uuid: Uuid) -> String {
    format!("{}-{}", MOVE_WORKFLOW_NAME, aip_uuid)
}

pub fn delete_workflow_id(aip_uuid: Uuid) -> String {
    format!("{}-{}", DELETE_WORKFLOW_NAME, aip_uuid)
}
