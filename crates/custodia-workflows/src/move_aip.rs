//! Relocation workflow.
//!
//! Copies an AIP's package object from its current bucket into the
//! requested permanent location, removes the source copy, and repoints
//! the AIP. The run keeps the same visible record trail the deletion
//! workflow does: a workflow row bracketing the run, a task per phase,
//! and the AIP parked in `moving` while the bytes are in flight. The
//! copy runs as a long activity with its own retry schedule; an attempt
//! that exceeds the per-attempt deadline is treated as fatal so a
//! half-copied package is never silently abandoned mid-stream.
//!
//! Permanent locations key the package object by the AIP uuid, so the
//! copy writes the target object under the uuid regardless of the
//! source key.

use std::sync::Arc;
use std::time::Duration;

use custodia_core::models::{
    Aip, AipStatus, TaskStatus, WorkflowStatus, WorkflowType, INTERNAL_LOCATION_UUID,
};
use custodia_db::store::{NewTask, NewWorkflow};
use custodia_storage::BucketError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::context::{RemoteActivityOptions, RetryPolicy, WorkflowContext};
use crate::custody::CustodyService;
use crate::engine::{decode_input, WorkflowHandler};
use crate::error::{ActivityError, WorkflowError};
use crate::MOVE_WORKFLOW_NAME;

const COPY_START_TO_CLOSE: Duration = Duration::from_secs(2 * 60 * 60);

const COPY_RETRY: RetryPolicy = RetryPolicy {
    initial_interval: Duration::from_secs(1),
    backoff_coefficient: 2.0,
    max_interval: Duration::from_secs(10 * 60),
    max_attempts: 5,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveWorkflowRequest {
    pub aip_uuid: Uuid,
    pub location_uuid: Uuid,
}

pub struct MoveWorkflow {
    custody: Arc<CustodyService>,
}

impl MoveWorkflow {
    pub fn new(custody: Arc<CustodyService>) -> Self {
        Self { custody }
    }

    async fn execute(
        &self,
        ctx: &mut WorkflowContext,
        request: &MoveWorkflowRequest,
        aip: &Aip,
        workflow_db_id: i64,
    ) -> Result<(), WorkflowError> {
        let copy_task_db_id: i64 = ctx
            .step("create-copy-task", || {
                let custody = self.custody.clone();
                async move {
                    let task = custody
                        .create_task(NewTask {
                            workflow_db_id,
                            name: "Copy AIP".to_string(),
                            status: TaskStatus::InProgress,
                            note: "Copying AIP to target location".to_string(),
                        })
                        .await?;
                    Ok(task.db_id)
                }
            })
            .await?;

        let copy_opts = RemoteActivityOptions {
            start_to_close: COPY_START_TO_CLOSE,
            retry: COPY_RETRY,
            retry_on_timeout: false,
        };
        let copy_outcome: Result<(), WorkflowError> = ctx
            .step_remote("copy-to-location", copy_opts, || {
                let custody = self.custody.clone();
                let aip = aip.clone();
                let target_uuid = request.location_uuid;
                async move {
                    let (source, source_key) = custody.aip_object(&aip).await?;
                    let target = custody.aip_location(Some(target_uuid)).await?;
                    let source_bucket = source.bucket().await?;
                    let target_bucket = target.bucket().await?;
                    target_bucket
                        .copy_from(&aip.uuid.to_string(), source_bucket.as_ref(), &source_key)
                        .await?;
                    Ok(())
                }
            })
            .await;

        let (task_status, task_note) = match &copy_outcome {
            Ok(()) => (
                TaskStatus::Done,
                "AIP copied to target location".to_string(),
            ),
            Err(err) => (TaskStatus::Error, format!("Failed to copy AIP:\n{}", err)),
        };
        ctx.step("complete-copy-task", || {
            let custody = self.custody.clone();
            let note = task_note.clone();
            async move {
                custody
                    .complete_task(copy_task_db_id, task_status, note)
                    .await?;
                Ok(())
            }
        })
        .await?;
        copy_outcome?;

        let delete_task_db_id: i64 = ctx
            .step("create-delete-task", || {
                let custody = self.custody.clone();
                async move {
                    let task = custody
                        .create_task(NewTask {
                            workflow_db_id,
                            name: "Delete AIP".to_string(),
                            status: TaskStatus::InProgress,
                            note: "Deleting AIP from source location".to_string(),
                        })
                        .await?;
                    Ok(task.db_id)
                }
            })
            .await?;

        let delete_outcome: Result<(), WorkflowError> = ctx
            .step("delete-from-source", || {
                let custody = self.custody.clone();
                let aip = aip.clone();
                async move {
                    let (source, source_key) = custody.aip_object(&aip).await?;
                    let bucket = source.bucket().await?;
                    match bucket.delete(&source_key).await {
                        Ok(()) => Ok(()),
                        // A re-driven run may find the source already gone.
                        Err(BucketError::NotFound(_)) => Ok(()),
                        Err(err) => Err(ActivityError::from(err)),
                    }
                }
            })
            .await;

        let (task_status, task_note) = match &delete_outcome {
            Ok(()) => (
                TaskStatus::Done,
                "AIP deleted from source location".to_string(),
            ),
            Err(err) => (
                TaskStatus::Error,
                format!("Failed to delete AIP from source location:\n{}", err),
            ),
        };
        ctx.step("complete-delete-task", || {
            let custody = self.custody.clone();
            let note = task_note.clone();
            async move {
                custody
                    .complete_task(delete_task_db_id, task_status, note)
                    .await?;
                Ok(())
            }
        })
        .await?;
        delete_outcome?;

        ctx.step("update-aip-location", || {
            let custody = self.custody.clone();
            let aip_uuid = request.aip_uuid;
            let location_uuid = request.location_uuid;
            async move {
                custody.update_aip_location(aip_uuid, location_uuid).await?;
                Ok(())
            }
        })
        .await?;

        ctx.step("set-aip-stored", || {
            let custody = self.custody.clone();
            let aip_uuid = request.aip_uuid;
            async move {
                custody.update_aip_status(aip_uuid, AipStatus::Stored).await?;
                Ok(())
            }
        })
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl WorkflowHandler for MoveWorkflow {
    fn name(&self) -> &'static str {
        MOVE_WORKFLOW_NAME
    }

    async fn run(&self, mut ctx: WorkflowContext, input: JsonValue) -> Result<(), WorkflowError> {
        let request: MoveWorkflowRequest = decode_input(input)?;

        let aip: Aip = ctx
            .step("read-aip", || {
                let custody = self.custody.clone();
                let aip_uuid = request.aip_uuid;
                async move { Ok(custody.store().read_aip(aip_uuid).await?) }
            })
            .await?;
        // Copying onto the source and then deleting it would destroy the
        // only copy, so a move to the current location never starts.
        if aip.location_uuid.unwrap_or(INTERNAL_LOCATION_UUID) == request.location_uuid {
            return Err(WorkflowError::failed(
                "AIP is already stored in the target location",
            ));
        }

        ctx.step("set-aip-moving", || {
            let custody = self.custody.clone();
            let aip_uuid = request.aip_uuid;
            async move {
                custody.update_aip_status(aip_uuid, AipStatus::Moving).await?;
                Ok(())
            }
        })
        .await?;

        let execution_id = ctx.execution_id().to_string();
        let workflow_db_id: i64 = ctx
            .step("create-workflow", || {
                let custody = self.custody.clone();
                let execution_id = execution_id.clone();
                let aip_uuid = request.aip_uuid;
                async move {
                    let workflow = custody
                        .create_workflow(NewWorkflow {
                            execution_id,
                            kind: WorkflowType::MoveAip,
                            status: WorkflowStatus::InProgress,
                            aip_uuid,
                        })
                        .await?;
                    Ok(workflow.db_id)
                }
            })
            .await?;

        let outcome = self.execute(&mut ctx, &request, &aip, workflow_db_id).await;

        let workflow_status = match &outcome {
            Ok(()) => WorkflowStatus::Done,
            Err(WorkflowError::Canceled) => WorkflowStatus::Canceled,
            Err(WorkflowError::Failed(_)) => WorkflowStatus::Error,
        };
        ctx.step("complete-workflow", || {
            let custody = self.custody.clone();
            async move {
                custody
                    .update_workflow_status(workflow_db_id, workflow_status)
                    .await?;
                Ok(())
            }
        })
        .await?;

        // A run that did not finish leaves the object at its source, so
        // the AIP drops back to the status it held before the move.
        if outcome.is_err() {
            let prior_status = aip.status;
            ctx.step("restore-aip-status", || {
                let custody = self.custody.clone();
                let aip_uuid = request.aip_uuid;
                async move {
                    custody.update_aip_status(aip_uuid, prior_status).await?;
                    Ok(())
                }
            })
            .await?;
        }

        outcome
    }
}
