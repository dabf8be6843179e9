//! Deletion workflow.
//!
//! Deleting an AIP is a reviewed, multi-step affair: the request is put
//! in front of a second operator, and only an approval releases the
//! actual removal from the AIP's location. Every phase is visible to
//! operators through the workflow record and its tasks, and the run ends
//! by writing a deletion report before the AIP is marked deleted.
//!
//! The run stays resumable throughout: a restart replays checkpointed
//! steps, including a decision signal that was already received.

use std::sync::Arc;
use std::time::Duration;

use custodia_core::models::{
    Aip, AipStatus, DeletionRequestStatus, Location, LocationConfig, TaskStatus, WorkflowStatus,
    WorkflowType, INTERNAL_LOCATION_UUID,
};
use custodia_db::store::{NewDeletionRequest, NewTask, NewWorkflow};
use custodia_storage::{AmssClient, BucketError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::activities::amss::{delete_from_amss_location, AmssDeleteParams};
use crate::activities::report::{generate_deletion_report, FormFiller};
use crate::context::{RemoteActivityOptions, RetryPolicy, WorkflowContext};
use crate::custody::CustodyService;
use crate::engine::{decode_input, WorkflowHandler};
use crate::error::{ActivityError, WorkflowError};
use crate::{DELETE_WORKFLOW_NAME, DELETION_DECISION_SIGNAL};

const AMSS_DELETE_START_TO_CLOSE: Duration = Duration::from_secs(2 * 60 * 60);

const AMSS_DELETE_RETRY: RetryPolicy = RetryPolicy {
    initial_interval: Duration::from_secs(30),
    backoff_coefficient: 1.5,
    max_interval: Duration::from_secs(10 * 60),
    max_attempts: 5,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteWorkflowRequest {
    pub aip_uuid: Uuid,
    pub reason: String,
    pub user_email: String,
    pub user_iss: String,
    pub user_sub: String,
}

/// Payload of the review decision signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionDecisionSignal {
    pub status: DeletionRequestStatus,
    pub user_email: String,
    pub user_sub: String,
    pub user_iss: String,
}

pub struct DeleteWorkflow {
    custody: Arc<CustodyService>,
    form_filler: Arc<dyn FormFiller>,
    amss_poll_interval: Duration,
    amss_auto_approve: bool,
}

impl DeleteWorkflow {
    pub fn new(
        custody: Arc<CustodyService>,
        form_filler: Arc<dyn FormFiller>,
        amss_poll_interval: Duration,
        amss_auto_approve: bool,
    ) -> Self {
        Self {
            custody,
            form_filler,
            amss_poll_interval,
            amss_auto_approve,
        }
    }

    /// Review round trip: files the deletion request, parks the AIP and
    /// the workflow record as pending, and waits for the decision.
    async fn review(
        &self,
        ctx: &mut WorkflowContext,
        request: &DeleteWorkflowRequest,
        workflow_db_id: i64,
    ) -> Result<DeletionDecisionSignal, WorkflowError> {
        let request_db_id: i64 = ctx
            .step("create-deletion-request", || {
                let custody = self.custody.clone();
                let request = request.clone();
                async move {
                    let created = custody
                        .create_deletion_request(NewDeletionRequest {
                            aip_uuid: request.aip_uuid,
                            workflow_db_id,
                            reason: request.reason.clone(),
                            requester: request.user_email.clone(),
                            requester_iss: request.user_iss.clone(),
                            requester_sub: request.user_sub.clone(),
                        })
                        .await?;
                    Ok(created.db_id)
                }
            })
            .await?;

        ctx.step("set-workflow-pending", || {
            let custody = self.custody.clone();
            async move {
                custody
                    .update_workflow_status(workflow_db_id, WorkflowStatus::Pending)
                    .await?;
                Ok(())
            }
        })
        .await?;

        ctx.step("set-aip-pending", || {
            let custody = self.custody.clone();
            let aip_uuid = request.aip_uuid;
            async move {
                custody.update_aip_status(aip_uuid, AipStatus::Pending).await?;
                Ok(())
            }
        })
        .await?;

        let decision: DeletionDecisionSignal =
            ctx.wait_signal(DELETION_DECISION_SIGNAL).await?;
        tracing::info!(
            aip_uuid = %request.aip_uuid,
            status = %decision.status,
            "received AIP deletion decision"
        );

        ctx.step("resume-aip-processing", || {
            let custody = self.custody.clone();
            let aip_uuid = request.aip_uuid;
            async move {
                custody
                    .update_aip_status(aip_uuid, AipStatus::Processing)
                    .await?;
                Ok(())
            }
        })
        .await?;

        ctx.step("set-workflow-in-progress", || {
            let custody = self.custody.clone();
            async move {
                custody
                    .update_workflow_status(workflow_db_id, WorkflowStatus::InProgress)
                    .await?;
                Ok(())
            }
        })
        .await?;

        ctx.step("update-deletion-request", || {
            let custody = self.custody.clone();
            let decision = decision.clone();
            async move {
                custody
                    .review_deletion_request(
                        request_db_id,
                        decision.status,
                        decision.user_email,
                        decision.user_iss,
                        decision.user_sub,
                    )
                    .await?;
                Ok(())
            }
        })
        .await?;

        Ok(decision)
    }

    async fn execute(
        &self,
        ctx: &mut WorkflowContext,
        request: &DeleteWorkflowRequest,
        aip: &Aip,
        location_uuid: Uuid,
        workflow_db_id: i64,
    ) -> Result<(), WorkflowError> {
        let base_note = format!(
            "An AIP deletion has been requested by {}. Reason:\n\n{}",
            request.user_email, request.reason
        );

        let review_task_db_id: i64 = ctx
            .step("create-review-task", || {
                let custody = self.custody.clone();
                let note = format!("{}\n\nAwaiting user review.", base_note);
                async move {
                    let task = custody
                        .create_task(NewTask {
                            workflow_db_id,
                            name: "Review AIP deletion request".to_string(),
                            status: TaskStatus::Pending,
                            note,
                        })
                        .await?;
                    Ok(task.db_id)
                }
            })
            .await?;

        let review_outcome = self.review(ctx, request, workflow_db_id).await;

        let (task_status, task_note) = match &review_outcome {
            Ok(decision) => (
                TaskStatus::Done,
                format!(
                    "{}\n\nAIP deletion request {} by {}.",
                    base_note, decision.status, decision.user_email
                ),
            ),
            Err(err) => (
                TaskStatus::Error,
                format!(
                    "{}\n\nFailed to review AIP deletion request:\n{}",
                    base_note, err
                ),
            ),
        };
        ctx.step("complete-review-task", || {
            let custody = self.custody.clone();
            let note = task_note.clone();
            async move {
                custody
                    .complete_task(review_task_db_id, task_status, note)
                    .await?;
                Ok(())
            }
        })
        .await?;

        let decision = review_outcome?;
        if decision.status != DeletionRequestStatus::Approved {
            return Err(WorkflowError::Canceled);
        }

        let delete_task_db_id: i64 = ctx
            .step("create-delete-task", || {
                let custody = self.custody.clone();
                async move {
                    let task = custody
                        .create_task(NewTask {
                            workflow_db_id,
                            name: "Delete AIP".to_string(),
                            status: TaskStatus::InProgress,
                            note: "Deleting AIP".to_string(),
                        })
                        .await?;
                    Ok(task.db_id)
                }
            })
            .await?;

        let location_outcome: Result<Location, WorkflowError> = ctx
            .step("read-location", || {
                let custody = self.custody.clone();
                async move { Ok(custody.store().read_location(location_uuid).await?) }
            })
            .await;
        let location = match location_outcome {
            Ok(location) => location,
            Err(err) => {
                let note = format!("Failed to get location information:\n{}", err);
                ctx.step("complete-delete-task", || {
                    let custody = self.custody.clone();
                    let note = note.clone();
                    async move {
                        custody
                            .complete_task(delete_task_db_id, TaskStatus::Error, note)
                            .await?;
                        Ok(())
                    }
                })
                .await?;
                return Err(err);
            }
        };

        let source = location.source;
        let delete_outcome: Result<bool, WorkflowError> = match &location.config {
            LocationConfig::S3(_) => {
                ctx.step("delete-from-minio-location", || {
                    let custody = self.custody.clone();
                    let aip = aip.clone();
                    async move {
                        let (loc, key) = custody.aip_object(&aip).await?;
                        let bucket = loc.bucket().await?;
                        match bucket.delete(&key).await {
                            Ok(()) => Ok(true),
                            // Gone already, e.g. on a re-driven run.
                            Err(BucketError::NotFound(_)) => Ok(true),
                            Err(err) => Err(ActivityError::from(err)),
                        }
                    }
                })
                .await
            }
            LocationConfig::Amss(config) => {
                let opts = RemoteActivityOptions {
                    start_to_close: AMSS_DELETE_START_TO_CLOSE,
                    retry: AMSS_DELETE_RETRY,
                    retry_on_timeout: true,
                };
                let params = AmssDeleteParams {
                    aip_uuid: request.aip_uuid,
                    reason: request.reason.clone(),
                    user_email: request.user_email.clone(),
                    auto_approve: self.amss_auto_approve,
                };
                let poll_interval = self.amss_poll_interval;
                let heartbeat = ctx.heartbeat();
                let cancel = ctx.cancellation();
                let config = config.clone();
                ctx.step_remote("delete-from-amss-location", opts, move || {
                    let config = config.clone();
                    let params = params.clone();
                    let heartbeat = heartbeat.clone();
                    let cancel = cancel.clone();
                    async move {
                        let client = AmssClient::new(&config)?;
                        delete_from_amss_location(&client, &params, poll_interval, heartbeat, cancel)
                            .await
                    }
                })
                .await
            }
            _ => Err(WorkflowError::failed(format!(
                "unsupported location source: {}",
                source
            ))),
        };

        let source_name = source.to_string().to_uppercase();
        let (task_status, task_note) = match &delete_outcome {
            Ok(true) => (
                TaskStatus::Done,
                format!("AIP deleted from {} source location", source_name),
            ),
            Ok(false) => (
                TaskStatus::Done,
                format!("AIP request rejected in {} source location", source_name),
            ),
            Err(err) => (TaskStatus::Error, format!("Failed to delete AIP:\n{}", err)),
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

        if !delete_outcome? {
            return Err(WorkflowError::Canceled);
        }

        ctx.step("generate-deletion-report", || {
            let custody = self.custody.clone();
            let filler = self.form_filler.clone();
            let aip_uuid = request.aip_uuid;
            async move {
                generate_deletion_report(&custody, filler.as_ref(), aip_uuid, source).await
            }
        })
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl WorkflowHandler for DeleteWorkflow {
    fn name(&self) -> &'static str {
        DELETE_WORKFLOW_NAME
    }

    async fn run(&self, mut ctx: WorkflowContext, input: JsonValue) -> Result<(), WorkflowError> {
        let request: DeleteWorkflowRequest = decode_input(input)?;

        let aip: Aip = ctx
            .step("read-aip", || {
                let custody = self.custody.clone();
                let aip_uuid = request.aip_uuid;
                async move { Ok(custody.store().read_aip(aip_uuid).await?) }
            })
            .await?;
        if aip.status != AipStatus::Stored {
            return Err(WorkflowError::failed("AIP is no longer stored"));
        }
        let location_uuid = match aip.location_uuid {
            Some(uuid) if uuid != INTERNAL_LOCATION_UUID => uuid,
            _ => return Err(WorkflowError::failed("AIP location is missing")),
        };

        ctx.step("set-aip-processing", || {
            let custody = self.custody.clone();
            let aip_uuid = request.aip_uuid;
            async move {
                custody
                    .update_aip_status(aip_uuid, AipStatus::Processing)
                    .await?;
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
                            kind: WorkflowType::DeleteAip,
                            status: WorkflowStatus::InProgress,
                            aip_uuid,
                        })
                        .await?;
                    Ok(workflow.db_id)
                }
            })
            .await?;

        let outcome = self
            .execute(&mut ctx, &request, &aip, location_uuid, workflow_db_id)
            .await;

        // The record and the AIP reflect the outcome whichever way the
        // run ended.
        let (workflow_status, aip_status) = match &outcome {
            Ok(()) => (WorkflowStatus::Done, AipStatus::Deleted),
            Err(WorkflowError::Canceled) => (WorkflowStatus::Canceled, AipStatus::Stored),
            Err(WorkflowError::Failed(_)) => (WorkflowStatus::Error, AipStatus::Stored),
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
        ctx.step("set-final-aip-status", || {
            let custody = self.custody.clone();
            let aip_uuid = request.aip_uuid;
            async move {
                custody.update_aip_status(aip_uuid, aip_status).await?;
                Ok(())
            }
        })
        .await?;

        outcome
    }
}
