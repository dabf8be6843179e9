//! Submission workflow.
//!
//! Holds a submission open from the moment a signed upload URL is handed
//! out until the client reports the upload done or the URL expires. The
//! facade rejects submission-phase operations unless this run is still
//! going, so the timer doubles as the submission deadline.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::context::WorkflowContext;
use crate::engine::{decode_input, WorkflowHandler};
use crate::error::WorkflowError;
use crate::{UPLOAD_DONE_SIGNAL, UPLOAD_WORKFLOW_NAME};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadWorkflowRequest {
    pub aip_uuid: Uuid,
}

/// Payload of the signal that completes a submission.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UploadDoneSignal {}

pub struct UploadWorkflow {
    expiry: Duration,
}

impl UploadWorkflow {
    /// `expiry` matches the lifetime of the signed submission URL.
    pub fn new(expiry: Duration) -> Self {
        Self { expiry }
    }
}

#[async_trait::async_trait]
impl WorkflowHandler for UploadWorkflow {
    fn name(&self) -> &'static str {
        UPLOAD_WORKFLOW_NAME
    }

    async fn run(&self, mut ctx: WorkflowContext, input: JsonValue) -> Result<(), WorkflowError> {
        let request: UploadWorkflowRequest = decode_input(input)?;

        let received = ctx
            .wait_signal_with_timer::<UploadDoneSignal>(UPLOAD_DONE_SIGNAL, self.expiry)
            .await?;
        match received {
            Some(_) => tracing::info!(aip_uuid = %request.aip_uuid, "AIP upload reported done"),
            None => {
                tracing::info!(aip_uuid = %request.aip_uuid, "submission window expired")
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{IdReusePolicy, WorkflowEngine};
    use crate::executions::{ExecutionStatus, MemoryExecutionStore};
    use crate::test_support::wait_status;
    use crate::upload_workflow_id;
    use std::sync::Arc;

    fn engine() -> WorkflowEngine {
        let mut engine = WorkflowEngine::new(Arc::new(MemoryExecutionStore::new()), 4);
        engine.register(Arc::new(UploadWorkflow::new(Duration::from_secs(900))));
        engine
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_completes_on_signal() {
        let engine = engine();
        let aip_uuid = Uuid::new_v4();
        let execution_id = upload_workflow_id(aip_uuid);

        engine
            .start(
                &execution_id,
                UPLOAD_WORKFLOW_NAME,
                &UploadWorkflowRequest { aip_uuid },
                IdReusePolicy::AllowDuplicate,
            )
            .await
            .unwrap();

        engine
            .signal(&execution_id, UPLOAD_DONE_SIGNAL, &UploadDoneSignal::default())
            .await
            .unwrap();
        wait_status(&engine, &execution_id, ExecutionStatus::Completed).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_completes_when_url_expires() {
        let engine = engine();
        let aip_uuid = Uuid::new_v4();
        let execution_id = upload_workflow_id(aip_uuid);

        engine
            .start(
                &execution_id,
                UPLOAD_WORKFLOW_NAME,
                &UploadWorkflowRequest { aip_uuid },
                IdReusePolicy::AllowDuplicate,
            )
            .await
            .unwrap();

        // No signal arrives; the submission window runs out on its own.
        wait_status(&engine, &execution_id, ExecutionStatus::Completed).await;
    }
}
