//! Durable workflow engine.
//!
//! Runs registered workflow handlers as background tasks backed by an
//! [`ExecutionStore`]. A run checkpoints every activity result and signal
//! payload, so [`WorkflowEngine::resume_pending`] can re-drive runs that
//! were interrupted by a restart and replay them up to the point where
//! they stopped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use custodia_core::error::AppError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;

use crate::context::WorkflowContext;
use crate::error::WorkflowError;
use crate::executions::{ExecutionRecord, ExecutionStatus, ExecutionStore};
use crate::signals::{SignalHub, SignalSendError};

/// How long a signal waits for its target run to come up.
const SIGNAL_ATTACH_TIMEOUT: Duration = Duration::from_secs(5);
const SIGNAL_ATTACH_POLL: Duration = Duration::from_millis(100);

/// What to do when a workflow is started under an execution id that has
/// run before. A second concurrent run is always rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdReusePolicy {
    /// Any finished run may be followed by a new one.
    AllowDuplicate,
    /// A new run is allowed only when the previous one did not complete.
    AllowDuplicateFailedOnly,
    /// At most one run, ever.
    RejectDuplicate,
}

#[async_trait::async_trait]
pub trait WorkflowHandler: Send + Sync {
    /// Stable name, used as the execution record kind and for dispatch on
    /// resume.
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: WorkflowContext, input: JsonValue) -> Result<(), WorkflowError>;
}

pub struct WorkflowEngine {
    store: Arc<dyn ExecutionStore>,
    signals: Arc<SignalHub>,
    permits: Arc<Semaphore>,
    handlers: HashMap<&'static str, Arc<dyn WorkflowHandler>>,
    cancel_tx: watch::Sender<bool>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn ExecutionStore>, max_workers: usize) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            store,
            signals: Arc::new(SignalHub::new()),
            permits: Arc::new(Semaphore::new(max_workers)),
            handlers: HashMap::new(),
            cancel_tx,
        }
    }

    /// Registers a handler. Call for every workflow type before serving
    /// traffic or resuming pending runs.
    pub fn register(&mut self, handler: Arc<dyn WorkflowHandler>) {
        self.handlers.insert(handler.name(), handler);
    }

    /// Starts a new run of the named workflow. Returns once the run is
    /// recorded and spawned, not once it finishes.
    pub async fn start<I: Serialize>(
        &self,
        execution_id: &str,
        workflow: &str,
        input: &I,
        policy: IdReusePolicy,
    ) -> Result<(), AppError> {
        let handler = self
            .handlers
            .get(workflow)
            .cloned()
            .ok_or_else(|| {
                AppError::Internal(format!("no handler registered for workflow {}", workflow))
            })?;

        if let Some(previous) = self.store.latest(execution_id).await? {
            if previous.status.is_terminal() {
                match policy {
                    IdReusePolicy::AllowDuplicate => {}
                    IdReusePolicy::RejectDuplicate => {
                        return Err(AppError::NotAvailable(
                            "workflow was already started".to_string(),
                        ));
                    }
                    IdReusePolicy::AllowDuplicateFailedOnly => {
                        if previous.status == ExecutionStatus::Completed {
                            return Err(AppError::NotAvailable(
                                "workflow has already completed".to_string(),
                            ));
                        }
                    }
                }
            }
            // A still-running previous run is caught by the insert below.
        }

        let input = serde_json::to_value(input)?;
        let record = self.store.insert(execution_id, workflow, &input).await?;

        tracing::info!(
            workflow,
            execution_id,
            "starting workflow run"
        );
        self.signals.attach(execution_id);
        self.spawn_run(record, handler);
        Ok(())
    }

    /// Delivers a signal to a running workflow, waiting briefly for a run
    /// that is still initializing.
    pub async fn signal<P: Serialize>(
        &self,
        execution_id: &str,
        name: &str,
        payload: &P,
    ) -> Result<(), AppError> {
        let payload = serde_json::to_value(payload)?;
        let deadline = Instant::now() + SIGNAL_ATTACH_TIMEOUT;
        loop {
            match self.signals.send(execution_id, name, payload.clone()) {
                Ok(()) => return Ok(()),
                Err(SignalSendError::Overflow) => {
                    return Err(AppError::NotAvailable("signal buffer is full".to_string()));
                }
                Err(SignalSendError::NotAttached) => {
                    if Instant::now() >= deadline {
                        return Err(AppError::NotAvailable(
                            "cannot perform operation".to_string(),
                        ));
                    }
                    tokio::time::sleep(SIGNAL_ATTACH_POLL).await;
                }
            }
        }
    }

    /// Status of the latest run under the given execution id.
    pub async fn describe(&self, execution_id: &str) -> Result<ExecutionStatus, AppError> {
        let record = self
            .store
            .latest(execution_id)
            .await?
            .ok_or_else(|| AppError::NotFound("workflow execution not found".to_string()))?;
        Ok(record.status)
    }

    /// Re-drives runs that were recorded as running but are not attached
    /// to this engine, replaying their checkpoints. Returns how many runs
    /// were picked up.
    pub async fn resume_pending(&self) -> Result<usize, AppError> {
        let mut resumed = 0;
        for record in self.store.list_running().await? {
            if self.signals.is_attached(&record.execution_id) {
                continue;
            }
            let Some(handler) = self.handlers.get(record.kind.as_str()).cloned() else {
                tracing::warn!(
                    workflow = %record.kind,
                    execution_id = %record.execution_id,
                    "no handler for recorded run, leaving it as-is"
                );
                continue;
            };
            tracing::info!(
                workflow = %record.kind,
                execution_id = %record.execution_id,
                "resuming interrupted workflow run"
            );
            self.signals.attach(&record.execution_id);
            self.spawn_run(record, handler);
            resumed += 1;
        }
        if resumed > 0 {
            tracing::info!(count = resumed, "resumed workflow runs");
        }
        Ok(resumed)
    }

    /// Cancels running workflows and stops admitting activity attempts.
    pub fn shutdown(&self) {
        let _ = self.cancel_tx.send(true);
        self.permits.close();
    }

    fn spawn_run(&self, record: ExecutionRecord, handler: Arc<dyn WorkflowHandler>) {
        let ctx = WorkflowContext::new(
            &record,
            self.store.clone(),
            self.signals.clone(),
            self.permits.clone(),
            self.cancel_tx.subscribe(),
        );
        let store = self.store.clone();
        let signals = self.signals.clone();
        tokio::spawn(async move {
            let result = handler.run(ctx, record.input.clone()).await;
            let status = match &result {
                Ok(()) => ExecutionStatus::Completed,
                Err(WorkflowError::Canceled) => ExecutionStatus::Canceled,
                Err(WorkflowError::Failed(_)) => ExecutionStatus::Failed,
            };
            match &result {
                Ok(()) => tracing::info!(
                    workflow = %record.kind,
                    execution_id = %record.execution_id,
                    "workflow run completed"
                ),
                Err(WorkflowError::Canceled) => tracing::warn!(
                    workflow = %record.kind,
                    execution_id = %record.execution_id,
                    "workflow run canceled"
                ),
                Err(WorkflowError::Failed(msg)) => tracing::error!(
                    workflow = %record.kind,
                    execution_id = %record.execution_id,
                    error = %msg,
                    "workflow run failed"
                ),
            }
            if let Err(err) = store.set_status(record.db_id, status).await {
                tracing::error!(
                    execution_id = %record.execution_id,
                    error = %err,
                    "failed to record workflow outcome"
                );
            }
            signals.detach(&record.execution_id);
        });
    }
}

/// Decodes the stored input of a run back into the handler's request type.
pub fn decode_input<T: DeserializeOwned>(input: JsonValue) -> Result<T, WorkflowError> {
    serde_json::from_value(input)
        .map_err(|err| WorkflowError::Failed(format!("decode workflow input: {}", err)))
}
