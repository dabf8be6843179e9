//! Custody layer joining the archive store, the event bus, and the set of
//! open storage locations.
//!
//! Workflow activities and the service facade mutate AIP state through
//! this layer so that every accepted mutation is announced on the event
//! bus. Publication is best-effort; a full or absent monitor never blocks
//! a mutation.

use std::sync::Arc;

use chrono::Utc;
use custodia_core::models::{
    Aip, AipStatus, DeletionRequest, DeletionRequestStatus, Location, Task, TaskStatus, Workflow,
    WorkflowStatus, INTERNAL_LOCATION_UUID,
};
use custodia_core::AppError;
use custodia_db::store::{NewAip, NewDeletionRequest, NewLocation, NewTask, NewWorkflow};
use custodia_db::ArchiveStore;
use custodia_events::{
    AipCreatedEvent, AipDeletionRequestEvent, AipLocationUpdatedEvent, AipStatusUpdatedEvent,
    AipTaskEvent, AipWorkflowEvent, EventBus, LocationCreatedEvent, StorageEvent,
};
use custodia_storage::{LocationSet, StorageLocation};
use uuid::Uuid;

pub struct CustodyService {
    store: Arc<dyn ArchiveStore>,
    events: Arc<dyn EventBus>,
    locations: Arc<LocationSet>,
}

impl CustodyService {
    pub fn new(
        store: Arc<dyn ArchiveStore>,
        events: Arc<dyn EventBus>,
        locations: Arc<LocationSet>,
    ) -> Self {
        Self {
            store,
            events,
            locations,
        }
    }

    pub fn store(&self) -> &dyn ArchiveStore {
        self.store.as_ref()
    }

    pub fn events(&self) -> &dyn EventBus {
        self.events.as_ref()
    }

    pub fn locations(&self) -> &LocationSet {
        &self.locations
    }

    /// Resolves an AIP's location reference to an open location. A missing
    /// or nil reference means the internal bucket.
    pub async fn aip_location(
        &self,
        location_uuid: Option<Uuid>,
    ) -> Result<Arc<StorageLocation>, AppError> {
        match location_uuid {
            None => Ok(self.locations.internal()),
            Some(uuid) if uuid == INTERNAL_LOCATION_UUID => Ok(self.locations.internal()),
            Some(uuid) => {
                let location = self.store.read_location(uuid).await?;
                Ok(self.locations.open(&location)?)
            }
        }
    }

    /// Resolves an AIP to the location holding its package object and the
    /// key the object lives under there. The internal bucket keys packages
    /// by object key; permanent locations key them by the AIP UUID.
    pub async fn aip_object(
        &self,
        aip: &Aip,
    ) -> Result<(Arc<StorageLocation>, String), AppError> {
        let location = self.aip_location(aip.location_uuid).await?;
        let key = if location.uuid() == INTERNAL_LOCATION_UUID {
            aip.object_key.to_string()
        } else {
            aip.uuid.to_string()
        };
        Ok((location, key))
    }

    pub async fn create_location(&self, loc: NewLocation) -> Result<Location, AppError> {
        let location = self.store.create_location(loc).await?;
        self.events
            .publish(StorageEvent::LocationCreated(LocationCreatedEvent {
                uuid: location.uuid,
                item: location.clone(),
            }))
            .await;
        Ok(location)
    }

    pub async fn create_aip(&self, aip: NewAip) -> Result<Aip, AppError> {
        let aip = self.store.create_aip(aip).await?;
        self.events
            .publish(StorageEvent::AipCreated(AipCreatedEvent {
                uuid: aip.uuid,
                item: aip.clone(),
            }))
            .await;
        Ok(aip)
    }

    pub async fn update_aip_status(
        &self,
        uuid: Uuid,
        status: AipStatus,
    ) -> Result<Aip, AppError> {
        let aip = self.store.update_aip_status(uuid, status).await?;
        self.events
            .publish(StorageEvent::AipStatusUpdated(AipStatusUpdatedEvent {
                uuid,
                status: aip.status,
            }))
            .await;
        Ok(aip)
    }

    pub async fn update_aip_location(
        &self,
        uuid: Uuid,
        location_uuid: Uuid,
    ) -> Result<Aip, AppError> {
        let aip = self.store.update_aip_location(uuid, location_uuid).await?;
        self.events
            .publish(StorageEvent::AipLocationUpdated(AipLocationUpdatedEvent {
                uuid,
                location_uuid,
            }))
            .await;
        Ok(aip)
    }

    /// Records where the deletion report for an AIP was written.
    pub async fn set_aip_deletion_report_key(
        &self,
        uuid: Uuid,
        key: String,
    ) -> Result<Aip, AppError> {
        self.store
            .update_aip(
                uuid,
                Box::new(move |aip| {
                    aip.deletion_report_key = Some(key);
                    Ok(())
                }),
            )
            .await
    }

    pub async fn create_workflow(&self, workflow: NewWorkflow) -> Result<Workflow, AppError> {
        let workflow = self.store.create_workflow(workflow).await?;
        self.events
            .publish(StorageEvent::AipWorkflowCreated(AipWorkflowEvent {
                uuid: workflow.uuid,
                item: workflow.clone(),
            }))
            .await;
        Ok(workflow)
    }

    /// Moves a workflow record to a new status, stamping `completed_at`
    /// when the status is terminal.
    pub async fn update_workflow_status(
        &self,
        db_id: i64,
        status: WorkflowStatus,
    ) -> Result<Workflow, AppError> {
        let terminal = matches!(
            status,
            WorkflowStatus::Done | WorkflowStatus::Error | WorkflowStatus::Canceled
        );
        let workflow = self
            .store
            .update_workflow(
                db_id,
                Box::new(move |workflow| {
                    workflow.status = status;
                    if terminal && workflow.completed_at.is_none() {
                        workflow.completed_at = Some(Utc::now());
                    }
                    Ok(())
                }),
            )
            .await?;
        self.events
            .publish(StorageEvent::AipWorkflowUpdated(AipWorkflowEvent {
                uuid: workflow.uuid,
                item: workflow.clone(),
            }))
            .await;
        Ok(workflow)
    }

    pub async fn create_task(&self, task: NewTask) -> Result<Task, AppError> {
        let task = self.store.create_task(task).await?;
        self.events
            .publish(StorageEvent::AipTaskCreated(AipTaskEvent {
                uuid: task.uuid,
                item: task.clone(),
            }))
            .await;
        Ok(task)
    }

    /// Closes out a task with its final status and note.
    pub async fn complete_task(
        &self,
        db_id: i64,
        status: TaskStatus,
        note: String,
    ) -> Result<Task, AppError> {
        let task = self
            .store
            .update_task(
                db_id,
                Box::new(move |task| {
                    task.status = status;
                    task.note = note;
                    task.completed_at = Some(Utc::now());
                    Ok(())
                }),
            )
            .await?;
        self.events
            .publish(StorageEvent::AipTaskUpdated(AipTaskEvent {
                uuid: task.uuid,
                item: task.clone(),
            }))
            .await;
        Ok(task)
    }

    pub async fn create_deletion_request(
        &self,
        request: NewDeletionRequest,
    ) -> Result<DeletionRequest, AppError> {
        let request = self.store.create_deletion_request(request).await?;
        self.events
            .publish(StorageEvent::AipDeletionRequestCreated(
                AipDeletionRequestEvent {
                    uuid: request.uuid,
                    item: request.clone(),
                },
            ))
            .await;
        Ok(request)
    }

    /// Records the outcome of a deletion review together with the
    /// reviewer's identity.
    pub async fn review_deletion_request(
        &self,
        db_id: i64,
        status: DeletionRequestStatus,
        reviewer: String,
        reviewer_iss: String,
        reviewer_sub: String,
    ) -> Result<DeletionRequest, AppError> {
        let request = self
            .store
            .update_deletion_request(
                db_id,
                Box::new(move |request| {
                    request.status = status;
                    request.reviewer = Some(reviewer);
                    request.reviewer_iss = Some(reviewer_iss);
                    request.reviewer_sub = Some(reviewer_sub);
                    request.reviewed_at = Some(Utc::now());
                    Ok(())
                }),
            )
            .await?;
        self.events
            .publish(StorageEvent::AipDeletionRequestUpdated(
                AipDeletionRequestEvent {
                    uuid: request.uuid,
                    item: request.clone(),
                },
            ))
            .await;
        Ok(request)
    }
}
