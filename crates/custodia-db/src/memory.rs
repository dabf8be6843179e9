//! In-memory implementation of [`ArchiveStore`].
//!
//! Mirrors the PostgreSQL backend's semantics, including transition checks,
//! pending-deletion-request conflicts and which fields an updater may
//! change. Used by unit and scenario tests and by local development without
//! a database.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use custodia_core::models::{
    Aip, AipStatus, DeletionRequest, DeletionRequestStatus, Location, Task, Workflow,
};
use custodia_core::AppError;
use uuid::Uuid;

use crate::store::{
    AipFilter, AipPage, AipUpdater, ArchiveStore, DeletionRequestFilter, DeletionRequestUpdater,
    NewAip, NewDeletionRequest, NewLocation, NewTask, NewWorkflow, Page, TaskUpdater,
    WorkflowFilter, WorkflowUpdater,
};
use crate::transitions;

#[derive(Default)]
struct Inner {
    locations: HashMap<Uuid, Location>,
    aips: HashMap<Uuid, Aip>,
    workflows: BTreeMap<i64, Workflow>,
    tasks: BTreeMap<i64, Task>,
    deletion_requests: BTreeMap<i64, DeletionRequest>,
    next_workflow_id: i64,
    next_task_id: i64,
    next_deletion_request_id: i64,
}

impl Inner {
    fn tasks_for_workflow(&self, workflow_db_id: i64) -> Vec<Task> {
        self.tasks
            .values()
            .filter(|t| t.workflow_db_id == workflow_db_id)
            .cloned()
            .collect()
    }
}

/// In-memory archive store guarded by a single mutex.
#[derive(Default)]
pub struct MemoryArchiveStore {
    inner: Mutex<Inner>,
}

impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchiveStore {
    async fn create_location(&self, loc: NewLocation) -> Result<Location, AppError> {
        let mut inner = self.lock();
        let location = Location {
            uuid: Uuid::new_v4(),
            name: loc.name,
            description: loc.description,
            source: loc.config.source(),
            purpose: loc.purpose,
            config: loc.config,
            created_at: Utc::now(),
        };
        inner.locations.insert(location.uuid, location.clone());
        Ok(location)
    }

    async fn read_location(&self, uuid: Uuid) -> Result<Location, AppError> {
        self.lock()
            .locations
            .get(&uuid)
            .cloned()
            .ok_or_else(|| AppError::NotFound("location not found".to_string()))
    }

    async fn list_locations(&self) -> Result<Vec<Location>, AppError> {
        let mut locations: Vec<Location> = self.lock().locations.values().cloned().collect();
        locations.sort_by(|a, b| (a.created_at, a.uuid).cmp(&(b.created_at, b.uuid)));
        Ok(locations)
    }

    async fn create_aip(&self, aip: NewAip) -> Result<Aip, AppError> {
        let mut inner = self.lock();
        if inner.aips.contains_key(&aip.uuid) {
            return Err(AppError::Conflict("AIP already exists".to_string()));
        }
        let aip = Aip {
            uuid: aip.uuid,
            name: aip.name,
            status: aip.status,
            object_key: aip.object_key,
            location_uuid: aip.location_uuid,
            deletion_report_key: None,
            created_at: Utc::now(),
        };
        inner.aips.insert(aip.uuid, aip.clone());
        Ok(aip)
    }

    async fn read_aip(&self, uuid: Uuid) -> Result<Aip, AppError> {
        self.lock()
            .aips
            .get(&uuid)
            .cloned()
            .ok_or_else(|| AppError::NotFound("AIP not found".to_string()))
    }

    async fn list_aips(&self, filter: &AipFilter) -> Result<AipPage, AppError> {
        let inner = self.lock();

        let mut matched: Vec<Aip> = inner
            .aips
            .values()
            .filter(|aip| {
                if let Some(name) = &filter.name {
                    if !aip.name.to_lowercase().contains(&name.to_lowercase()) {
                        return false;
                    }
                }
                if let Some(status) = filter.status {
                    if aip.status != status {
                        return false;
                    }
                }
                if let Some(location_uuid) = filter.location_uuid {
                    if aip.location_uuid != Some(location_uuid) {
                        return false;
                    }
                }
                if let Some(earliest) = filter.earliest_created_time {
                    if aip.created_at < earliest {
                        return false;
                    }
                }
                if let Some(latest) = filter.latest_created_time {
                    if aip.created_at > latest {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        matched.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.uuid.cmp(&b.uuid))
        });

        let total = matched.len() as i64;
        let items = matched
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .collect();

        Ok(AipPage {
            items,
            page: Page {
                limit: filter.limit(),
                offset: filter.offset(),
                total,
            },
        })
    }

    async fn update_aip(&self, uuid: Uuid, updater: AipUpdater) -> Result<Aip, AppError> {
        let mut inner = self.lock();

        let current = inner
            .aips
            .get(&uuid)
            .ok_or_else(|| AppError::NotFound("AIP not found".to_string()))?;

        let mut updated = current.clone();
        let previous_status = updated.status;
        updater(&mut updated)?;
        transitions::check_aip_transition(previous_status, updated.status)?;

        // Matches the columns the PostgreSQL backend writes back.
        let stored = inner.aips.get_mut(&uuid).ok_or_else(|| {
            AppError::NotFound("AIP not found".to_string())
        })?;
        stored.name = updated.name;
        stored.status = updated.status;
        stored.location_uuid = updated.location_uuid;
        stored.deletion_report_key = updated.deletion_report_key;

        Ok(stored.clone())
    }

    async fn update_aip_status(&self, uuid: Uuid, status: AipStatus) -> Result<Aip, AppError> {
        self.update_aip(
            uuid,
            Box::new(move |aip| {
                aip.status = status;
                Ok(())
            }),
        )
        .await
    }

    async fn update_aip_location(
        &self,
        uuid: Uuid,
        location_uuid: Uuid,
    ) -> Result<Aip, AppError> {
        self.update_aip(
            uuid,
            Box::new(move |aip| {
                aip.location_uuid = Some(location_uuid);
                Ok(())
            }),
        )
        .await
    }

    async fn delete_aip(&self, uuid: Uuid) -> Result<(), AppError> {
        self.update_aip_status(uuid, AipStatus::Deleted).await?;
        Ok(())
    }

    async fn create_workflow(&self, workflow: NewWorkflow) -> Result<Workflow, AppError> {
        let mut inner = self.lock();
        inner.next_workflow_id += 1;
        let workflow = Workflow {
            db_id: inner.next_workflow_id,
            uuid: Uuid::new_v4(),
            execution_id: workflow.execution_id,
            kind: workflow.kind,
            status: workflow.status,
            aip_uuid: workflow.aip_uuid,
            started_at: Utc::now(),
            completed_at: None,
            tasks: Vec::new(),
        };
        inner.workflows.insert(workflow.db_id, workflow.clone());
        Ok(workflow)
    }

    async fn read_workflow(&self, db_id: i64) -> Result<Workflow, AppError> {
        let inner = self.lock();
        let mut workflow = inner
            .workflows
            .get(&db_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("workflow not found".to_string()))?;
        workflow.tasks = inner.tasks_for_workflow(db_id);
        Ok(workflow)
    }

    async fn update_workflow(
        &self,
        db_id: i64,
        updater: WorkflowUpdater,
    ) -> Result<Workflow, AppError> {
        let mut inner = self.lock();

        let current = inner
            .workflows
            .get(&db_id)
            .ok_or_else(|| AppError::NotFound("workflow not found".to_string()))?;

        let mut updated = current.clone();
        updater(&mut updated)?;

        let stored = inner.workflows.get_mut(&db_id).ok_or_else(|| {
            AppError::NotFound("workflow not found".to_string())
        })?;
        stored.status = updated.status;
        stored.completed_at = updated.completed_at;

        let mut result = stored.clone();
        result.tasks = Vec::new();
        Ok(result)
    }

    async fn list_workflows_for_aip(
        &self,
        aip_uuid: Uuid,
        filter: &WorkflowFilter,
    ) -> Result<Vec<Workflow>, AppError> {
        let inner = self.lock();

        let mut workflows: Vec<Workflow> = inner
            .workflows
            .values()
            .filter(|w| {
                w.aip_uuid == aip_uuid
                    && filter.status.map_or(true, |s| w.status == s)
                    && filter.kind.map_or(true, |k| w.kind == k)
            })
            .cloned()
            .collect();

        workflows.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.db_id.cmp(&a.db_id))
        });

        for workflow in &mut workflows {
            workflow.tasks = inner.tasks_for_workflow(workflow.db_id);
        }

        Ok(workflows)
    }

    async fn create_task(&self, task: NewTask) -> Result<Task, AppError> {
        let mut inner = self.lock();
        if !inner.workflows.contains_key(&task.workflow_db_id) {
            return Err(AppError::NotFound("workflow not found".to_string()));
        }
        inner.next_task_id += 1;
        let task = Task {
            db_id: inner.next_task_id,
            uuid: Uuid::new_v4(),
            workflow_db_id: task.workflow_db_id,
            name: task.name,
            status: task.status,
            started_at: Utc::now(),
            completed_at: None,
            note: task.note,
        };
        inner.tasks.insert(task.db_id, task.clone());
        Ok(task)
    }

    async fn update_task(&self, db_id: i64, updater: TaskUpdater) -> Result<Task, AppError> {
        let mut inner = self.lock();

        let current = inner
            .tasks
            .get(&db_id)
            .ok_or_else(|| AppError::NotFound("task not found".to_string()))?;

        let mut updated = current.clone();
        updater(&mut updated)?;

        let stored = inner
            .tasks
            .get_mut(&db_id)
            .ok_or_else(|| AppError::NotFound("task not found".to_string()))?;
        stored.status = updated.status;
        stored.completed_at = updated.completed_at;
        stored.note = updated.note;

        Ok(stored.clone())
    }

    async fn list_tasks_for_workflow(
        &self,
        workflow_db_id: i64,
    ) -> Result<Vec<Task>, AppError> {
        Ok(self.lock().tasks_for_workflow(workflow_db_id))
    }

    async fn create_deletion_request(
        &self,
        request: NewDeletionRequest,
    ) -> Result<DeletionRequest, AppError> {
        let mut inner = self.lock();

        let pending_exists = inner
            .deletion_requests
            .values()
            .any(|dr| dr.aip_uuid == request.aip_uuid && dr.status == DeletionRequestStatus::Pending);
        if pending_exists {
            return Err(AppError::Conflict(
                "a deletion request is already pending for this AIP".to_string(),
            ));
        }

        inner.next_deletion_request_id += 1;
        let request = DeletionRequest {
            db_id: inner.next_deletion_request_id,
            uuid: Uuid::new_v4(),
            aip_uuid: request.aip_uuid,
            workflow_db_id: request.workflow_db_id,
            reason: request.reason,
            requester: request.requester,
            requester_iss: request.requester_iss,
            requester_sub: request.requester_sub,
            reviewer: None,
            reviewer_iss: None,
            reviewer_sub: None,
            status: DeletionRequestStatus::Pending,
            requested_at: Utc::now(),
            reviewed_at: None,
        };
        inner.deletion_requests.insert(request.db_id, request.clone());
        Ok(request)
    }

    async fn read_deletion_request(&self, db_id: i64) -> Result<DeletionRequest, AppError> {
        self.lock()
            .deletion_requests
            .get(&db_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("deletion request not found".to_string()))
    }

    async fn read_pending_deletion_request(
        &self,
        aip_uuid: Uuid,
    ) -> Result<DeletionRequest, AppError> {
        self.lock()
            .deletion_requests
            .values()
            .find(|dr| dr.aip_uuid == aip_uuid && dr.status == DeletionRequestStatus::Pending)
            .cloned()
            .ok_or_else(|| AppError::NotFound("deletion request not found".to_string()))
    }

    async fn list_deletion_requests(
        &self,
        filter: &DeletionRequestFilter,
    ) -> Result<Vec<DeletionRequest>, AppError> {
        let mut requests: Vec<DeletionRequest> = self
            .lock()
            .deletion_requests
            .values()
            .filter(|dr| {
                filter.aip_uuid.map_or(true, |uuid| dr.aip_uuid == uuid)
                    && filter.status.map_or(true, |s| dr.status == s)
            })
            .cloned()
            .collect();

        requests.sort_by(|a, b| {
            b.requested_at
                .cmp(&a.requested_at)
                .then_with(|| b.db_id.cmp(&a.db_id))
        });

        Ok(requests)
    }

    async fn update_deletion_request(
        &self,
        db_id: i64,
        updater: DeletionRequestUpdater,
    ) -> Result<DeletionRequest, AppError> {
        let mut inner = self.lock();

        let current = inner
            .deletion_requests
            .get(&db_id)
            .ok_or_else(|| AppError::NotFound("deletion request not found".to_string()))?;

        let mut updated = current.clone();
        let previous_status = updated.status;
        updater(&mut updated)?;
        transitions::check_deletion_request_transition(previous_status, updated.status)?;
        transitions::check_deletion_review(&updated)?;

        let stored = inner.deletion_requests.get_mut(&db_id).ok_or_else(|| {
            AppError::NotFound("deletion request not found".to_string())
        })?;
        stored.reviewer = updated.reviewer;
        stored.reviewer_iss = updated.reviewer_iss;
        stored.reviewer_sub = updated.reviewer_sub;
        stored.status = updated.status;
        stored.reviewed_at = updated.reviewed_at;

        Ok(stored.clone())
    }
}
