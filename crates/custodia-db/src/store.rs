//! Store trait and input types shared by the PostgreSQL and in-memory backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use custodia_core::models::{
    Aip, AipStatus, DeletionRequest, DeletionRequestStatus, Location, LocationConfig,
    LocationPurpose, Task, TaskStatus, Workflow, WorkflowStatus, WorkflowType,
};
use custodia_core::AppError;
use uuid::Uuid;

/// Default page size for AIP listings.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Upper bound on the page size a caller may request.
pub const MAX_PAGE_SIZE: i64 = 1000;

/// Mutation applied to an AIP under a row lock.
pub type AipUpdater = Box<dyn FnOnce(&mut Aip) -> Result<(), AppError> + Send>;

/// Mutation applied to a workflow under a row lock.
pub type WorkflowUpdater = Box<dyn FnOnce(&mut Workflow) -> Result<(), AppError> + Send>;

/// Mutation applied to a task under a row lock.
pub type TaskUpdater = Box<dyn FnOnce(&mut Task) -> Result<(), AppError> + Send>;

/// Mutation applied to a deletion request under a row lock.
pub type DeletionRequestUpdater =
    Box<dyn FnOnce(&mut DeletionRequest) -> Result<(), AppError> + Send>;

/// Input for persisting a new location.
#[derive(Debug, Clone)]
pub struct NewLocation {
    pub name: String,
    pub description: Option<String>,
    pub purpose: LocationPurpose,
    pub config: LocationConfig,
}

/// Input for persisting a new AIP.
#[derive(Debug, Clone)]
pub struct NewAip {
    pub uuid: Uuid,
    pub name: String,
    pub object_key: Uuid,
    pub status: AipStatus,
    pub location_uuid: Option<Uuid>,
}

/// Input for persisting a new workflow run.
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub execution_id: String,
    pub kind: WorkflowType,
    pub status: WorkflowStatus,
    pub aip_uuid: Uuid,
}

/// Input for persisting a new task under a workflow.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub workflow_db_id: i64,
    pub name: String,
    pub status: TaskStatus,
    pub note: String,
}

/// Input for persisting a new deletion request.
#[derive(Debug, Clone)]
pub struct NewDeletionRequest {
    pub aip_uuid: Uuid,
    pub workflow_db_id: i64,
    pub reason: String,
    pub requester: String,
    pub requester_iss: String,
    pub requester_sub: String,
}

/// Filter for AIP listings. All fields are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct AipFilter {
    /// Case-insensitive substring match on the AIP name.
    pub name: Option<String>,
    pub status: Option<AipStatus>,
    pub location_uuid: Option<Uuid>,
    pub earliest_created_time: Option<DateTime<Utc>>,
    pub latest_created_time: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AipFilter {
    /// Effective page size, clamped to `1..=MAX_PAGE_SIZE`.
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    /// Effective offset, never negative.
    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Filter for workflow listings.
#[derive(Debug, Clone, Default)]
pub struct WorkflowFilter {
    pub status: Option<WorkflowStatus>,
    pub kind: Option<WorkflowType>,
}

/// Filter for deletion request listings.
#[derive(Debug, Clone, Default)]
pub struct DeletionRequestFilter {
    pub aip_uuid: Option<Uuid>,
    pub status: Option<DeletionRequestStatus>,
}

/// Pagination echo returned alongside AIP listings.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
}

/// One page of AIPs.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AipPage {
    pub items: Vec<Aip>,
    pub page: Page,
}

/// State custody for the storage domain.
///
/// Updaters run inside a transaction while the target row is locked;
/// returning an error from the updater aborts the mutation. Status changes
/// produced by an updater are validated against the transition tables in
/// [`crate::transitions`].
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    // Locations.
    async fn create_location(&self, loc: NewLocation) -> Result<Location, AppError>;
    async fn read_location(&self, uuid: Uuid) -> Result<Location, AppError>;
    async fn list_locations(&self) -> Result<Vec<Location>, AppError>;

    // AIPs.
    async fn create_aip(&self, aip: NewAip) -> Result<Aip, AppError>;
    async fn read_aip(&self, uuid: Uuid) -> Result<Aip, AppError>;
    async fn list_aips(&self, filter: &AipFilter) -> Result<AipPage, AppError>;
    async fn update_aip(&self, uuid: Uuid, updater: AipUpdater) -> Result<Aip, AppError>;
    async fn update_aip_status(&self, uuid: Uuid, status: AipStatus) -> Result<Aip, AppError>;
    async fn update_aip_location(
        &self,
        uuid: Uuid,
        location_uuid: Uuid,
    ) -> Result<Aip, AppError>;
    /// Marks the AIP deleted. The stored object is removed separately
    /// through the location layer.
    async fn delete_aip(&self, uuid: Uuid) -> Result<(), AppError>;

    // Workflows.
    async fn create_workflow(&self, workflow: NewWorkflow) -> Result<Workflow, AppError>;
    async fn read_workflow(&self, db_id: i64) -> Result<Workflow, AppError>;
    async fn update_workflow(
        &self,
        db_id: i64,
        updater: WorkflowUpdater,
    ) -> Result<Workflow, AppError>;
    /// Workflows for one AIP, most recently started first, tasks included.
    async fn list_workflows_for_aip(
        &self,
        aip_uuid: Uuid,
        filter: &WorkflowFilter,
    ) -> Result<Vec<Workflow>, AppError>;

    // Tasks.
    async fn create_task(&self, task: NewTask) -> Result<Task, AppError>;
    async fn update_task(&self, db_id: i64, updater: TaskUpdater) -> Result<Task, AppError>;
    async fn list_tasks_for_workflow(&self, workflow_db_id: i64)
        -> Result<Vec<Task>, AppError>;

    // Deletion requests.
    async fn create_deletion_request(
        &self,
        request: NewDeletionRequest,
    ) -> Result<DeletionRequest, AppError>;
    async fn read_deletion_request(&self, db_id: i64) -> Result<DeletionRequest, AppError>;
    /// The pending request for an AIP, or `NotFound` when none exists.
    async fn read_pending_deletion_request(
        &self,
        aip_uuid: Uuid,
    ) -> Result<DeletionRequest, AppError>;
    async fn list_deletion_requests(
        &self,
        filter: &DeletionRequestFilter,
    ) -> Result<Vec<DeletionRequest>, AppError>;
    async fn update_deletion_request(
        &self,
        db_id: i64,
        updater: DeletionRequestUpdater,
    ) -> Result<DeletionRequest, AppError>;
}
