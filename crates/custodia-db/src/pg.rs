//! PostgreSQL implementation of [`ArchiveStore`].
//!
//! Updaters run inside a transaction holding a `SELECT ... FOR UPDATE` row
//! lock, so concurrent mutations of the same entity serialize at the
//! database. The partial unique index on pending deletion requests turns
//! races on `create_deletion_request` into a `Conflict` instead of a second
//! pending row.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use custodia_core::models::{
    Aip, AipStatus, DeletionRequest, DeletionRequestStatus, Location, LocationPurpose,
    LocationSource, Task, Workflow,
};
use custodia_core::AppError;
use sqlx::{FromRow, PgPool, Postgres};
use uuid::Uuid;

use crate::store::{
    AipFilter, AipPage, AipUpdater, ArchiveStore, DeletionRequestFilter, DeletionRequestUpdater,
    NewAip, NewDeletionRequest, NewLocation, NewTask, NewWorkflow, Page, TaskUpdater,
    WorkflowFilter, WorkflowUpdater,
};
use crate::transitions;

/// Raw location row; `config` is stored as JSONB and decoded on read.
#[derive(Debug, FromRow)]
struct LocationRow {
    uuid: Uuid,
    name: String,
    description: Option<String>,
    source: LocationSource,
    purpose: LocationPurpose,
    config: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl LocationRow {
    fn into_location(self) -> Result<Location, AppError> {
        let config = serde_json::from_value(self.config)?;
        Ok(Location {
            uuid: self.uuid,
            name: self.name,
            description: self.description,
            source: self.source,
            purpose: self.purpose,
            config,
            created_at: self.created_at,
        })
    }
}

fn map_unique_violation(err: sqlx::Error, conflict: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(conflict.to_string())
        }
        _ => err.into(),
    }
}

/// PostgreSQL-backed archive store.
#[derive(Clone)]
pub struct PgArchiveStore {
    pool: PgPool,
}

impl PgArchiveStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn tasks_by_workflow(
        &self,
        workflow_ids: Vec<i64>,
    ) -> Result<HashMap<i64, Vec<Task>>, AppError> {
        if workflow_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let tasks = sqlx::query_as::<Postgres, Task>(
            "SELECT * FROM tasks WHERE workflow_id = ANY($1) ORDER BY id",
        )
        .bind(workflow_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<i64, Vec<Task>> = HashMap::new();
        for task in tasks {
            grouped.entry(task.workflow_db_id).or_default().push(task);
        }
        Ok(grouped)
    }
}

#[async_trait]
impl ArchiveStore for PgArchiveStore {
    #[tracing::instrument(skip(self, loc), fields(db.table = "locations", db.operation = "insert"))]
    async fn create_location(&self, loc: NewLocation) -> Result<Location, AppError> {
        let config = serde_json::to_value(&loc.config)?;

        let row = sqlx::query_as::<Postgres, LocationRow>(
            r#"
            INSERT INTO locations (uuid, name, description, source, purpose, config, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&loc.name)
        .bind(&loc.description)
        .bind(loc.config.source())
        .bind(loc.purpose)
        .bind(&config)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        row.into_location()
    }

    #[tracing::instrument(skip(self), fields(db.table = "locations", db.operation = "select"))]
    async fn read_location(&self, uuid: Uuid) -> Result<Location, AppError> {
        let row =
            sqlx::query_as::<Postgres, LocationRow>("SELECT * FROM locations WHERE uuid = $1")
                .bind(uuid)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| AppError::NotFound("location not found".to_string()))?;

        row.into_location()
    }

    #[tracing::instrument(skip(self), fields(db.table = "locations", db.operation = "select"))]
    async fn list_locations(&self) -> Result<Vec<Location>, AppError> {
        let rows = sqlx::query_as::<Postgres, LocationRow>(
            "SELECT * FROM locations ORDER BY created_at, uuid",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LocationRow::into_location).collect()
    }

    #[tracing::instrument(skip(self, aip), fields(db.table = "aips", db.operation = "insert"))]
    async fn create_aip(&self, aip: NewAip) -> Result<Aip, AppError> {
        sqlx::query_as::<Postgres, Aip>(
            r#"
            INSERT INTO aips (uuid, name, object_key, status, location_uuid, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(aip.uuid)
        .bind(&aip.name)
        .bind(aip.object_key)
        .bind(aip.status)
        .bind(aip.location_uuid)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "AIP already exists"))
    }

    #[tracing::instrument(skip(self), fields(db.table = "aips", db.operation = "select"))]
    async fn read_aip(&self, uuid: Uuid) -> Result<Aip, AppError> {
        sqlx::query_as::<Postgres, Aip>("SELECT * FROM aips WHERE uuid = $1")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("AIP not found".to_string()))
    }

    #[tracing::instrument(skip(self, filter), fields(db.table = "aips", db.operation = "select"))]
    async fn list_aips(&self, filter: &AipFilter) -> Result<AipPage, AppError> {
        let mut conditions: Vec<String> = Vec::new();
        let mut param_count = 1;

        if filter.name.is_some() {
            conditions.push(format!("name ILIKE ${}", param_count));
            param_count += 1;
        }
        if filter.status.is_some() {
            conditions.push(format!("status = ${}", param_count));
            param_count += 1;
        }
        if filter.location_uuid.is_some() {
            conditions.push(format!("location_uuid = ${}", param_count));
            param_count += 1;
        }
        if filter.earliest_created_time.is_some() {
            conditions.push(format!("created_at >= ${}", param_count));
            param_count += 1;
        }
        if filter.latest_created_time.is_some() {
            conditions.push(format!("created_at <= ${}", param_count));
            param_count += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM aips{}", where_clause);
        let page_sql = format!(
            "SELECT * FROM aips{} ORDER BY created_at DESC, uuid LIMIT ${} OFFSET ${}",
            where_clause,
            param_count,
            param_count + 1
        );

        let mut count_query = sqlx::query_scalar::<Postgres, i64>(&count_sql);
        let mut page_query = sqlx::query_as::<Postgres, Aip>(&page_sql);

        if let Some(name) = &filter.name {
            let pattern = format!("%{}%", name);
            count_query = count_query.bind(pattern.clone());
            page_query = page_query.bind(pattern);
        }
        if let Some(status) = filter.status {
            count_query = count_query.bind(status);
            page_query = page_query.bind(status);
        }
        if let Some(location_uuid) = filter.location_uuid {
            count_query = count_query.bind(location_uuid);
            page_query = page_query.bind(location_uuid);
        }
        if let Some(earliest) = filter.earliest_created_time {
            count_query = count_query.bind(earliest);
            page_query = page_query.bind(earliest);
        }
        if let Some(latest) = filter.latest_created_time {
            count_query = count_query.bind(latest);
            page_query = page_query.bind(latest);
        }

        let total = count_query.fetch_one(&self.pool).await?;
        let items = page_query
            .bind(filter.limit())
            .bind(filter.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok(AipPage {
            items,
            page: Page {
                limit: filter.limit(),
                offset: filter.offset(),
                total,
            },
        })
    }

    #[tracing::instrument(skip(self, updater), fields(db.table = "aips", db.operation = "update"))]
    async fn update_aip(&self, uuid: Uuid, updater: AipUpdater) -> Result<Aip, AppError> {
        let mut tx = self.pool.begin().await?;

        let mut aip =
            sqlx::query_as::<Postgres, Aip>("SELECT * FROM aips WHERE uuid = $1 FOR UPDATE")
                .bind(uuid)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| AppError::NotFound("AIP not found".to_string()))?;

        let previous_status = aip.status;
        updater(&mut aip)?;
        transitions::check_aip_transition(previous_status, aip.status)?;

        let updated = sqlx::query_as::<Postgres, Aip>(
            r#"
            UPDATE aips
            SET name = $2, status = $3, location_uuid = $4, deletion_report_key = $5
            WHERE uuid = $1
            RETURNING *
            "#,
        )
        .bind(uuid)
        .bind(&aip.name)
        .bind(aip.status)
        .bind(aip.location_uuid)
        .bind(&aip.deletion_report_key)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
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

    #[tracing::instrument(
        skip(self, workflow),
        fields(db.table = "workflows", db.operation = "insert")
    )]
    async fn create_workflow(&self, workflow: NewWorkflow) -> Result<Workflow, AppError> {
        sqlx::query_as::<Postgres, Workflow>(
            r#"
            INSERT INTO workflows (uuid, execution_id, kind, status, aip_uuid, started_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&workflow.execution_id)
        .bind(workflow.kind)
        .bind(workflow.status)
        .bind(workflow.aip_uuid)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::from)
    }

    #[tracing::instrument(skip(self), fields(db.table = "workflows", db.operation = "select"))]
    async fn read_workflow(&self, db_id: i64) -> Result<Workflow, AppError> {
        let mut workflow =
            sqlx::query_as::<Postgres, Workflow>("SELECT * FROM workflows WHERE id = $1")
                .bind(db_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| AppError::NotFound("workflow not found".to_string()))?;

        workflow.tasks = self.list_tasks_for_workflow(db_id).await?;
        Ok(workflow)
    }

    #[tracing::instrument(
        skip(self, updater),
        fields(db.table = "workflows", db.operation = "update")
    )]
    async fn update_workflow(
        &self,
        db_id: i64,
        updater: WorkflowUpdater,
    ) -> Result<Workflow, AppError> {
        let mut tx = self.pool.begin().await?;

        let mut workflow = sqlx::query_as::<Postgres, Workflow>(
            "SELECT * FROM workflows WHERE id = $1 FOR UPDATE",
        )
        .bind(db_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("workflow not found".to_string()))?;

        updater(&mut workflow)?;

        let updated = sqlx::query_as::<Postgres, Workflow>(
            r#"
            UPDATE workflows
            SET status = $2, completed_at = $3
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(db_id)
        .bind(workflow.status)
        .bind(workflow.completed_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    #[tracing::instrument(
        skip(self, filter),
        fields(db.table = "workflows", db.operation = "select")
    )]
    async fn list_workflows_for_aip(
        &self,
        aip_uuid: Uuid,
        filter: &WorkflowFilter,
    ) -> Result<Vec<Workflow>, AppError> {
        let mut conditions = vec!["aip_uuid = $1".to_string()];
        let mut param_count = 2;

        if filter.status.is_some() {
            conditions.push(format!("status = ${}", param_count));
            param_count += 1;
        }
        if filter.kind.is_some() {
            conditions.push(format!("kind = ${}", param_count));
        }

        let sql = format!(
            "SELECT * FROM workflows WHERE {} ORDER BY started_at DESC, id DESC",
            conditions.join(" AND ")
        );

        let mut query = sqlx::query_as::<Postgres, Workflow>(&sql).bind(aip_uuid);
        if let Some(status) = filter.status {
            query = query.bind(status);
        }
        if let Some(kind) = filter.kind {
            query = query.bind(kind);
        }

        let mut workflows = query.fetch_all(&self.pool).await?;

        let ids: Vec<i64> = workflows.iter().map(|w| w.db_id).collect();
        let mut grouped = self.tasks_by_workflow(ids).await?;
        for workflow in &mut workflows {
            workflow.tasks = grouped.remove(&workflow.db_id).unwrap_or_default();
        }

        Ok(workflows)
    }

    #[tracing::instrument(skip(self, task), fields(db.table = "tasks", db.operation = "insert"))]
    async fn create_task(&self, task: NewTask) -> Result<Task, AppError> {
        sqlx::query_as::<Postgres, Task>(
            r#"
            INSERT INTO tasks (uuid, workflow_id, name, status, started_at, note)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(task.workflow_db_id)
        .bind(&task.name)
        .bind(task.status)
        .bind(Utc::now())
        .bind(&task.note)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::from)
    }

    #[tracing::instrument(skip(self, updater), fields(db.table = "tasks", db.operation = "update"))]
    async fn update_task(&self, db_id: i64, updater: TaskUpdater) -> Result<Task, AppError> {
        let mut tx = self.pool.begin().await?;

        let mut task =
            sqlx::query_as::<Postgres, Task>("SELECT * FROM tasks WHERE id = $1 FOR UPDATE")
                .bind(db_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| AppError::NotFound("task not found".to_string()))?;

        updater(&mut task)?;

        let updated = sqlx::query_as::<Postgres, Task>(
            r#"
            UPDATE tasks
            SET status = $2, completed_at = $3, note = $4
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(db_id)
        .bind(task.status)
        .bind(task.completed_at)
        .bind(&task.note)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    #[tracing::instrument(skip(self), fields(db.table = "tasks", db.operation = "select"))]
    async fn list_tasks_for_workflow(
        &self,
        workflow_db_id: i64,
    ) -> Result<Vec<Task>, AppError> {
        sqlx::query_as::<Postgres, Task>(
            "SELECT * FROM tasks WHERE workflow_id = $1 ORDER BY id",
        )
        .bind(workflow_db_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)
    }

    #[tracing::instrument(
        skip(self, request),
        fields(db.table = "deletion_requests", db.operation = "insert")
    )]
    async fn create_deletion_request(
        &self,
        request: NewDeletionRequest,
    ) -> Result<DeletionRequest, AppError> {
        sqlx::query_as::<Postgres, DeletionRequest>(
            r#"
            INSERT INTO deletion_requests
                (uuid, aip_uuid, workflow_id, reason, requester, requester_iss, requester_sub,
                 status, requested_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.aip_uuid)
        .bind(request.workflow_db_id)
        .bind(&request.reason)
        .bind(&request.requester)
        .bind(&request.requester_iss)
        .bind(&request.requester_sub)
        .bind(DeletionRequestStatus::Pending)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            map_unique_violation(e, "a deletion request is already pending for this AIP")
        })
    }

    #[tracing::instrument(
        skip(self),
        fields(db.table = "deletion_requests", db.operation = "select")
    )]
    async fn read_deletion_request(&self, db_id: i64) -> Result<DeletionRequest, AppError> {
        sqlx::query_as::<Postgres, DeletionRequest>(
            "SELECT * FROM deletion_requests WHERE id = $1",
        )
        .bind(db_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("deletion request not found".to_string()))
    }

    #[tracing::instrument(
        skip(self),
        fields(db.table = "deletion_requests", db.operation = "select")
    )]
    async fn read_pending_deletion_request(
        &self,
        aip_uuid: Uuid,
    ) -> Result<DeletionRequest, AppError> {
        sqlx::query_as::<Postgres, DeletionRequest>(
            "SELECT * FROM deletion_requests WHERE aip_uuid = $1 AND status = $2",
        )
        .bind(aip_uuid)
        .bind(DeletionRequestStatus::Pending)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("deletion request not found".to_string()))
    }

    #[tracing::instrument(
        skip(self, filter),
        fields(db.table = "deletion_requests", db.operation = "select")
    )]
    async fn list_deletion_requests(
        &self,
        filter: &DeletionRequestFilter,
    ) -> Result<Vec<DeletionRequest>, AppError> {
        let mut conditions: Vec<String> = Vec::new();
        let mut param_count = 1;

        if filter.aip_uuid.is_some() {
            conditions.push(format!("aip_uuid = ${}", param_count));
            param_count += 1;
        }
        if filter.status.is_some() {
            conditions.push(format!("status = ${}", param_count));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT * FROM deletion_requests{} ORDER BY requested_at DESC, id DESC",
            where_clause
        );

        let mut query = sqlx::query_as::<Postgres, DeletionRequest>(&sql);
        if let Some(aip_uuid) = filter.aip_uuid {
            query = query.bind(aip_uuid);
        }
        if let Some(status) = filter.status {
            query = query.bind(status);
        }

        query.fetch_all(&self.pool).await.map_err(AppError::from)
    }

    #[tracing::instrument(
        skip(self, updater),
        fields(db.table = "deletion_requests", db.operation = "update")
    )]
    async fn update_deletion_request(
        &self,
        db_id: i64,
        updater: DeletionRequestUpdater,
    ) -> Result<DeletionRequest, AppError> {
        let mut tx = self.pool.begin().await?;

        let mut request = sqlx::query_as::<Postgres, DeletionRequest>(
            "SELECT * FROM deletion_requests WHERE id = $1 FOR UPDATE",
        )
        .bind(db_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("deletion request not found".to_string()))?;

        let previous_status = request.status;
        updater(&mut request)?;
        transitions::check_deletion_request_transition(previous_status, request.status)?;
        transitions::check_deletion_review(&request)?;

        let updated = sqlx::query_as::<Postgres, DeletionRequest>(
            r#"
            UPDATE deletion_requests
            SET reviewer = $2, reviewer_iss = $3, reviewer_sub = $4, status = $5, reviewed_at = $6
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(db_id)
        .bind(&request.reviewer)
        .bind(&request.reviewer_iss)
        .bind(&request.reviewer_sub)
        .bind(request.status)
        .bind(request.reviewed_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }
}
