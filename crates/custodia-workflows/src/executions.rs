//! Durable workflow execution records.
//!
//! Every run of a workflow is persisted as one row keyed by its execution
//! ID, together with a JSONB map of completed step results. The engine
//! re-drives interrupted runs from these records on startup; memoized step
//! results make the replay skip work that already happened.

use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use custodia_core::AppError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Postgres};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "execution_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Canceled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl Display for ExecutionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Canceled => write!(f, "canceled"),
        }
    }
}

/// One durable run of a workflow.
#[derive(Debug, Clone, FromRow)]
pub struct ExecutionRecord {
    #[sqlx(rename = "id")]
    pub db_id: i64,
    /// Stable ID the run was started under, e.g.
    /// `storage-move-workflow-<aip_uuid>`.
    pub execution_id: String,
    /// Registered handler name used to re-drive the run.
    pub kind: String,
    pub input: JsonValue,
    pub status: ExecutionStatus,
    /// Map of step name to recorded result.
    pub checkpoints: JsonValue,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence for workflow executions.
///
/// `insert` enforces single-run-per-ID: it fails with `NotAvailable` while
/// another run of the same execution ID is still `running`. Reuse policies
/// for terminal runs are applied by the engine on top of that guarantee.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn insert(
        &self,
        execution_id: &str,
        kind: &str,
        input: &JsonValue,
    ) -> Result<ExecutionRecord, AppError>;

    /// Most recent run for an execution ID.
    async fn latest(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, AppError>;

    async fn list_running(&self) -> Result<Vec<ExecutionRecord>, AppError>;

    async fn save_checkpoint(
        &self,
        db_id: i64,
        step: &str,
        value: &JsonValue,
    ) -> Result<(), AppError>;

    async fn set_status(&self, db_id: i64, status: ExecutionStatus) -> Result<(), AppError>;

    /// Liveness marker for long-running activities.
    async fn heartbeat(&self, db_id: i64) -> Result<(), AppError>;
}

pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    #[tracing::instrument(skip(self, input), fields(db.table = "workflow_executions", db.operation = "insert"))]
    async fn insert(
        &self,
        execution_id: &str,
        kind: &str,
        input: &JsonValue,
    ) -> Result<ExecutionRecord, AppError> {
        let now = Utc::now();
        sqlx::query_as::<Postgres, ExecutionRecord>(
            r#"
            INSERT INTO workflow_executions
                (execution_id, kind, input, status, checkpoints, started_at, updated_at)
            VALUES ($1, $2, $3, $4, '{}'::jsonb, $5, $5)
            RETURNING *
            "#,
        )
        .bind(execution_id)
        .bind(kind)
        .bind(input)
        .bind(ExecutionStatus::Running)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::NotAvailable("workflow is already running".to_string())
            }
            _ => err.into(),
        })
    }

    #[tracing::instrument(skip(self), fields(db.table = "workflow_executions", db.operation = "select"))]
    async fn latest(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, AppError> {
        let record = sqlx::query_as::<Postgres, ExecutionRecord>(
            "SELECT * FROM workflow_executions WHERE execution_id = $1 ORDER BY id DESC LIMIT 1",
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    #[tracing::instrument(skip(self), fields(db.table = "workflow_executions", db.operation = "select"))]
    async fn list_running(&self) -> Result<Vec<ExecutionRecord>, AppError> {
        let records = sqlx::query_as::<Postgres, ExecutionRecord>(
            "SELECT * FROM workflow_executions WHERE status = $1 ORDER BY id",
        )
        .bind(ExecutionStatus::Running)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    #[tracing::instrument(skip(self, value), fields(db.table = "workflow_executions", db.operation = "update"))]
    async fn save_checkpoint(
        &self,
        db_id: i64,
        step: &str,
        value: &JsonValue,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE workflow_executions
            SET checkpoints = jsonb_set(checkpoints, ARRAY[$2], $3), updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(db_id)
        .bind(step)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "workflow_executions", db.operation = "update"))]
    async fn set_status(&self, db_id: i64, status: ExecutionStatus) -> Result<(), AppError> {
        sqlx::query("UPDATE workflow_executions SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(db_id)
            .bind(status)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn heartbeat(&self, db_id: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE workflow_executions SET updated_at = $2 WHERE id = $1")
            .bind(db_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// In-memory execution store for tests and single-process development.
#[derive(Default)]
pub struct MemoryExecutionStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    next_id: i64,
    records: Vec<ExecutionRecord>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn insert(
        &self,
        execution_id: &str,
        kind: &str,
        input: &JsonValue,
    ) -> Result<ExecutionRecord, AppError> {
        let mut inner = self.lock();
        let running = inner.records.iter().any(|r| {
            r.execution_id == execution_id && r.status == ExecutionStatus::Running
        });
        if running {
            return Err(AppError::NotAvailable(
                "workflow is already running".to_string(),
            ));
        }

        inner.next_id += 1;
        let now = Utc::now();
        let record = ExecutionRecord {
            db_id: inner.next_id,
            execution_id: execution_id.to_string(),
            kind: kind.to_string(),
            input: input.clone(),
            status: ExecutionStatus::Running,
            checkpoints: JsonValue::Object(serde_json::Map::new()),
            started_at: now,
            updated_at: now,
        };
        inner.records.push(record.clone());
        Ok(record)
    }

    async fn latest(&self, execution_id: &str) -> Result<Option<ExecutionRecord>, AppError> {
        let inner = self.lock();
        Ok(inner
            .records
            .iter()
            .rev()
            .find(|r| r.execution_id == execution_id)
            .cloned())
    }

    async fn list_running(&self) -> Result<Vec<ExecutionRecord>, AppError> {
        let inner = self.lock();
        Ok(inner
            .records
            .iter()
            .filter(|r| r.status == ExecutionStatus::Running)
            .cloned()
            .collect())
    }

    async fn save_checkpoint(
        &self,
        db_id: i64,
        step: &str,
        value: &JsonValue,
    ) -> Result<(), AppError> {
        let mut inner = self.lock();
        let record = inner
            .records
            .iter_mut()
            .find(|r| r.db_id == db_id)
            .ok_or_else(|| AppError::NotFound("workflow execution not found".to_string()))?;

        if let Some(map) = record.checkpoints.as_object_mut() {
            map.insert(step.to_string(), value.clone());
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn set_status(&self, db_id: i64, status: ExecutionStatus) -> Result<(), AppError> {
        let mut inner = self.lock();
        let record = inner
            .records
            .iter_mut()
            .find(|r| r.db_id == db_id)
            .ok_or_else(|| AppError::NotFound("workflow execution not found".to_string()))?;

        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn heartbeat(&self, db_id: i64) -> Result<(), AppError> {
        let mut inner = self.lock();
        if let Some(record) = inner.records.iter_mut().find(|r| r.db_id == db_id) {
            record.updated_at = Utc::now();
        }
        Ok(())
    }
}

/// Decodes a record's checkpoint map. Records created by the stores always
/// hold an object; anything else is treated as empty.
pub(crate) fn checkpoint_map(record: &ExecutionRecord) -> HashMap<String, JsonValue> {
    match record.checkpoints.as_object() {
        Some(map) => map.clone().into_iter().collect(),
        None => HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_rejects_concurrent_run() {
        let store = MemoryExecutionStore::new();
        let input = json!({"aip_uuid": "x"});

        let first = store.insert("wf-1", "move", &input).await.unwrap();
        assert_eq!(first.status, ExecutionStatus::Running);

        let err = store.insert("wf-1", "move", &input).await.unwrap_err();
        assert!(matches!(err, AppError::NotAvailable(_)));

        // A terminal run frees the ID.
        store
            .set_status(first.db_id, ExecutionStatus::Failed)
            .await
            .unwrap();
        store.insert("wf-1", "move", &input).await.unwrap();
    }

    #[tokio::test]
    async fn test_latest_returns_most_recent_run() {
        let store = MemoryExecutionStore::new();
        let input = json!({});

        let first = store.insert("wf-1", "move", &input).await.unwrap();
        store
            .set_status(first.db_id, ExecutionStatus::Completed)
            .await
            .unwrap();
        let second = store.insert("wf-1", "move", &input).await.unwrap();

        let latest = store.latest("wf-1").await.unwrap().unwrap();
        assert_eq!(latest.db_id, second.db_id);
        assert_eq!(latest.status, ExecutionStatus::Running);

        assert!(store.latest("wf-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_checkpoints_accumulate() {
        let store = MemoryExecutionStore::new();
        let record = store.insert("wf-1", "delete", &json!({})).await.unwrap();

        store
            .save_checkpoint(record.db_id, "read-aip", &json!({"status": "stored"}))
            .await
            .unwrap();
        store
            .save_checkpoint(record.db_id, "create-workflow", &json!(7))
            .await
            .unwrap();

        let latest = store.latest("wf-1").await.unwrap().unwrap();
        let map = checkpoint_map(&latest);
        assert_eq!(map.len(), 2);
        assert_eq!(map["create-workflow"], json!(7));
    }

    #[tokio::test]
    async fn test_list_running_skips_terminal_runs() {
        let store = MemoryExecutionStore::new();
        let one = store.insert("wf-1", "upload", &json!({})).await.unwrap();
        store.insert("wf-2", "upload", &json!({})).await.unwrap();
        store
            .set_status(one.db_id, ExecutionStatus::Canceled)
            .await
            .unwrap();

        let running = store.list_running().await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].execution_id, "wf-2");
    }
}
