//! Preservation workflows and their tasks as presented to operators
//!
//! These records describe what happened to an AIP. They are written by
//! workflow activities and only ever read through the listing API, so the
//! model carries the embedded tasks for presentation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "workflow_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    UploadAip,
    MoveAip,
    DeleteAip,
}

impl Display for WorkflowType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            WorkflowType::UploadAip => write!(f, "upload_aip"),
            WorkflowType::MoveAip => write!(f, "move_aip"),
            WorkflowType::DeleteAip => write!(f, "delete_aip"),
        }
    }
}

impl FromStr for WorkflowType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload_aip" => Ok(WorkflowType::UploadAip),
            "move_aip" => Ok(WorkflowType::MoveAip),
            "delete_aip" => Ok(WorkflowType::DeleteAip),
            _ => Err(anyhow::anyhow!("Invalid workflow type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "workflow_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Unspecified,
    InProgress,
    Pending,
    Done,
    Error,
    Canceled,
}

impl Display for WorkflowStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            WorkflowStatus::Unspecified => write!(f, "unspecified"),
            WorkflowStatus::InProgress => write!(f, "in_progress"),
            WorkflowStatus::Pending => write!(f, "pending"),
            WorkflowStatus::Done => write!(f, "done"),
            WorkflowStatus::Error => write!(f, "error"),
            WorkflowStatus::Canceled => write!(f, "canceled"),
        }
    }
}

impl FromStr for WorkflowStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unspecified" => Ok(WorkflowStatus::Unspecified),
            "in_progress" => Ok(WorkflowStatus::InProgress),
            "pending" => Ok(WorkflowStatus::Pending),
            "done" => Ok(WorkflowStatus::Done),
            "error" => Ok(WorkflowStatus::Error),
            "canceled" => Ok(WorkflowStatus::Canceled),
            _ => Err(anyhow::anyhow!("Invalid workflow status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Error,
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Error => write!(f, "error"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            "error" => Ok(TaskStatus::Error),
            _ => Err(anyhow::anyhow!("Invalid task status: {}", s)),
        }
    }
}

/// One run of a preservation workflow over an AIP.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Workflow {
    #[serde(skip)]
    #[sqlx(rename = "id")]
    pub db_id: i64,
    pub uuid: Uuid,
    /// Durable execution ID in the workflow engine.
    pub execution_id: String,
    #[serde(rename = "type")]
    pub kind: WorkflowType,
    pub status: WorkflowStatus,
    pub aip_uuid: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[sqlx(skip)]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<Task>,
}

/// A single step inside a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    #[serde(skip)]
    #[sqlx(rename = "id")]
    pub db_id: i64,
    pub uuid: Uuid,
    #[serde(skip)]
    #[sqlx(rename = "workflow_id")]
    pub workflow_db_id: i64,
    pub name: String,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub note: String,
}
