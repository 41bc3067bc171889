//! Persistent data model: features, tasks and the typed patches that mutate them.

use crate::core::error::{Result, TaskhiveError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const TASK_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    Planning,
    Approved,
    Executing,
    Completed,
}

impl FeatureStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FeatureStatus::Planning => "planning",
            FeatureStatus::Approved => "approved",
            FeatureStatus::Executing => "executing",
            FeatureStatus::Completed => "completed",
        }
    }

    fn rank(self) -> u8 {
        match self {
            FeatureStatus::Planning => 0,
            FeatureStatus::Approved => 1,
            FeatureStatus::Executing => 2,
            FeatureStatus::Completed => 3,
        }
    }

    /// Forward moves only; `approved -> planning` is the one step back, and only while no tasks exist.
    pub fn can_transition_to(self, next: FeatureStatus, has_tasks: bool) -> bool {
        if self == next {
            return true;
        }
        match (self, next) {
            (FeatureStatus::Completed, _) => false,
            (FeatureStatus::Approved, FeatureStatus::Planning) => !has_tasks,
            _ => next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureStatus {
    type Err = TaskhiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "planning" => Ok(FeatureStatus::Planning),
            "approved" => Ok(FeatureStatus::Approved),
            "executing" => Ok(FeatureStatus::Executing),
            "completed" => Ok(FeatureStatus::Completed),
            other => Err(TaskhiveError::ValidationError(format!(
                "unknown feature status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub name: String,
    pub external_id: String,
    pub status: FeatureStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_path: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewFeature {
    pub name: String,
    pub ticket: Option<String>,
    pub session_id: Option<String>,
    pub workflow_path: Option<String>,
}

/// Feature names become directory names and ledger titles.
pub fn validate_feature_name(name: &str) -> Result<()> {
    let invalid = |why: &str| {
        Err(TaskhiveError::ValidationError(format!(
            "invalid feature name '{}': {}",
            name.escape_debug(),
            why
        )))
    };
    if name.trim().is_empty() {
        return invalid("must not be empty");
    }
    if name.starts_with('.') {
        return invalid("must not start with '.'");
    }
    if name.contains('/') || name.contains('\\') {
        return invalid("must not contain path separators");
    }
    if name.chars().any(|c| c.is_control()) {
        return invalid("must not contain control characters");
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Cancelled,
    Blocked,
    Failed,
    Partial,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Failed => "failed",
            TaskStatus::Partial => "partial",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskhiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            "cancelled" => Ok(TaskStatus::Cancelled),
            "blocked" => Ok(TaskStatus::Blocked),
            "failed" => Ok(TaskStatus::Failed),
            "partial" => Ok(TaskStatus::Partial),
            other => Err(TaskhiveError::ValidationError(format!(
                "unknown task status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskOrigin {
    #[default]
    Plan,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerSession {
    pub session_id: String,
    pub attempt: u32,
    pub message_count: u32,
    pub last_heartbeat_at: String,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blocker {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A task as persisted in `status.json` (and in the ledger's `task_state` artifact).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub folder: String,
    #[serde(rename = "planTitle", default)]
    pub name: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub origin: TaskOrigin,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_session: Option<WorkerSession>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocker: Option<Blocker>,
}

fn default_schema_version() -> u32 {
    TASK_SCHEMA_VERSION
}

impl TaskRecord {
    pub fn pending(folder: &str, name: &str, origin: TaskOrigin, depends_on: Vec<String>) -> Self {
        Self {
            schema_version: TASK_SCHEMA_VERSION,
            folder: folder.to_string(),
            name: name.to_string(),
            status: TaskStatus::Pending,
            origin,
            depends_on,
            external_id: None,
            summary: None,
            started_at: None,
            completed_at: None,
            base_commit: None,
            idempotency_key: None,
            worker_session: None,
            blocker: None,
        }
    }

    /// Leading `NN` of the folder slug, if present.
    pub fn order(&self) -> Option<u32> {
        self.folder.split('-').next().and_then(|n| n.parse().ok())
    }
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub folder: String,
    pub name: String,
    pub origin: TaskOrigin,
    pub depends_on: Vec<String>,
}

/// Completion-owned fields. `None` leaves a field alone; `Some(None)` clears it.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_commit: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocker: Option<Option<Blocker>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSessionPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// Background-owned fields, written by workers without touching completion-owned ones.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_session: Option<Option<WorkerSessionPatch>>,
}
