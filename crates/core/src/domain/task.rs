use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ResumeUniverse,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResumeUniverse => "resume_universe",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "resume_universe" => Some(Self::ResumeUniverse),
            _ => None,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one orchestration task run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Created,
    Locking,
    Planning,
    Executing,
    Finalizing,
    Unlocking,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Locking => "locking",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Finalizing => "finalizing",
            Self::Unlocking => "unlocking",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "locking" => Some(Self::Locking),
            "planning" => Some(Self::Planning),
            "executing" => Some(Self::Executing),
            "finalizing" => Some(Self::Finalizing),
            "unlocking" => Some(Self::Unlocking),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted record of a submitted task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_uuid: Uuid,
    pub universe_uuid: Uuid,
    pub task_type: TaskType,
    pub state: TaskState,
    pub failure_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskInfo {
    pub fn new(task_uuid: Uuid, universe_uuid: Uuid, task_type: TaskType) -> Self {
        let now = Utc::now();
        Self {
            task_uuid,
            universe_uuid,
            task_type,
            state: TaskState::default(),
            failure_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}
