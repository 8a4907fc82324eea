use universe_core::{TaskInfo, TaskState, TaskType};
use uuid::Uuid;

use super::{datetime_to_timestamp, timestamp_to_datetime};
use crate::error::DbError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskInfoRow {
    pub task_uuid: String,
    pub universe_uuid: String,
    pub task_type: String,
    pub state: String,
    pub failure_message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TaskInfoRow {
    pub fn into_domain(self) -> Result<TaskInfo, DbError> {
        let parse_uuid = |s: &str| {
            Uuid::parse_str(s).map_err(|e| DbError::CorruptRow(format!("uuid {s}: {e}")))
        };

        Ok(TaskInfo {
            task_uuid: parse_uuid(&self.task_uuid)?,
            universe_uuid: parse_uuid(&self.universe_uuid)?,
            task_type: TaskType::parse(&self.task_type)
                .ok_or_else(|| DbError::CorruptRow(format!("task_type {}", self.task_type)))?,
            state: TaskState::parse(&self.state).unwrap_or_default(),
            failure_message: self.failure_message,
            created_at: timestamp_to_datetime(self.created_at),
            updated_at: timestamp_to_datetime(self.updated_at),
        })
    }
}

impl From<&TaskInfo> for TaskInfoRow {
    fn from(info: &TaskInfo) -> Self {
        Self {
            task_uuid: info.task_uuid.to_string(),
            universe_uuid: info.universe_uuid.to_string(),
            task_type: info.task_type.as_str().to_string(),
            state: info.state.as_str().to_string(),
            failure_message: info.failure_message.clone(),
            created_at: datetime_to_timestamp(info.created_at),
            updated_at: datetime_to_timestamp(info.updated_at),
        }
    }
}
