use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::group::SubTaskGroupType;
use crate::node_ops::NodeOpError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Universe {universe_uuid} cannot be locked: {reason}")]
    LockConflict { universe_uuid: Uuid, reason: String },

    #[error("Task {task_uuid} no longer holds the update lock on universe {universe_uuid}")]
    LockLost { universe_uuid: Uuid, task_uuid: Uuid },

    #[error(
        "Subtask {subtask} in group {group_index} ({group_name}/{group_type}) failed after {attempts} attempt(s), {failed_count} failure(s) in group: {source}"
    )]
    SubTaskFailed {
        group_index: usize,
        group_name: String,
        group_type: SubTaskGroupType,
        subtask: String,
        attempts: u32,
        failed_count: usize,
        #[source]
        source: SubTaskError,
    },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Subtask groups cannot be added once the queue has started")]
    QueueSealed,

    #[error("Task {0} was cancelled")]
    Cancelled(Uuid),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error(transparent)]
    Core(#[from] universe_core::CoreError),

    #[error("Database error: {0}")]
    Database(#[from] db::DbError),

    #[error("Node operation failed: {0}")]
    NodeOperation(#[from] NodeOpError),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl OrchestratorError {
    pub fn lock_conflict(universe_uuid: Uuid, reason: impl Into<String>) -> Self {
        Self::LockConflict {
            universe_uuid,
            reason: reason.into(),
        }
    }

    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, Self::LockConflict { .. })
    }

    /// Index of the group that failed, for queue failures.
    pub fn failed_group_index(&self) -> Option<usize> {
        match self {
            Self::SubTaskFailed { group_index, .. } => Some(*group_index),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Terminal failure of a single subtask.
#[derive(Debug, Clone, Error)]
pub enum SubTaskError {
    #[error(transparent)]
    Node(#[from] NodeOpError),

    #[error("Attempt timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Cancelled before completion")]
    Cancelled,

    #[error("Panicked: {0}")]
    Panicked(String),

    #[error("Universe {0} is no longer locked by this task")]
    LockLost(Uuid),

    #[error("State update failed: {0}")]
    State(String),
}

impl SubTaskError {
    /// Whether another attempt may help. Faults that indicate a broken task
    /// (lost lock, panic, cancellation) are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Node(_) | Self::TimedOut(_) | Self::State(_))
    }
}

impl From<OrchestratorError> for SubTaskError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::LockLost { universe_uuid, .. } => Self::LockLost(universe_uuid),
            OrchestratorError::Cancelled(_) => Self::Cancelled,
            OrchestratorError::NodeOperation(e) => Self::Node(e),
            other => Self::State(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_conflict_display() {
        let id = Uuid::new_v4();
        let err = OrchestratorError::lock_conflict(id, "update already in progress");

        assert!(err.is_lock_conflict());
        assert!(err.to_string().contains(&id.to_string()));
        assert!(err.to_string().contains("update already in progress"));
    }

    #[test]
    fn test_subtask_failure_carries_index_and_cause() {
        let err = OrchestratorError::SubTaskFailed {
            group_index: 1,
            group_name: "StartMasters".to_string(),
            group_type: SubTaskGroupType::StartingNodeProcesses,
            subtask: "StartProcess(master, n1)".to_string(),
            attempts: 3,
            failed_count: 1,
            source: SubTaskError::TimedOut(Duration::from_secs(5)),
        };

        assert_eq!(err.failed_group_index(), Some(1));
        let text = err.to_string();
        assert!(text.contains("StartMasters"));
        assert!(text.contains("timed out"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(SubTaskError::TimedOut(Duration::from_millis(1)).is_retryable());
        assert!(SubTaskError::State("busy".to_string()).is_retryable());
        assert!(!SubTaskError::Cancelled.is_retryable());
        assert!(!SubTaskError::Panicked("boom".to_string()).is_retryable());
        assert!(!SubTaskError::LockLost(Uuid::new_v4()).is_retryable());
    }

    #[test]
    fn test_lock_lost_maps_to_subtask_error() {
        let universe_uuid = Uuid::new_v4();
        let err: SubTaskError = OrchestratorError::LockLost {
            universe_uuid,
            task_uuid: Uuid::new_v4(),
        }
        .into();

        assert!(matches!(err, SubTaskError::LockLost(id) if id == universe_uuid));
    }
}
