use universe_core::TaskState;

use crate::error::{OrchestratorError, Result};

pub struct TaskStateMachine;

impl TaskStateMachine {
    pub fn validate_transition(from: &TaskState, to: &TaskState) -> Result<()> {
        let allowed = Self::allowed_transitions(from);

        if allowed.contains(to) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    fn allowed_transitions(from: &TaskState) -> Vec<TaskState> {
        match from {
            TaskState::Created => vec![TaskState::Locking],
            TaskState::Locking => vec![TaskState::Planning, TaskState::Failed],
            TaskState::Planning => vec![TaskState::Executing, TaskState::Unlocking],
            TaskState::Executing => vec![TaskState::Finalizing, TaskState::Unlocking],
            TaskState::Finalizing => vec![TaskState::Unlocking],
            TaskState::Unlocking => vec![TaskState::Succeeded, TaskState::Failed],
            TaskState::Succeeded | TaskState::Failed => vec![],
        }
    }

    pub fn can_transition(from: &TaskState, to: &TaskState) -> bool {
        Self::validate_transition(from, to).is_ok()
    }

    /// Next state on the success path.
    pub fn next_state(current: &TaskState) -> Option<TaskState> {
        match current {
            TaskState::Created => Some(TaskState::Locking),
            TaskState::Locking => Some(TaskState::Planning),
            TaskState::Planning => Some(TaskState::Executing),
            TaskState::Executing => Some(TaskState::Finalizing),
            TaskState::Finalizing => Some(TaskState::Unlocking),
            TaskState::Unlocking => Some(TaskState::Succeeded),
            TaskState::Succeeded | TaskState::Failed => None,
        }
    }
}
