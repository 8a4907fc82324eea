//! Event types published while lifecycle tasks run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: Event,
}

impl EventEnvelope {
    /// Create a new event envelope with auto-generated ID and timestamp
    pub fn new(event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// All possible events in the system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Task events
    /// Task moved between lifecycle states
    #[serde(rename = "task.state_changed")]
    TaskStateChanged {
        task_uuid: Uuid,
        universe_uuid: Uuid,
        from_state: String,
        to_state: String,
    },

    // Lock events
    /// A task took the universe's update lock
    #[serde(rename = "universe.locked")]
    UniverseLocked {
        universe_uuid: Uuid,
        task_uuid: Uuid,
        version: i64,
    },

    /// The update lock was cleared
    #[serde(rename = "universe.unlocked")]
    UniverseUnlocked {
        universe_uuid: Uuid,
        task_uuid: Option<Uuid>,
        version: i64,
    },

    // Execution events
    /// A subtask group started running
    #[serde(rename = "group.started")]
    SubTaskGroupStarted {
        task_uuid: Uuid,
        group_index: usize,
        group_name: String,
        group_type: String,
        subtask_count: usize,
    },

    /// Every member of a subtask group reached a terminal state
    #[serde(rename = "group.completed")]
    SubTaskGroupCompleted {
        task_uuid: Uuid,
        group_index: usize,
        group_name: String,
        success: bool,
    },

    /// A subtask got a slot in its group and began its first attempt
    #[serde(rename = "subtask.started")]
    SubTaskStarted { task_uuid: Uuid, subtask: String },

    /// A single subtask reached a terminal state
    #[serde(rename = "subtask.completed")]
    SubTaskCompleted {
        task_uuid: Uuid,
        subtask: String,
        attempts: u32,
        success: bool,
        error: Option<String>,
    },

    // System events
    /// Generic error event
    #[serde(rename = "error")]
    Error {
        message: String,
        context: Option<String>,
    },
}

impl Event {
    /// Get the task UUID associated with this event, if any
    pub fn task_uuid(&self) -> Option<Uuid> {
        match self {
            Event::TaskStateChanged { task_uuid, .. } => Some(*task_uuid),
            Event::UniverseLocked { task_uuid, .. } => Some(*task_uuid),
            Event::UniverseUnlocked { task_uuid, .. } => *task_uuid,
            Event::SubTaskGroupStarted { task_uuid, .. } => Some(*task_uuid),
            Event::SubTaskGroupCompleted { task_uuid, .. } => Some(*task_uuid),
            Event::SubTaskStarted { task_uuid, .. } => Some(*task_uuid),
            Event::SubTaskCompleted { task_uuid, .. } => Some(*task_uuid),
            Event::Error { .. } => None,
        }
    }
}
