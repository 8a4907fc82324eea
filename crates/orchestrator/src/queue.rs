//! Ordered list of subtask groups with fail-fast semantics.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use events::Event;
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::context::TaskContext;
use crate::error::{OrchestratorError, Result};
use crate::group::{GroupOutcome, SubTaskGroup, SubTaskGroupType};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueueStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed { group_index: usize, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    pub name: String,
    pub group_type: SubTaskGroupType,
    pub subtask_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    /// Index of the group currently (or last) dispatched; `None` before start.
    pub cursor: Option<usize>,
    pub groups: Vec<GroupSummary>,
    pub status: QueueStatus,
}

#[derive(Debug, Default)]
struct ProgressInner {
    /// 0 until the first group is dispatched, then index + 1.
    cursor: AtomicUsize,
    groups: Mutex<Vec<GroupSummary>>,
    status: Mutex<QueueStatus>,
}

/// Shared, read-only view of a running queue.
#[derive(Debug, Clone, Default)]
pub struct QueueProgress {
    inner: Arc<ProgressInner>,
}

impl QueueProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.inner.cursor.load(Ordering::Acquire).checked_sub(1)
    }

    pub fn status(&self) -> QueueStatus {
        self.inner
            .status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            cursor: self.cursor(),
            groups: self
                .inner
                .groups
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            status: self.status(),
        }
    }

    fn push_group(&self, summary: GroupSummary) {
        self.inner
            .groups
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(summary);
    }

    /// Cursor only ever moves forward.
    fn advance_to(&self, index: usize) {
        self.inner.cursor.fetch_max(index + 1, Ordering::AcqRel);
    }

    fn set_status(&self, status: QueueStatus) {
        *self.inner.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }
}

pub struct SubTaskGroupQueue {
    task_uuid: Uuid,
    groups: Vec<SubTaskGroup>,
    progress: QueueProgress,
    started: bool,
}

impl SubTaskGroupQueue {
    pub fn new(task_uuid: Uuid) -> Self {
        Self::with_progress(task_uuid, QueueProgress::new())
    }

    /// Report into an existing progress handle.
    pub fn with_progress(task_uuid: Uuid, progress: QueueProgress) -> Self {
        Self {
            task_uuid,
            groups: Vec::new(),
            progress,
            started: false,
        }
    }

    pub fn add(&mut self, group: SubTaskGroup) -> Result<()> {
        if self.started {
            return Err(OrchestratorError::QueueSealed);
        }
        self.progress.push_group(GroupSummary {
            name: group.name.clone(),
            group_type: group.group_type,
            subtask_count: group.len(),
        });
        self.groups.push(group);
        Ok(())
    }

    pub fn groups(&self) -> &[SubTaskGroup] {
        &self.groups
    }

    pub fn progress(&self) -> QueueProgress {
        self.progress.clone()
    }

    /// Run groups in insertion order, stopping at the first failed group.
    pub async fn run(&mut self, ctx: &Arc<TaskContext>) -> Result<()> {
        self.started = true;
        self.progress.set_status(QueueStatus::Running);

        for (index, group) in self.groups.iter_mut().enumerate() {
            if ctx.is_cancelled() {
                let err = OrchestratorError::Cancelled(self.task_uuid);
                self.progress.set_status(QueueStatus::Failed {
                    group_index: index,
                    error: err.to_string(),
                });
                return Err(err);
            }

            self.progress.advance_to(index);
            ctx.emit(Event::SubTaskGroupStarted {
                task_uuid: self.task_uuid,
                group_index: index,
                group_name: group.name.clone(),
                group_type: group.group_type.to_string(),
                subtask_count: group.len(),
            });

            let outcome = group.run(ctx).await;

            ctx.emit(Event::SubTaskGroupCompleted {
                task_uuid: self.task_uuid,
                group_index: index,
                group_name: group.name.clone(),
                success: outcome.is_success(),
            });

            if let GroupOutcome::Failed { first } = outcome {
                let err = OrchestratorError::SubTaskFailed {
                    group_index: index,
                    group_name: group.name.clone(),
                    group_type: group.group_type,
                    subtask: first.subtask,
                    attempts: first.attempts,
                    failed_count: group.failures().len(),
                    source: first.error,
                };
                error!(
                    task_uuid = %self.task_uuid,
                    group_index = index,
                    group = %group.name,
                    error = %err,
                    "Subtask group failed, aborting queue"
                );
                self.progress.set_status(QueueStatus::Failed {
                    group_index: index,
                    error: err.to_string(),
                });
                return Err(err);
            }

            info!(task_uuid = %self.task_uuid, group_index = index, group = %group.name, "Subtask group completed");
        }

        self.progress.set_status(QueueStatus::Succeeded);
        Ok(())
    }
}
