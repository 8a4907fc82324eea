//! A batch of subtasks that run concurrently and are awaited as a unit.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use events::Event;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::context::TaskContext;
use crate::error::SubTaskError;
use crate::subtask::{SubTask, SubTaskReport, SubTaskState};

/// Reporting tag attached to a group. Carries no execution semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SubTaskGroupType {
    #[default]
    Configuring,
    ResumeUniverse,
    StartingNodeProcesses,
    ConfigureUniverse,
    UpdatingMonitoring,
}

impl SubTaskGroupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuring => "Configuring",
            Self::ResumeUniverse => "ResumeUniverse",
            Self::StartingNodeProcesses => "StartingNodeProcesses",
            Self::ConfigureUniverse => "ConfigureUniverse",
            Self::UpdatingMonitoring => "UpdatingMonitoring",
        }
    }
}

impl fmt::Display for SubTaskGroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SubTaskFailure {
    /// Position of the member inside its group.
    pub index: usize,
    pub subtask: String,
    pub attempts: u32,
    pub error: SubTaskError,
}

#[derive(Debug, Clone)]
pub enum GroupOutcome {
    Succeeded,
    /// `first` is the earliest failure in completion order.
    Failed { first: SubTaskFailure },
}

impl GroupOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

#[derive(Debug, Clone)]
pub struct SubTaskGroup {
    pub name: String,
    pub group_type: SubTaskGroupType,
    subtasks: Vec<SubTask>,
    failures: Vec<SubTaskFailure>,
}

impl SubTaskGroup {
    pub fn new(name: impl Into<String>, group_type: SubTaskGroupType) -> Self {
        Self {
            name: name.into(),
            group_type,
            subtasks: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn add(&mut self, subtask: SubTask) {
        self.subtasks.push(subtask);
    }

    pub fn with_subtask(mut self, subtask: SubTask) -> Self {
        self.add(subtask);
        self
    }

    pub fn subtasks(&self) -> &[SubTask] {
        &self.subtasks
    }

    pub fn len(&self) -> usize {
        self.subtasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }

    /// Failures of the last run, in completion order.
    pub fn failures(&self) -> &[SubTaskFailure] {
        &self.failures
    }

    /// Run every member to a terminal state.
    ///
    /// A failing member never stops its siblings; the group only reports
    /// once all of them have finished.
    pub async fn run(&mut self, ctx: &Arc<TaskContext>) -> GroupOutcome {
        self.failures.clear();
        let permits = Arc::new(Semaphore::new(ctx.config.max_parallel_subtasks.max(1)));
        let mut join_set = JoinSet::new();

        info!(
            task_uuid = %ctx.task_uuid,
            group = %self.name,
            group_type = %self.group_type,
            subtask_count = self.subtasks.len(),
            "Running subtask group"
        );

        let (started_tx, mut started_rx) = mpsc::unbounded_channel();

        for (index, subtask) in self.subtasks.iter_mut().enumerate() {
            subtask.state = SubTaskState::Pending;
            let subtask = subtask.clone();
            let ctx = Arc::clone(ctx);
            let permits = Arc::clone(&permits);
            let started_tx = started_tx.clone();

            join_set.spawn(async move {
                let report = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        let _ = started_tx.send(index);
                        ctx.emit(Event::SubTaskStarted {
                            task_uuid: ctx.task_uuid,
                            subtask: subtask.name.clone(),
                        });
                        let report = AssertUnwindSafe(subtask.execute(&ctx))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|payload| SubTaskReport {
                                attempts: 1,
                                result: Err(SubTaskError::Panicked(panic_message(
                                    payload.as_ref(),
                                ))),
                            });
                        // Reported while the slot is still held.
                        emit_completed(&ctx, &subtask.name, &report);
                        report
                    }
                    Err(_) => {
                        let report = SubTaskReport {
                            attempts: 0,
                            result: Err(SubTaskError::Cancelled),
                        };
                        emit_completed(&ctx, &subtask.name, &report);
                        report
                    }
                };
                (index, report)
            });
        }

        drop(started_tx);

        let mut reported = vec![false; self.subtasks.len()];
        loop {
            // Start notices are sent before the member can finish, so draining
            // them first keeps Running from overwriting a terminal state.
            let joined = tokio::select! {
                biased;
                Some(index) = started_rx.recv() => {
                    self.subtasks[index].state = SubTaskState::Running;
                    continue;
                }
                joined = join_set.join_next() => joined,
            };
            let Some(joined) = joined else { break };
            let (index, report) = match joined {
                Ok(done) => done,
                Err(e) => {
                    // Panics are caught inside the future, so only an
                    // aborted runtime gets here.
                    error!(group = %self.name, error = %e, "Subtask join failed");
                    continue;
                }
            };
            reported[index] = true;
            self.record(index, report);
        }

        for (index, seen) in reported.into_iter().enumerate() {
            if !seen {
                let report = SubTaskReport {
                    attempts: 0,
                    result: Err(SubTaskError::Panicked("subtask never reported".to_string())),
                };
                emit_completed(ctx, &self.subtasks[index].name, &report);
                self.record(index, report);
            }
        }

        match self.failures.first() {
            None => GroupOutcome::Succeeded,
            Some(first) => GroupOutcome::Failed {
                first: first.clone(),
            },
        }
    }

    fn record(&mut self, index: usize, report: SubTaskReport) {
        let subtask = &mut self.subtasks[index];

        match report.result {
            Ok(()) => {
                debug!(subtask = %subtask.name, attempts = report.attempts, "Subtask succeeded");
                subtask.state = SubTaskState::Succeeded;
            }
            Err(e) => {
                error!(
                    subtask = %subtask.name,
                    attempts = report.attempts,
                    error = %e,
                    "Subtask failed"
                );
                subtask.state = SubTaskState::Failed;
                self.failures.push(SubTaskFailure {
                    index,
                    subtask: subtask.name.clone(),
                    attempts: report.attempts,
                    error: e,
                });
            }
        }
    }
}

fn emit_completed(ctx: &TaskContext, subtask: &str, report: &SubTaskReport) {
    ctx.emit(Event::SubTaskCompleted {
        task_uuid: ctx.task_uuid,
        subtask: subtask.to_string(),
        attempts: report.attempts,
        success: report.result.is_ok(),
        error: report.result.as_ref().err().map(|e| e.to_string()),
    });
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
