//! Submission surface: run lifecycle tasks in the background and track them.

use std::collections::HashMap;
use std::sync::Arc;

use db::TaskInfoRepository;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use universe_core::{TaskInfo, TaskState};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::lock::ExpectedVersion;
use crate::task::{TaskParams, TaskProgress, TaskRunner, TaskSnapshot, UniverseTask};

/// Finished tasks kept around for `progress` and `wait`.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Terminal state and failure message of a finished run.
type Outcome = (TaskState, Option<String>);

struct TrackedTask {
    progress: TaskProgress,
    /// `None` until the run ends.
    outcome: watch::Receiver<Option<Outcome>>,
    seq: u64,
}

impl TrackedTask {
    fn finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }
}

#[derive(Default)]
struct Registry {
    tasks: HashMap<Uuid, TrackedTask>,
    next_seq: u64,
}

pub struct Commissioner {
    runner: TaskRunner,
    task_repo: Option<Arc<TaskInfoRepository>>,
    history_limit: usize,
    registry: Mutex<Registry>,
}

impl Commissioner {
    pub fn new(runner: TaskRunner) -> Self {
        Self {
            runner,
            task_repo: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            registry: Mutex::new(Registry::default()),
        }
    }

    /// How many finished tasks stay queryable. Older ones are dropped first.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Persist a task record for every submission.
    pub fn with_task_repo(mut self, repo: Arc<TaskInfoRepository>) -> Self {
        self.task_repo = Some(repo);
        self
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    /// Start `task` against a universe and return its id right away.
    ///
    /// Lock conflicts and execution failures surface through
    /// [`Commissioner::wait`] and the persisted task record.
    pub async fn submit(
        &self,
        task: Arc<dyn UniverseTask>,
        universe_uuid: Uuid,
        expected_version: ExpectedVersion,
    ) -> Result<Uuid> {
        let params = TaskParams::new(universe_uuid).with_expected_version(expected_version);
        let task_uuid = params.task_uuid;

        if let Some(repo) = &self.task_repo {
            repo.create(&TaskInfo::new(task_uuid, universe_uuid, task.task_type()))
                .await?;
        }

        let progress = self.runner.progress_for(task.task_type(), &params);
        let runner = self.runner.clone();
        let repo = self.task_repo.clone();
        let run_progress = progress.clone();
        let (outcome_tx, outcome_rx) = watch::channel(None);

        info!(
            task = %task.name(),
            task_uuid = %task_uuid,
            universe_uuid = %universe_uuid,
            "Submitting task"
        );

        {
            let mut registry = self.registry.lock().await;
            let seq = registry.next_seq;
            registry.next_seq += 1;
            registry.tasks.insert(
                task_uuid,
                TrackedTask {
                    progress,
                    outcome: outcome_rx,
                    seq,
                },
            );
            self.prune(&mut registry);
        }

        tokio::spawn(async move {
            let result = runner.run_with_progress(task, params, run_progress.clone()).await;
            let failure = result.err().map(|e| e.to_string());
            let state = match run_progress.state() {
                TaskState::Succeeded => TaskState::Succeeded,
                _ => TaskState::Failed,
            };

            if let Some(repo) = repo {
                if let Err(e) = repo
                    .update_state(task_uuid, state, failure.as_deref())
                    .await
                {
                    warn!(task_uuid = %task_uuid, error = %e, "Failed to persist task result");
                }
            }
            outcome_tx.send_replace(Some((state, failure)));
        });

        Ok(task_uuid)
    }

    /// Drop the oldest finished tasks beyond the history limit.
    fn prune(&self, registry: &mut Registry) {
        let mut finished: Vec<(u64, Uuid)> = registry
            .tasks
            .iter()
            .filter(|(_, t)| t.finished())
            .map(|(id, t)| (t.seq, *id))
            .collect();
        if finished.len() <= self.history_limit {
            return;
        }
        finished.sort_unstable();
        let excess = finished.len() - self.history_limit;
        for (_, task_uuid) in finished.into_iter().take(excess) {
            debug!(task_uuid = %task_uuid, "Evicting finished task");
            registry.tasks.remove(&task_uuid);
        }
    }

    pub async fn progress(&self, task_uuid: Uuid) -> Option<TaskSnapshot> {
        self.registry
            .lock()
            .await
            .tasks
            .get(&task_uuid)
            .map(|t| t.progress.snapshot())
    }

    pub async fn cancel(&self, task_uuid: Uuid) -> Result<()> {
        let registry = self.registry.lock().await;
        let tracked = registry
            .tasks
            .get(&task_uuid)
            .ok_or(OrchestratorError::TaskNotFound(task_uuid))?;
        tracked.progress.cancel();
        Ok(())
    }

    /// Wait for a task to finish. Returns its terminal state and failure
    /// message. Any number of callers may wait on the same task.
    pub async fn wait(&self, task_uuid: Uuid) -> Result<(TaskState, Option<String>)> {
        let mut outcome = {
            let registry = self.registry.lock().await;
            registry
                .tasks
                .get(&task_uuid)
                .ok_or(OrchestratorError::TaskNotFound(task_uuid))?
                .outcome
                .clone()
        };

        let finished = outcome
            .wait_for(|o| o.is_some())
            .await
            .map_err(|_| {
                OrchestratorError::Unexpected("task run ended without an outcome".to_string())
            })?
            .clone();

        self.prune(&mut *self.registry.lock().await);
        finished.ok_or_else(|| OrchestratorError::Unexpected("task outcome missing".to_string()))
    }

    /// Tasks that have not reached a terminal state.
    pub async fn active_tasks(&self) -> Vec<TaskSnapshot> {
        self.registry
            .lock()
            .await
            .tasks
            .values()
            .map(|t| t.progress.snapshot())
            .filter(|s| !s.state.is_terminal())
            .collect()
    }
}
