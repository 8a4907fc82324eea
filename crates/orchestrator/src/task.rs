//! Lifecycle task definition and the generic runner that drives it.
//!
//! A task only describes *what* to do: [`UniverseTask::plan`] turns the
//! current universe into an ordered list of subtask groups and
//! [`UniverseTask::commit`] describes the final state change. The
//! [`TaskRunner`] owns *how*: lock, plan, execute, finalize, and always
//! unlock.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use db::UniverseStore;
use events::{Event, EventBus};
use futures::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use universe_core::{TaskState, TaskType, Universe, UniverseDetails};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::context::TaskContext;
use crate::error::{OrchestratorError, Result};
use crate::group::{panic_message, SubTaskGroup};
use crate::lock::{ExclusiveLock, ExpectedVersion};
use crate::node_ops::NodeOperations;
use crate::queue::{QueueProgress, QueueSnapshot, SubTaskGroupQueue};
use crate::resources::UniverseLockGuard;
use crate::state_machine::TaskStateMachine;

pub trait UniverseTask: Send + Sync {
    fn task_type(&self) -> TaskType;

    /// Human readable name used in logs.
    fn name(&self) -> String {
        self.task_type().to_string()
    }

    /// Build the ordered subtask groups for `universe`. Must not mutate
    /// anything; all side effects belong to subtasks.
    fn plan(&self, universe: &Universe, config: &OrchestratorConfig)
        -> Result<Vec<SubTaskGroup>>;

    /// Final state change, committed only when every group succeeded.
    fn commit(&self, details: &mut UniverseDetails);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskParams {
    pub universe_uuid: Uuid,
    pub expected_version: ExpectedVersion,
    pub task_uuid: Uuid,
}

impl TaskParams {
    pub fn new(universe_uuid: Uuid) -> Self {
        Self {
            universe_uuid,
            expected_version: ExpectedVersion::Any,
            task_uuid: Uuid::new_v4(),
        }
    }

    pub fn with_expected_version(mut self, expected: impl Into<ExpectedVersion>) -> Self {
        self.expected_version = expected.into();
        self
    }

    pub fn with_task_uuid(mut self, task_uuid: Uuid) -> Self {
        self.task_uuid = task_uuid;
        self
    }
}

/// Live view of one task run, safe to poll from other tasks.
#[derive(Debug, Clone)]
pub struct TaskProgress {
    pub task_uuid: Uuid,
    pub universe_uuid: Uuid,
    pub task_type: TaskType,
    state: Arc<Mutex<TaskState>>,
    queue: QueueProgress,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub task_uuid: Uuid,
    pub universe_uuid: Uuid,
    pub task_type: TaskType,
    pub state: TaskState,
    pub queue: QueueSnapshot,
}

impl TaskProgress {
    pub fn state(&self) -> TaskState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn queue(&self) -> &QueueProgress {
        &self.queue
    }

    /// Request cancellation. Observed between subtask attempts and groups.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_uuid: self.task_uuid,
            universe_uuid: self.universe_uuid,
            task_type: self.task_type,
            state: self.state(),
            queue: self.queue.snapshot(),
        }
    }

    /// Validate and apply a state change, returning the previous state.
    fn transition(&self, to: TaskState) -> Result<TaskState> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let from = *state;
        TaskStateMachine::validate_transition(&from, &to)?;
        *state = to;
        Ok(from)
    }
}

#[derive(Clone)]
pub struct TaskRunner {
    store: Arc<dyn UniverseStore>,
    node_ops: Arc<dyn NodeOperations>,
    config: OrchestratorConfig,
    event_bus: Option<EventBus>,
    cancel: CancellationToken,
}

impl TaskRunner {
    pub fn new(store: Arc<dyn UniverseStore>, node_ops: Arc<dyn NodeOperations>) -> Self {
        Self {
            store,
            node_ops,
            config: OrchestratorConfig::default(),
            event_bus: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Parent token; cancelling it cancels every task this runner starts.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &Arc<dyn UniverseStore> {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn lock(&self) -> ExclusiveLock {
        let lock =
            ExclusiveLock::new(Arc::clone(&self.store)).with_cas_retry_limit(self.config.cas_retry_limit);
        match &self.event_bus {
            Some(bus) => lock.with_event_bus(bus.clone()),
            None => lock,
        }
    }

    pub fn progress_for(&self, task_type: TaskType, params: &TaskParams) -> TaskProgress {
        TaskProgress {
            task_uuid: params.task_uuid,
            universe_uuid: params.universe_uuid,
            task_type,
            state: Arc::new(Mutex::new(TaskState::Created)),
            queue: QueueProgress::new(),
            cancel: self.cancel.child_token(),
        }
    }

    pub async fn run(&self, task: Arc<dyn UniverseTask>, params: TaskParams) -> Result<()> {
        let progress = self.progress_for(task.task_type(), &params);
        self.run_with_progress(task, params, progress).await
    }

    /// Drive `task` through its whole lifecycle.
    ///
    /// Once the lock is held it is released on every exit path, including
    /// planning or execution errors and panics. Errors are logged and then
    /// returned to the caller.
    pub async fn run_with_progress(
        &self,
        task: Arc<dyn UniverseTask>,
        params: TaskParams,
        progress: TaskProgress,
    ) -> Result<()> {
        let name = task.name();
        self.transition(&progress, TaskState::Locking)?;

        let lock = self.lock();
        let token = match lock
            .acquire(params.universe_uuid, params.expected_version, params.task_uuid)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                error!(
                    task = %name,
                    task_uuid = %params.task_uuid,
                    universe_uuid = %params.universe_uuid,
                    error = %e,
                    "Could not lock universe"
                );
                self.transition(&progress, TaskState::Failed)?;
                return Err(e);
            }
        };
        let mut guard = UniverseLockGuard::new(lock.clone(), token);

        let ctx = Arc::new(TaskContext {
            task_uuid: params.task_uuid,
            universe_uuid: params.universe_uuid,
            store: Arc::clone(&self.store),
            lock,
            node_ops: Arc::clone(&self.node_ops),
            config: self.config.clone(),
            event_bus: self.event_bus.clone(),
            cancel: progress.cancel.clone(),
            progress: progress.clone(),
        });

        let outcome = AssertUnwindSafe(self.plan_and_execute(&task, &ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(OrchestratorError::Unexpected(format!(
                    "task panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });

        if let Err(e) = &outcome {
            error!(
                task = %name,
                task_uuid = %params.task_uuid,
                universe_uuid = %params.universe_uuid,
                error = %e,
                "Task failed"
            );
        }

        self.transition(&progress, TaskState::Unlocking)?;
        if let Err(e) = guard.release().await {
            warn!(
                task = %name,
                universe_uuid = %params.universe_uuid,
                error = %e,
                "Unlock failed, retrying in background"
            );
        }

        let terminal = if outcome.is_ok() {
            TaskState::Succeeded
        } else {
            TaskState::Failed
        };
        self.transition(&progress, terminal)?;

        if outcome.is_ok() {
            info!(task = %name, task_uuid = %params.task_uuid, "Task succeeded");
        }
        outcome
    }

    async fn plan_and_execute(
        &self,
        task: &Arc<dyn UniverseTask>,
        ctx: &Arc<TaskContext>,
    ) -> Result<()> {
        self.transition(&ctx.progress, TaskState::Planning)?;
        let universe = ctx.universe().await?;
        let groups = task.plan(&universe, &ctx.config)?;
        debug!(task_uuid = %ctx.task_uuid, groups = groups.len(), "Task planned");

        let mut queue = SubTaskGroupQueue::with_progress(ctx.task_uuid, ctx.progress.queue.clone());
        for group in groups {
            queue.add(group)?;
        }

        self.transition(&ctx.progress, TaskState::Executing)?;
        queue.run(ctx).await?;

        self.transition(&ctx.progress, TaskState::Finalizing)?;
        let committer = Arc::clone(task);
        ctx.save_universe_details(move |details| committer.commit(details))
            .await?;
        Ok(())
    }

    fn transition(&self, progress: &TaskProgress, to: TaskState) -> Result<()> {
        let from = progress.transition(to)?;
        debug!(task_uuid = %progress.task_uuid, from = %from, to = %to, "Task state changed");

        if let Some(bus) = &self.event_bus {
            bus.emit(Event::TaskStateChanged {
                task_uuid: progress.task_uuid,
                universe_uuid: progress.universe_uuid,
                from_state: from.to_string(),
                to_state: to.to_string(),
            });
        }
        Ok(())
    }
}
