use std::sync::Arc;

use db::UniverseStore;
use events::{Event, EventBus};
use tokio_util::sync::CancellationToken;
use universe_core::{CoreError, ProcessState, ServerType, Universe, UniverseDetails};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::lock::ExclusiveLock;
use crate::node_ops::NodeOperations;
use crate::task::TaskProgress;

/// Everything a running task and its subtasks may touch.
///
/// Built once per run by the task runner and shared read-only (behind an
/// `Arc`) with every subtask; there is no ambient per-task state.
pub struct TaskContext {
    pub task_uuid: Uuid,
    pub universe_uuid: Uuid,
    pub store: Arc<dyn UniverseStore>,
    pub lock: ExclusiveLock,
    pub node_ops: Arc<dyn NodeOperations>,
    pub config: OrchestratorConfig,
    pub event_bus: Option<EventBus>,
    pub cancel: CancellationToken,
    pub progress: TaskProgress,
}

impl TaskContext {
    /// Fresh snapshot of the universe record.
    pub async fn universe(&self) -> Result<Universe> {
        Ok(self.store.read(self.universe_uuid).await?)
    }

    /// Commit a details mutation while this task owns the update lock.
    pub async fn save_universe_details<F>(&self, mutate: F) -> Result<i64>
    where
        F: Fn(&mut UniverseDetails) + Clone + Send + 'static,
    {
        self.lock
            .update_locked(self.universe_uuid, self.task_uuid, mutate)
            .await
    }

    pub async fn set_process_state(
        &self,
        node_uuid: Uuid,
        server_type: ServerType,
        state: ProcessState,
    ) -> Result<i64> {
        let universe = self.universe().await?;
        if universe.details.node(node_uuid).is_none() {
            return Err(CoreError::NodeNotFound(node_uuid).into());
        }

        self.save_universe_details(move |details| {
            if let Some(node) = details.node_mut(node_uuid) {
                node.set_process_state(server_type, state);
            }
        })
        .await
    }

    pub fn emit(&self, event: Event) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
