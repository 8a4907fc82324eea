//! Smallest unit of lifecycle work, with its own retry budget.

use serde::Serialize;
use tracing::{debug, warn};
use universe_core::{NodeDetails, ProcessState, ServerType};

use crate::context::TaskContext;
use crate::error::SubTaskError;
use crate::retry::RetryPolicy;

/// Whether running a subtask twice has the same effect as running it once.
///
/// Non-idempotent subtasks get exactly one attempt regardless of policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Idempotency {
    #[default]
    Idempotent,
    NonIdempotent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubTaskKind {
    /// Bring a suspended host back up.
    ResumeServer { node: NodeDetails },
    StartProcess {
        node: NodeDetails,
        server_type: ServerType,
    },
    /// Block until the process reports healthy.
    WaitForServer {
        node: NodeDetails,
        server_type: ServerType,
    },
    UpdateMonitoringTargets,
    /// Record that the lifecycle operation reached its final step.
    MarkUniverseUpdateSuccess,
}

impl SubTaskKind {
    pub fn name(&self) -> String {
        match self {
            Self::ResumeServer { node } => format!("ResumeServer({})", node.node_name),
            Self::StartProcess { node, server_type } => {
                format!("StartProcess({}, {})", server_type, node.node_name)
            }
            Self::WaitForServer { node, server_type } => {
                format!("WaitForServer({}, {})", server_type, node.node_name)
            }
            Self::UpdateMonitoringTargets => "UpdateMonitoringTargets".to_string(),
            Self::MarkUniverseUpdateSuccess => "MarkUniverseUpdateSuccess".to_string(),
        }
    }

    pub fn target_node(&self) -> Option<&NodeDetails> {
        match self {
            Self::ResumeServer { node }
            | Self::StartProcess { node, .. }
            | Self::WaitForServer { node, .. } => Some(node),
            Self::UpdateMonitoringTargets | Self::MarkUniverseUpdateSuccess => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskState {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl SubTaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Outcome of [`SubTask::execute`].
#[derive(Debug, Clone)]
pub struct SubTaskReport {
    /// Attempts actually started.
    pub attempts: u32,
    pub result: Result<(), SubTaskError>,
}

#[derive(Debug, Clone)]
pub struct SubTask {
    pub name: String,
    pub kind: SubTaskKind,
    pub retry: RetryPolicy,
    pub idempotency: Idempotency,
    pub(crate) state: SubTaskState,
}

impl SubTask {
    pub fn new(kind: SubTaskKind, retry: RetryPolicy) -> Self {
        Self {
            name: kind.name(),
            kind,
            retry,
            idempotency: Idempotency::default(),
            state: SubTaskState::Pending,
        }
    }

    pub fn with_idempotency(mut self, idempotency: Idempotency) -> Self {
        self.idempotency = idempotency;
        self
    }

    pub fn state(&self) -> SubTaskState {
        self.state
    }

    pub fn max_attempts(&self) -> u32 {
        match self.idempotency {
            Idempotency::Idempotent => self.retry.max_attempts.max(1),
            Idempotency::NonIdempotent => 1,
        }
    }

    /// Run attempts until one succeeds, the budget is exhausted, a
    /// non-retryable error occurs, or the task is cancelled.
    pub async fn execute(&self, ctx: &TaskContext) -> SubTaskReport {
        let max_attempts = self.max_attempts();
        let mut attempts = 0u32;

        loop {
            if ctx.is_cancelled() {
                return SubTaskReport {
                    attempts,
                    result: Err(SubTaskError::Cancelled),
                };
            }

            attempts += 1;
            debug!(subtask = %self.name, attempt = attempts, max_attempts, "Running subtask");

            let result = match self.retry.timeout() {
                Some(limit) => match tokio::time::timeout(limit, self.run_once(ctx)).await {
                    Ok(result) => result,
                    Err(_) => {
                        self.abandon_attempt(ctx).await;
                        Err(SubTaskError::TimedOut(limit))
                    }
                },
                None => self.run_once(ctx).await,
            };

            match result {
                Ok(()) => {
                    return SubTaskReport {
                        attempts,
                        result: Ok(()),
                    }
                }
                Err(e) if e.is_retryable() && attempts < max_attempts => {
                    let delay = self.retry.backoff.delay_for_attempt(attempts);
                    warn!(
                        subtask = %self.name,
                        attempt = attempts,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Subtask attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => {
                            return SubTaskReport {
                                attempts,
                                result: Err(SubTaskError::Cancelled),
                            };
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    return SubTaskReport {
                        attempts,
                        result: Err(e),
                    }
                }
            }
        }
    }

    async fn run_once(&self, ctx: &TaskContext) -> Result<(), SubTaskError> {
        match &self.kind {
            SubTaskKind::ResumeServer { node } => {
                ctx.node_ops.resume_node(node).await?;
            }
            SubTaskKind::StartProcess { node, server_type } => {
                ctx.set_process_state(node.node_uuid, *server_type, ProcessState::Starting)
                    .await?;
                match ctx.node_ops.start_process(node, *server_type).await {
                    Ok(()) => {
                        ctx.set_process_state(node.node_uuid, *server_type, ProcessState::Running)
                            .await?;
                    }
                    Err(e) => {
                        mark_stopped(ctx, node, *server_type).await;
                        return Err(e.into());
                    }
                }
            }
            SubTaskKind::WaitForServer { node, server_type } => {
                ctx.node_ops
                    .wait_healthy(
                        std::slice::from_ref(node),
                        *server_type,
                        ctx.config.wait_for_server_timeout(),
                    )
                    .await?;
            }
            SubTaskKind::UpdateMonitoringTargets => {
                let universe = ctx.universe().await?;
                ctx.node_ops.update_monitoring_targets(&universe).await?;
            }
            SubTaskKind::MarkUniverseUpdateSuccess => {
                ctx.save_universe_details(|details| details.update_succeeded = true)
                    .await?;
            }
        }
        Ok(())
    }

    /// Undo bookkeeping left behind by an attempt that was cut off mid-flight.
    async fn abandon_attempt(&self, ctx: &TaskContext) {
        if let SubTaskKind::StartProcess { node, server_type } = &self.kind {
            mark_stopped(ctx, node, *server_type).await;
        }
    }
}

async fn mark_stopped(ctx: &TaskContext, node: &NodeDetails, server_type: ServerType) {
    if let Err(e) = ctx
        .set_process_state(node.node_uuid, server_type, ProcessState::Stopped)
        .await
    {
        warn!(
            node = %node.node_name,
            server = %server_type,
            error = %e,
            "Could not record stopped process state"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtask_names() {
        let node = NodeDetails::new("n1").master();
        let kind = SubTaskKind::StartProcess {
            node: node.clone(),
            server_type: ServerType::Master,
        };
        assert_eq!(kind.name(), "StartProcess(master, n1)");
        assert_eq!(kind.target_node(), Some(&node));
        assert_eq!(SubTaskKind::UpdateMonitoringTargets.target_node(), None);
    }

    #[test]
    fn test_non_idempotent_gets_single_attempt() {
        let task = SubTask::new(SubTaskKind::MarkUniverseUpdateSuccess, RetryPolicy::new(5));
        assert_eq!(task.max_attempts(), 5);

        let task = task.with_idempotency(Idempotency::NonIdempotent);
        assert_eq!(task.max_attempts(), 1);
    }

    #[test]
    fn test_new_subtask_is_pending() {
        let task = SubTask::new(SubTaskKind::UpdateMonitoringTargets, RetryPolicy::once());
        assert_eq!(task.state(), SubTaskState::Pending);
        assert!(!task.state().is_terminal());
        assert_eq!(task.name, "UpdateMonitoringTargets");
    }
}
