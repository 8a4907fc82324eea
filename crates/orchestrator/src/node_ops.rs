//! Contract for the node-level operations subtasks invoke.
//!
//! How a node is reached (ssh, an agent, a cloud API) is up to the
//! implementation; the engine only relies on terminal success or failure.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use universe_core::{NodeDetails, ServerType, Universe};

#[derive(Debug, Clone, Error)]
pub enum NodeOpError {
    #[error("Command failed on node {node}: {reason}")]
    CommandFailed { node: String, reason: String },

    #[error("{server} on node {node} not healthy after {waited_ms}ms")]
    NotHealthy {
        node: String,
        server: ServerType,
        waited_ms: u64,
    },

    #[error("Node {node} unreachable: {reason}")]
    Unreachable { node: String, reason: String },

    #[error("{0}")]
    Other(String),
}

impl NodeOpError {
    pub fn command_failed(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CommandFailed {
            node: node.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait NodeOperations: Send + Sync {
    /// Bring a suspended host back so its processes can be started.
    async fn resume_node(&self, node: &NodeDetails) -> Result<(), NodeOpError>;

    /// Start `server_type` on `node`. Must be safe to call on a node where the
    /// process already runs.
    async fn start_process(
        &self,
        node: &NodeDetails,
        server_type: ServerType,
    ) -> Result<(), NodeOpError>;

    /// Block until every node reports `server_type` healthy, or fail once
    /// `timeout` has elapsed.
    async fn wait_healthy(
        &self,
        nodes: &[NodeDetails],
        server_type: ServerType,
        timeout: Duration,
    ) -> Result<(), NodeOpError>;

    /// Re-register the universe's nodes with the external metrics scraper.
    async fn update_monitoring_targets(&self, universe: &Universe) -> Result<(), NodeOpError>;
}
