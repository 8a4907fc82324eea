//! [`NodeOperations`] backed by operator-supplied shell commands.
//!
//! Each operation is a template such as `ssh {node_ip} yb-server-ctl.sh {server} start`.
//! Placeholders: `{node_name}`, `{node_ip}`, `{server}`, `{universe}`,
//! `{universe_name}` and `{nodes}` (comma separated addresses).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};
use universe_core::{NodeDetails, ServerType, Universe};

use crate::node_ops::{NodeOpError, NodeOperations};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeCommandTemplates {
    pub resume: Option<String>,
    pub start: Option<String>,
    pub health: Option<String>,
    pub monitoring: Option<String>,
    pub health_poll_interval_ms: u64,
}

impl Default for NodeCommandTemplates {
    fn default() -> Self {
        Self {
            resume: None,
            start: None,
            health: None,
            monitoring: None,
            health_poll_interval_ms: 1_000,
        }
    }
}

pub struct CommandNodeOperations {
    templates: NodeCommandTemplates,
    shell: String,
}

impl CommandNodeOperations {
    pub fn new(templates: NodeCommandTemplates) -> Self {
        Self {
            templates,
            shell: "sh".to_string(),
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    async fn run(&self, label: &str, command: &str) -> Result<String, NodeOpError> {
        debug!(node = %label, command = %command, "Running node command");

        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| NodeOpError::Unreachable {
                node: label.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NodeOpError::command_failed(
                label,
                format!("`{}` exited with {}: {}", command, output.status, stderr.trim()),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn wait_one(
        &self,
        template: &str,
        node: &NodeDetails,
        server_type: ServerType,
        timeout: Duration,
    ) -> Result<(), NodeOpError> {
        let command = render_node(template, node, Some(server_type));
        let interval = Duration::from_millis(self.templates.health_poll_interval_ms.max(1));
        let started = Instant::now();

        loop {
            match self.run(&node.node_name, &command).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        warn!(node = %node.node_name, server = %server_type, error = %e, "Health check gave up");
                        return Err(NodeOpError::NotHealthy {
                            node: node.node_name.clone(),
                            server: server_type,
                            waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                        });
                    }
                    debug!(node = %node.node_name, server = %server_type, error = %e, "Not healthy yet");
                }
            }
            tokio::time::sleep(interval).await;
        }
    }
}

fn render_node(template: &str, node: &NodeDetails, server_type: Option<ServerType>) -> String {
    let mut out = template
        .replace("{node_name}", &node.node_name)
        .replace("{node_ip}", node.address());
    if let Some(server) = server_type {
        out = out.replace("{server}", server.as_str());
    }
    out
}

fn render_universe(template: &str, universe: &Universe) -> String {
    let nodes = universe
        .nodes()
        .iter()
        .map(|n| n.address())
        .collect::<Vec<_>>()
        .join(",");
    template
        .replace("{universe}", &universe.universe_uuid.to_string())
        .replace("{universe_name}", &universe.name)
        .replace("{nodes}", &nodes)
}

#[async_trait]
impl NodeOperations for CommandNodeOperations {
    async fn resume_node(&self, node: &NodeDetails) -> Result<(), NodeOpError> {
        let Some(template) = &self.templates.resume else {
            return Ok(());
        };
        self.run(&node.node_name, &render_node(template, node, None))
            .await
            .map(|_| ())
    }

    async fn start_process(
        &self,
        node: &NodeDetails,
        server_type: ServerType,
    ) -> Result<(), NodeOpError> {
        let Some(template) = &self.templates.start else {
            return Ok(());
        };
        self.run(&node.node_name, &render_node(template, node, Some(server_type)))
            .await
            .map(|_| ())
    }

    async fn wait_healthy(
        &self,
        nodes: &[NodeDetails],
        server_type: ServerType,
        timeout: Duration,
    ) -> Result<(), NodeOpError> {
        let Some(template) = &self.templates.health else {
            return Ok(());
        };
        let checks = nodes
            .iter()
            .map(|node| self.wait_one(template, node, server_type, timeout));
        futures::future::try_join_all(checks).await.map(|_| ())
    }

    async fn update_monitoring_targets(&self, universe: &Universe) -> Result<(), NodeOpError> {
        let Some(template) = &self.templates.monitoring else {
            return Ok(());
        };
        self.run(&universe.name, &render_universe(template, universe))
            .await
            .map(|_| ())
    }
}
