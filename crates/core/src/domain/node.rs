use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of database process a node can host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    Master,
    /// Data server process.
    TServer,
}

impl ServerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::TServer => "tserver",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "master" => Some(Self::Master),
            "tserver" => Some(Self::TServer),
            _ => None,
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a single process on a node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeDetails {
    pub node_uuid: Uuid,
    pub node_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
    #[serde(default)]
    pub is_master: bool,
    #[serde(default)]
    pub is_tserver: bool,
    #[serde(default)]
    pub master_state: ProcessState,
    #[serde(default)]
    pub tserver_state: ProcessState,
}

impl NodeDetails {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_uuid: Uuid::new_v4(),
            node_name: node_name.into(),
            private_ip: None,
            is_master: false,
            is_tserver: false,
            master_state: ProcessState::default(),
            tserver_state: ProcessState::default(),
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.private_ip = Some(ip.into());
        self
    }

    pub fn master(mut self) -> Self {
        self.is_master = true;
        self
    }

    pub fn tserver(mut self) -> Self {
        self.is_tserver = true;
        self
    }

    pub fn has_role(&self, server_type: ServerType) -> bool {
        match server_type {
            ServerType::Master => self.is_master,
            ServerType::TServer => self.is_tserver,
        }
    }

    pub fn process_state(&self, server_type: ServerType) -> ProcessState {
        match server_type {
            ServerType::Master => self.master_state,
            ServerType::TServer => self.tserver_state,
        }
    }

    pub fn set_process_state(&mut self, server_type: ServerType, state: ProcessState) {
        match server_type {
            ServerType::Master => self.master_state = state,
            ServerType::TServer => self.tserver_state = state,
        }
    }

    /// Address used to reach the node, falling back to its name.
    pub fn address(&self) -> &str {
        self.private_ip.as_deref().unwrap_or(&self.node_name)
    }
}
