use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::node::{NodeDetails, ServerType};

/// Mutable configuration of a universe, persisted as one document.
///
/// `update_in_progress` and `updating_task_uuid` always move together; use
/// [`UniverseDetails::set_locked`] and [`UniverseDetails::clear_lock`] rather
/// than touching the fields directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UniverseDetails {
    #[serde(default)]
    pub universe_paused: bool,
    #[serde(default)]
    pub update_in_progress: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updating_task_uuid: Option<Uuid>,
    #[serde(default)]
    pub update_succeeded: bool,
    /// Universe brought under management from outside; it has no locally
    /// provisioned hosts to suspend or resume.
    #[serde(default)]
    pub imported: bool,
    #[serde(default)]
    pub nodes: Vec<NodeDetails>,
}

impl UniverseDetails {
    pub fn is_locked(&self) -> bool {
        self.update_in_progress
    }

    pub fn set_locked(&mut self, task_uuid: Uuid) {
        self.update_in_progress = true;
        self.updating_task_uuid = Some(task_uuid);
        self.update_succeeded = false;
    }

    pub fn clear_lock(&mut self) {
        self.update_in_progress = false;
        self.updating_task_uuid = None;
    }

    pub fn is_owned_by(&self, task_uuid: Uuid) -> bool {
        self.update_in_progress && self.updating_task_uuid == Some(task_uuid)
    }

    pub fn node(&self, node_uuid: Uuid) -> Option<&NodeDetails> {
        self.nodes.iter().find(|n| n.node_uuid == node_uuid)
    }

    pub fn node_mut(&mut self, node_uuid: Uuid) -> Option<&mut NodeDetails> {
        self.nodes.iter_mut().find(|n| n.node_uuid == node_uuid)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Universe {
    pub universe_uuid: Uuid,
    pub name: String,
    pub version: i64,
    pub details: UniverseDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Universe {
    pub fn new(name: impl Into<String>, nodes: Vec<NodeDetails>) -> Self {
        let now = Utc::now();
        Self {
            universe_uuid: Uuid::new_v4(),
            name: name.into(),
            version: 1,
            details: UniverseDetails {
                nodes,
                ..Default::default()
            },
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.universe_uuid = id;
        self
    }

    pub fn paused(mut self) -> Self {
        self.details.universe_paused = true;
        self
    }

    pub fn imported(mut self) -> Self {
        self.details.imported = true;
        self
    }

    pub fn nodes(&self) -> &[NodeDetails] {
        &self.details.nodes
    }

    /// Nodes hosting the given server type, deduplicated by node uuid and
    /// kept in declaration order.
    pub fn servers(&self, server_type: ServerType) -> Vec<NodeDetails> {
        let mut seen = HashSet::new();
        self.details
            .nodes
            .iter()
            .filter(|n| n.has_role(server_type))
            .filter(|n| seen.insert(n.node_uuid))
            .cloned()
            .collect()
    }

    pub fn masters(&self) -> Vec<NodeDetails> {
        self.servers(ServerType::Master)
    }

    pub fn tservers(&self) -> Vec<NodeDetails> {
        self.servers(ServerType::TServer)
    }
}

/// Registration payload for a universe, as read from operator input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterUniverseRequest {
    #[serde(default)]
    pub universe_uuid: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub imported: bool,
    pub nodes: Vec<NodeDetails>,
}

impl RegisterUniverseRequest {
    pub fn into_universe(self) -> Universe {
        let mut universe = Universe::new(self.name, self.nodes);
        if let Some(id) = self.universe_uuid {
            universe.universe_uuid = id;
        }
        universe.details.universe_paused = self.paused;
        universe.details.imported = self.imported;
        universe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_universe_creation() {
        let universe = Universe::new("u1", vec![NodeDetails::new("n1").master()]);

        assert_eq!(universe.version, 1);
        assert!(!universe.details.universe_paused);
        assert!(!universe.details.is_locked());
        assert_eq!(universe.nodes().len(), 1);
    }

    #[test]
    fn test_lock_fields_move_together() {
        let mut details = UniverseDetails {
            update_succeeded: true,
            ..Default::default()
        };
        let task = Uuid::new_v4();

        details.set_locked(task);
        assert!(details.update_in_progress);
        assert_eq!(details.updating_task_uuid, Some(task));
        assert!(!details.update_succeeded);
        assert!(details.is_owned_by(task));
        assert!(!details.is_owned_by(Uuid::new_v4()));

        details.clear_lock();
        assert!(!details.update_in_progress);
        assert!(details.updating_task_uuid.is_none());
    }

    #[test]
    fn test_servers_by_role() {
        let universe = Universe::new(
            "u1",
            vec![
                NodeDetails::new("n1").master().tserver(),
                NodeDetails::new("n2").tserver(),
                NodeDetails::new("n3").master(),
            ],
        );

        let masters: Vec<_> = universe.masters().into_iter().map(|n| n.node_name).collect();
        let tservers: Vec<_> = universe.tservers().into_iter().map(|n| n.node_name).collect();

        assert_eq!(masters, vec!["n1", "n3"]);
        assert_eq!(tservers, vec!["n1", "n2"]);
    }

    #[test]
    fn test_servers_deduplicates_by_uuid() {
        let node = NodeDetails::new("n1").master();
        let universe = Universe::new("u1", vec![node.clone(), node]);

        assert_eq!(universe.masters().len(), 1);
    }

    #[test]
    fn test_register_request_parsing() {
        let json = r#"{
            "name": "prod",
            "paused": true,
            "nodes": [
                { "node_uuid": "6f1c2a0e-8f4f-4e5b-9a53-0d7d7c0f5b11", "node_name": "n1", "is_master": true }
            ]
        }"#;

        let request: RegisterUniverseRequest = serde_json::from_str(json).unwrap();
        let universe = request.into_universe();

        assert_eq!(universe.name, "prod");
        assert!(universe.details.universe_paused);
        assert!(!universe.details.imported);
        assert_eq!(universe.masters().len(), 1);
    }
}
