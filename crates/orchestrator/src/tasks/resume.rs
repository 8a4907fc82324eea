//! Bring a paused universe back into service.

use universe_core::{NodeDetails, ServerType, TaskType, Universe, UniverseDetails};

use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::group::{SubTaskGroup, SubTaskGroupType};
use crate::retry::RetryPolicy;
use crate::subtask::{SubTask, SubTaskKind};
use crate::task::UniverseTask;

/// Resume hosts (unless the universe was imported), start masters and wait
/// for them, then start data servers and wait for them, refresh monitoring
/// and finally mark the update successful. On success the universe is no
/// longer paused.
#[derive(Debug, Clone, Default)]
pub struct ResumeUniverse;

impl ResumeUniverse {
    pub fn new() -> Self {
        Self
    }
}

fn per_node<F>(
    name: &str,
    group_type: SubTaskGroupType,
    nodes: &[NodeDetails],
    retry: &RetryPolicy,
    kind: F,
) -> Option<SubTaskGroup>
where
    F: Fn(&NodeDetails) -> SubTaskKind,
{
    if nodes.is_empty() {
        return None;
    }
    let mut group = SubTaskGroup::new(name, group_type);
    for node in nodes {
        group.add(SubTask::new(kind(node), retry.clone()));
    }
    Some(group)
}

impl UniverseTask for ResumeUniverse {
    fn task_type(&self) -> TaskType {
        TaskType::ResumeUniverse
    }

    fn plan(
        &self,
        universe: &Universe,
        config: &OrchestratorConfig,
    ) -> Result<Vec<SubTaskGroup>> {
        let masters = universe.masters();
        let tservers = universe.tservers();
        let wait_retry = config.wait_for_server_retry();
        let mut groups = Vec::new();

        // Imported universes have hosts we do not manage.
        if !universe.details.imported {
            groups.extend(per_node(
                "ResumeServers",
                SubTaskGroupType::ResumeUniverse,
                universe.nodes(),
                &config.subtask_retry,
                |node| SubTaskKind::ResumeServer { node: node.clone() },
            ));
        }

        for (server_type, nodes, start, wait) in [
            (ServerType::Master, &masters, "StartMasters", "WaitForMasters"),
            (ServerType::TServer, &tservers, "StartTServers", "WaitForTServers"),
        ] {
            groups.extend(per_node(
                start,
                SubTaskGroupType::StartingNodeProcesses,
                nodes,
                &config.subtask_retry,
                |node| SubTaskKind::StartProcess {
                    node: node.clone(),
                    server_type,
                },
            ));
            groups.extend(per_node(
                wait,
                SubTaskGroupType::ConfigureUniverse,
                nodes,
                &wait_retry,
                |node| SubTaskKind::WaitForServer {
                    node: node.clone(),
                    server_type,
                },
            ));
        }

        groups.push(
            SubTaskGroup::new("UpdateMonitoringTargets", SubTaskGroupType::UpdatingMonitoring)
                .with_subtask(SubTask::new(
                    SubTaskKind::UpdateMonitoringTargets,
                    config.subtask_retry.clone(),
                )),
        );
        groups.push(
            SubTaskGroup::new("MarkUniverseUpdateSuccess", SubTaskGroupType::ResumeUniverse)
                .with_subtask(SubTask::new(
                    SubTaskKind::MarkUniverseUpdateSuccess,
                    config.subtask_retry.clone(),
                )),
        );

        Ok(groups)
    }

    fn commit(&self, details: &mut UniverseDetails) {
        details.universe_paused = false;
    }
}
