#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use db::{InMemoryUniverseStore, UniverseStore};
use events::EventBus;
use orchestrator::{
    BackoffStrategy, ExclusiveLock, ExpectedVersion, NodeOpError, NodeOperations,
    OrchestratorConfig, RetryPolicy, TaskContext, TaskParams, TaskRunner,
};
use universe_core::{NodeDetails, ServerType, TaskType, Universe};
use uuid::Uuid;

/// Scriptable node provider that records every call by key:
/// `resume:<node>`, `start:<server>:<node>`, `wait:<server>:<node>`, `monitoring`.
#[derive(Default)]
pub struct FakeNodeOps {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    flaky: Mutex<HashMap<String, u32>>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeNodeOps {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }

    pub fn panic_on(&self, key: &str) {
        self.panicking.lock().unwrap().insert(key.to_string());
    }

    /// Fail the next `times` calls for `key`, then succeed.
    pub fn flaky(&self, key: &str, times: u32) {
        self.flaky.lock().unwrap().insert(key.to_string(), times);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, key: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == key).count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn call(&self, key: String) -> Result<(), NodeOpError> {
        self.calls.lock().unwrap().push(key.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panicking.lock().unwrap().contains(&key) {
            panic!("node provider exploded on {}", key);
        }
        if self.failing.lock().unwrap().contains(&key) {
            return Err(NodeOpError::command_failed(key, "scripted failure"));
        }
        let mut flaky = self.flaky.lock().unwrap();
        if let Some(remaining) = flaky.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(NodeOpError::command_failed(key, "transient failure"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl NodeOperations for FakeNodeOps {
    async fn resume_node(&self, node: &NodeDetails) -> Result<(), NodeOpError> {
        self.call(format!("resume:{}", node.node_name)).await
    }

    async fn start_process(
        &self,
        node: &NodeDetails,
        server_type: ServerType,
    ) -> Result<(), NodeOpError> {
        self.call(format!("start:{}:{}", server_type, node.node_name))
            .await
    }

    async fn wait_healthy(
        &self,
        nodes: &[NodeDetails],
        server_type: ServerType,
        _timeout: Duration,
    ) -> Result<(), NodeOpError> {
        for node in nodes {
            self.call(format!("wait:{}:{}", server_type, node.node_name))
                .await?;
        }
        Ok(())
    }

    async fn update_monitoring_targets(&self, _universe: &Universe) -> Result<(), NodeOpError> {
        self.call("monitoring".to_string()).await
    }
}

/// Two masters and two data servers, paused.
pub fn paused_universe() -> Universe {
    Universe::new(
        "prod",
        vec![
            NodeDetails::new("m1").master(),
            NodeDetails::new("m2").master(),
            NodeDetails::new("t1").tserver(),
            NodeDetails::new("t2").tserver(),
        ],
    )
    .paused()
}

pub async fn store_with(universe: &Universe) -> Arc<InMemoryUniverseStore> {
    let store = Arc::new(InMemoryUniverseStore::new());
    store.insert(universe).await.unwrap();
    store
}

/// Fast retries, no backoff.
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_subtask_retry(RetryPolicy::new(3).with_backoff(BackoffStrategy::None))
        .with_wait_for_server_timeout(Duration::from_secs(1))
}

pub fn runner(store: Arc<InMemoryUniverseStore>, ops: Arc<FakeNodeOps>) -> TaskRunner {
    TaskRunner::new(store, ops).with_config(test_config())
}

/// Context for driving groups and queues directly, with the lock already
/// held by the context's task.
pub async fn locked_context(
    store: Arc<InMemoryUniverseStore>,
    ops: Arc<FakeNodeOps>,
    universe_uuid: Uuid,
    config: OrchestratorConfig,
) -> Arc<TaskContext> {
    locked_context_with_events(store, ops, universe_uuid, config, None).await
}

pub async fn locked_context_with_events(
    store: Arc<InMemoryUniverseStore>,
    ops: Arc<FakeNodeOps>,
    universe_uuid: Uuid,
    config: OrchestratorConfig,
    event_bus: Option<EventBus>,
) -> Arc<TaskContext> {
    let runner = TaskRunner::new(store.clone(), ops.clone()).with_config(config.clone());
    let params = TaskParams::new(universe_uuid);
    let progress = runner.progress_for(TaskType::ResumeUniverse, &params);

    let lock = ExclusiveLock::new(store.clone());
    lock.acquire(universe_uuid, ExpectedVersion::Any, params.task_uuid)
        .await
        .unwrap();

    Arc::new(TaskContext {
        task_uuid: params.task_uuid,
        universe_uuid,
        store,
        lock,
        node_ops: ops,
        config,
        event_bus,
        cancel: tokio_util::sync::CancellationToken::new(),
        progress,
    })
}
