mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{paused_universe, runner, store_with, test_config, FakeNodeOps};
use db::{create_pool, database_url, run_migrations, TaskInfoRepository, UniverseRepository, UniverseStore};
use events::{Event, EventBus};
use orchestrator::{
    Commissioner, ExclusiveLock, ExpectedVersion, OrchestratorConfig, OrchestratorError,
    ResumeUniverse, SubTaskGroup, TaskParams, TaskRunner, UniverseTask,
};
use tempfile::TempDir;
use universe_core::{ProcessState, ServerType, TaskState, TaskType, Universe, UniverseDetails};
use uuid::Uuid;

fn position(calls: &[String], key: &str) -> usize {
    calls
        .iter()
        .position(|c| c == key)
        .unwrap_or_else(|| panic!("{key} was never called: {calls:?}"))
}

mod resume {
    use super::*;

    #[tokio::test]
    async fn test_resume_runs_in_order_and_unpauses() {
        let universe = paused_universe();
        let id = universe.universe_uuid;
        let store = store_with(&universe).await;
        let ops = FakeNodeOps::new();

        runner(store.clone(), ops.clone())
            .run(Arc::new(ResumeUniverse), TaskParams::new(id))
            .await
            .unwrap();

        let calls = ops.calls();
        let last_resume = ["m1", "m2", "t1", "t2"]
            .iter()
            .map(|n| position(&calls, &format!("resume:{n}")))
            .max()
            .unwrap();
        let master_starts = ["m1", "m2"].map(|n| position(&calls, &format!("start:master:{n}")));
        let master_waits = ["m1", "m2"].map(|n| position(&calls, &format!("wait:master:{n}")));
        let tserver_starts = ["t1", "t2"].map(|n| position(&calls, &format!("start:tserver:{n}")));
        let tserver_waits = ["t1", "t2"].map(|n| position(&calls, &format!("wait:tserver:{n}")));
        let monitoring = position(&calls, "monitoring");

        assert!(master_starts.iter().all(|p| *p > last_resume));
        assert!(master_waits.iter().min() > master_starts.iter().max());
        assert!(tserver_starts.iter().min() > master_waits.iter().max());
        assert!(tserver_waits.iter().min() > tserver_starts.iter().max());
        assert!(monitoring > *tserver_waits.iter().max().unwrap());

        let stored = store.read(id).await.unwrap();
        assert!(!stored.details.universe_paused);
        assert!(stored.details.update_succeeded);
        assert!(!stored.details.update_in_progress);
        for node in stored.nodes() {
            if node.is_master {
                assert_eq!(node.process_state(ServerType::Master), ProcessState::Running);
            }
            if node.is_tserver {
                assert_eq!(node.process_state(ServerType::TServer), ProcessState::Running);
            }
        }
    }

    #[tokio::test]
    async fn test_imported_universe_skips_host_resume() {
        let universe = paused_universe().imported();
        let store = store_with(&universe).await;
        let ops = FakeNodeOps::new();

        runner(store, ops.clone())
            .run(Arc::new(ResumeUniverse), TaskParams::new(universe.universe_uuid))
            .await
            .unwrap();

        assert!(ops.calls().iter().all(|c| !c.starts_with("resume:")));
        assert_eq!(ops.count("start:master:m1"), 1);
    }

    #[tokio::test]
    async fn test_failure_leaves_paused_and_releases_lock() {
        let universe = paused_universe();
        let id = universe.universe_uuid;
        let store = store_with(&universe).await;
        let ops = FakeNodeOps::new();
        ops.fail("start:tserver:t2");

        let err = runner(store.clone(), ops.clone())
            .run(Arc::new(ResumeUniverse), TaskParams::new(id))
            .await
            .unwrap_err();

        // ResumeServers, StartMasters, WaitForMasters, then StartTServers.
        assert_eq!(err.failed_group_index(), Some(3));
        assert_eq!(ops.count("wait:tserver:t1"), 0);
        assert_eq!(ops.count("monitoring"), 0);
        // Three attempts from the retry policy.
        assert_eq!(ops.count("start:tserver:t2"), 3);

        let stored = store.read(id).await.unwrap();
        assert!(stored.details.universe_paused);
        assert!(!stored.details.update_succeeded);
        assert!(!stored.details.update_in_progress);

        // Masters stay started: there is no rollback.
        for master in stored.masters() {
            assert_eq!(master.process_state(ServerType::Master), ProcessState::Running);
        }
    }

    #[tokio::test]
    async fn test_panicking_subtask_still_unlocks() {
        let universe = paused_universe();
        let id = universe.universe_uuid;
        let store = store_with(&universe).await;
        let ops = FakeNodeOps::new();
        ops.panic_on("wait:master:m1");

        let result = runner(store.clone(), ops.clone())
            .run(Arc::new(ResumeUniverse), TaskParams::new(id))
            .await;
        assert!(result.is_err());

        let lock = ExclusiveLock::new(store.clone());
        assert_eq!(lock.holder(id).await.unwrap(), None);
        assert!(lock
            .acquire(id, ExpectedVersion::Any, Uuid::new_v4())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_lock_conflict_makes_no_node_calls() {
        let universe = paused_universe();
        let id = universe.universe_uuid;
        let store = store_with(&universe).await;
        let ops = FakeNodeOps::new();

        let other = Uuid::new_v4();
        ExclusiveLock::new(store.clone())
            .acquire(id, ExpectedVersion::Any, other)
            .await
            .unwrap();
        let before = store.read(id).await.unwrap();

        let err = runner(store.clone(), ops.clone())
            .run(Arc::new(ResumeUniverse), TaskParams::new(id))
            .await
            .unwrap_err();

        assert!(err.is_lock_conflict());
        assert!(ops.calls().is_empty());
        let after = store.read(id).await.unwrap();
        assert_eq!(after.version, before.version);
        assert_eq!(after.details.updating_task_uuid, Some(other));
    }

    #[tokio::test]
    async fn test_stale_expected_version_conflicts() {
        let universe = paused_universe();
        let store = store_with(&universe).await;
        let ops = FakeNodeOps::new();

        let err = runner(store, ops.clone())
            .run(
                Arc::new(ResumeUniverse),
                TaskParams::new(universe.universe_uuid).with_expected_version(5i64),
            )
            .await
            .unwrap_err();

        assert!(err.is_lock_conflict());
        assert!(ops.calls().is_empty());
    }

    #[tokio::test]
    async fn test_state_events_follow_lifecycle() {
        let universe = paused_universe();
        let store = store_with(&universe).await;
        let ops = FakeNodeOps::new();
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let params = TaskParams::new(universe.universe_uuid);

        TaskRunner::new(store, ops)
            .with_config(test_config())
            .with_event_bus(bus)
            .run(Arc::new(ResumeUniverse), params)
            .await
            .unwrap();

        let states: Vec<_> = events::drain_task_events(&mut rx, params.task_uuid)
            .into_iter()
            .filter_map(|e| match e.event {
                Event::TaskStateChanged { to_state, .. } => Some(to_state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec!["locking", "planning", "executing", "finalizing", "unlocking", "succeeded"]
        );
    }
}

/// Task whose planning step panics.
struct PanickingPlan;

impl UniverseTask for PanickingPlan {
    fn task_type(&self) -> TaskType {
        TaskType::ResumeUniverse
    }

    fn plan(&self, _: &Universe, _: &OrchestratorConfig) -> orchestrator::Result<Vec<SubTaskGroup>> {
        panic!("planner bug");
    }

    fn commit(&self, _: &mut UniverseDetails) {}
}

mod runner_faults {
    use super::*;

    #[tokio::test]
    async fn test_panic_in_plan_becomes_unexpected_error() {
        let universe = paused_universe();
        let id = universe.universe_uuid;
        let store = store_with(&universe).await;

        let err = runner(store.clone(), FakeNodeOps::new())
            .run(Arc::new(PanickingPlan), TaskParams::new(id))
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::Unexpected(ref msg) if msg.contains("planner bug")));
        let stored = store.read(id).await.unwrap();
        assert!(!stored.details.update_in_progress);
        assert!(stored.details.universe_paused);
    }

    #[tokio::test]
    async fn test_versions_move_only_on_commits() {
        let universe = Universe::new(
            "single",
            vec![universe_core::NodeDetails::new("n1").master()],
        )
        .paused()
        .imported();
        let id = universe.universe_uuid;
        let store = store_with(&universe).await;

        runner(store.clone(), FakeNodeOps::new())
            .run(Arc::new(ResumeUniverse), TaskParams::new(id).with_expected_version(1i64))
            .await
            .unwrap();

        // lock, Starting, Running, mark success, commit, unlock
        assert_eq!(store.read(id).await.unwrap().version, 7);
    }
}

mod commissioner {
    use super::*;

    async fn sqlite() -> (TempDir, Arc<UniverseRepository>, Arc<TaskInfoRepository>) {
        let dir = TempDir::new().unwrap();
        let pool = create_pool(&database_url(&dir.path().join("universes.db")))
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        (
            dir,
            Arc::new(UniverseRepository::new(pool.clone())),
            Arc::new(TaskInfoRepository::new(pool)),
        )
    }

    #[tokio::test]
    async fn test_submit_persists_terminal_state() {
        let (_dir, universes, tasks) = sqlite().await;
        let universe = paused_universe();
        let id = universe.universe_uuid;
        universes.insert(&universe).await.unwrap();

        let commissioner = Commissioner::new(
            TaskRunner::new(universes.clone(), FakeNodeOps::new()).with_config(test_config()),
        )
        .with_task_repo(tasks.clone());

        let task_uuid = commissioner
            .submit(Arc::new(ResumeUniverse), id, ExpectedVersion::Any)
            .await
            .unwrap();
        let (state, failure) = commissioner.wait(task_uuid).await.unwrap();

        assert_eq!(state, TaskState::Succeeded);
        assert!(failure.is_none());
        let info = tasks.find_by_id(task_uuid).await.unwrap().unwrap();
        assert_eq!(info.state, TaskState::Succeeded);
        assert!(!universes.read(id).await.unwrap().details.universe_paused);

        let snapshot = commissioner.progress(task_uuid).await.unwrap();
        assert_eq!(snapshot.queue.groups.len(), 7);
        assert!(commissioner.active_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_task_records_message() {
        let (_dir, universes, tasks) = sqlite().await;
        let universe = paused_universe();
        let id = universe.universe_uuid;
        universes.insert(&universe).await.unwrap();
        let ops = FakeNodeOps::new();
        ops.fail("monitoring");

        let commissioner =
            Commissioner::new(TaskRunner::new(universes.clone(), ops).with_config(test_config()))
                .with_task_repo(tasks.clone());

        let task_uuid = commissioner
            .submit(Arc::new(ResumeUniverse), id, ExpectedVersion::Any)
            .await
            .unwrap();
        let (state, failure) = commissioner.wait(task_uuid).await.unwrap();

        assert_eq!(state, TaskState::Failed);
        assert!(failure.unwrap().contains("UpdateMonitoringTargets"));

        let info = tasks.find_by_id(task_uuid).await.unwrap().unwrap();
        assert_eq!(info.state, TaskState::Failed);
        assert!(info.failure_message.is_some());
        assert!(universes.read(id).await.unwrap().details.universe_paused);
    }

    #[tokio::test]
    async fn test_concurrent_waiters_see_same_outcome() {
        let universe = paused_universe();
        let store = store_with(&universe).await;
        let ops = FakeNodeOps::new();
        ops.set_delay(Duration::from_millis(20));
        let commissioner = Commissioner::new(runner(store, ops));

        let task_uuid = commissioner
            .submit(Arc::new(ResumeUniverse), universe.universe_uuid, ExpectedVersion::Any)
            .await
            .unwrap();
        let (first, second) =
            tokio::join!(commissioner.wait(task_uuid), commissioner.wait(task_uuid));

        assert_eq!(first.unwrap(), (TaskState::Succeeded, None));
        assert_eq!(second.unwrap(), (TaskState::Succeeded, None));
        // Late callers get the recorded outcome too.
        assert_eq!(
            commissioner.wait(task_uuid).await.unwrap(),
            (TaskState::Succeeded, None)
        );
    }

    #[tokio::test]
    async fn test_finished_tasks_are_evicted_beyond_history() {
        let first = paused_universe();
        let second = paused_universe();
        let store = store_with(&first).await;
        store.insert(&second).await.unwrap();
        let commissioner =
            Commissioner::new(runner(store, FakeNodeOps::new())).with_history_limit(1);

        let older = commissioner
            .submit(Arc::new(ResumeUniverse), first.universe_uuid, ExpectedVersion::Any)
            .await
            .unwrap();
        commissioner.wait(older).await.unwrap();
        let newer = commissioner
            .submit(Arc::new(ResumeUniverse), second.universe_uuid, ExpectedVersion::Any)
            .await
            .unwrap();
        commissioner.wait(newer).await.unwrap();

        assert!(commissioner.progress(older).await.is_none());
        assert!(commissioner.progress(newer).await.is_some());
        assert!(matches!(
            commissioner.wait(older).await,
            Err(OrchestratorError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_unknown_task() {
        let store = store_with(&paused_universe()).await;
        let commissioner = Commissioner::new(runner(store, FakeNodeOps::new()));

        let err = commissioner.wait(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::TaskNotFound(_)));
    }
}
