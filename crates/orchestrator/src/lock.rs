//! Per-universe exclusive update lock.
//!
//! The lock lives inside the universe record itself (`update_in_progress`
//! plus the owning task) and every transition is a compare-and-swap on the
//! record version, so exclusion holds across processes sharing the store.

use std::sync::Arc;

use db::{DbError, UniverseStore};
use events::{Event, EventBus};
use tracing::{debug, info, warn};
use universe_core::{Universe, UniverseDetails};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

/// Version a caller expects the universe to be at when locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpectedVersion {
    /// Skip the version comparison.
    #[default]
    Any,
    Exact(i64),
}

impl ExpectedVersion {
    pub fn from_option(version: Option<i64>) -> Self {
        version.map(Self::from).unwrap_or(Self::Any)
    }

    fn matches(&self, actual: i64) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(v) => *v == actual,
        }
    }
}

/// Negative values are the legacy "don't care" sentinel.
impl From<i64> for ExpectedVersion {
    fn from(version: i64) -> Self {
        if version < 0 {
            Self::Any
        } else {
            Self::Exact(version)
        }
    }
}

/// Proof of a successful acquire. Consumed logically by `release`.
#[derive(Debug, PartialEq, Eq)]
pub struct LockToken {
    universe_uuid: Uuid,
    task_uuid: Uuid,
    version: i64,
}

impl LockToken {
    pub fn universe_uuid(&self) -> Uuid {
        self.universe_uuid
    }

    pub fn task_uuid(&self) -> Uuid {
        self.task_uuid
    }

    /// Universe version right after the lock was taken.
    pub fn version(&self) -> i64 {
        self.version
    }
}

#[derive(Clone)]
pub struct ExclusiveLock {
    store: Arc<dyn UniverseStore>,
    event_bus: Option<EventBus>,
    cas_retry_limit: u32,
}

impl ExclusiveLock {
    pub fn new(store: Arc<dyn UniverseStore>) -> Self {
        Self {
            store,
            event_bus: None,
            cas_retry_limit: 10,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_cas_retry_limit(mut self, limit: u32) -> Self {
        self.cas_retry_limit = limit;
        self
    }

    pub fn store(&self) -> &Arc<dyn UniverseStore> {
        &self.store
    }

    fn emit(&self, event: Event) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event);
        }
    }

    pub async fn acquire(
        &self,
        universe_uuid: Uuid,
        expected: ExpectedVersion,
        task_uuid: Uuid,
    ) -> Result<LockToken> {
        let mut conflicts = 0u32;

        loop {
            let universe = self.store.read(universe_uuid).await?;

            if !expected.matches(universe.version) {
                return Err(OrchestratorError::lock_conflict(
                    universe_uuid,
                    format!(
                        "expected version {:?} but universe is at {}",
                        expected, universe.version
                    ),
                ));
            }
            if universe.details.is_locked() {
                let holder = universe
                    .details
                    .updating_task_uuid
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "unknown task".to_string());
                return Err(OrchestratorError::lock_conflict(
                    universe_uuid,
                    format!("update already in progress by {}", holder),
                ));
            }

            let result = self
                .store
                .compare_and_swap(
                    universe_uuid,
                    universe.version,
                    Box::new(move |details: &mut UniverseDetails| details.set_locked(task_uuid)),
                )
                .await;

            match result {
                Ok(version) => {
                    info!(
                        universe_uuid = %universe_uuid,
                        task_uuid = %task_uuid,
                        version,
                        "Universe locked for update"
                    );
                    self.emit(Event::UniverseLocked {
                        universe_uuid,
                        task_uuid,
                        version,
                    });
                    return Ok(LockToken {
                        universe_uuid,
                        task_uuid,
                        version,
                    });
                }
                Err(e @ DbError::VersionConflict { .. }) => {
                    if let ExpectedVersion::Exact(_) = expected {
                        return Err(OrchestratorError::lock_conflict(
                            universe_uuid,
                            e.to_string(),
                        ));
                    }
                    conflicts += 1;
                    if conflicts > self.cas_retry_limit {
                        return Err(OrchestratorError::lock_conflict(
                            universe_uuid,
                            format!("gave up after {} concurrent updates", conflicts),
                        ));
                    }
                    debug!(universe_uuid = %universe_uuid, conflicts, "Lock acquire raced, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Clear the lock if `token` still owns it.
    ///
    /// Returns the new version, or `None` when there was nothing to release.
    /// Version conflicts are retried for as long as the token owns the lock.
    pub async fn release(&self, token: &LockToken) -> Result<Option<i64>> {
        self.clear(token.universe_uuid, Some(token.task_uuid)).await
    }

    /// Clear whatever lock is held on the universe, regardless of owner.
    pub async fn force_release(&self, universe_uuid: Uuid) -> Result<Option<i64>> {
        warn!(universe_uuid = %universe_uuid, "Force releasing universe lock");
        self.clear(universe_uuid, None).await
    }

    /// Task currently holding the lock, if any.
    pub async fn holder(&self, universe_uuid: Uuid) -> Result<Option<Uuid>> {
        let universe = self.store.read(universe_uuid).await?;
        Ok(universe
            .details
            .is_locked()
            .then_some(universe.details.updating_task_uuid)
            .flatten())
    }

    async fn clear(&self, universe_uuid: Uuid, owner: Option<Uuid>) -> Result<Option<i64>> {
        let mut conflicts = 0u32;

        loop {
            let universe = self.store.read(universe_uuid).await?;
            let held = match owner {
                Some(task_uuid) => universe.details.is_owned_by(task_uuid),
                None => universe.details.is_locked(),
            };
            if !held {
                debug!(universe_uuid = %universe_uuid, "Nothing to release");
                return Ok(None);
            }
            let previous = universe.details.updating_task_uuid;

            match self
                .store
                .compare_and_swap(
                    universe_uuid,
                    universe.version,
                    Box::new(|details: &mut UniverseDetails| details.clear_lock()),
                )
                .await
            {
                Ok(version) => {
                    info!(universe_uuid = %universe_uuid, version, "Universe lock released");
                    self.emit(Event::UniverseUnlocked {
                        universe_uuid,
                        task_uuid: previous,
                        version,
                    });
                    return Ok(Some(version));
                }
                Err(DbError::VersionConflict { .. })
                    if owner.is_some() || conflicts < self.cas_retry_limit =>
                {
                    conflicts += 1;
                    debug!(universe_uuid = %universe_uuid, conflicts, "Lock release raced, retrying");
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Commit `mutate` while `task_uuid` holds the lock.
    ///
    /// Concurrent version movement is retried with a fresh read; a lock that
    /// moved to another owner (or was cleared) yields `LockLost`.
    pub async fn update_locked<F>(
        &self,
        universe_uuid: Uuid,
        task_uuid: Uuid,
        mutate: F,
    ) -> Result<i64>
    where
        F: Fn(&mut UniverseDetails) + Clone + Send + 'static,
    {
        let mut conflicts = 0u32;

        loop {
            let universe: Universe = self.store.read(universe_uuid).await?;
            if !universe.details.is_owned_by(task_uuid) {
                return Err(OrchestratorError::LockLost {
                    universe_uuid,
                    task_uuid,
                });
            }

            let attempt = mutate.clone();
            match self
                .store
                .compare_and_swap(
                    universe_uuid,
                    universe.version,
                    Box::new(move |d: &mut UniverseDetails| attempt(d)),
                )
                .await
            {
                Ok(version) => return Ok(version),
                Err(DbError::VersionConflict { .. }) if conflicts < self.cas_retry_limit => {
                    conflicts += 1;
                    debug!(universe_uuid = %universe_uuid, conflicts, "Locked update raced, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
