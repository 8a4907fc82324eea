//! Durable universe state with optimistic concurrency.
//!
//! Every mutation is a compare-and-swap against the version the caller
//! observed. A committed mutation moves the version forward by exactly one;
//! a rejected one leaves the record untouched.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use universe_core::{Universe, UniverseDetails};
use uuid::Uuid;

use crate::error::DbError;

/// Mutation applied to a universe's details inside a compare-and-swap.
pub type DetailsMutation = Box<dyn FnOnce(&mut UniverseDetails) + Send>;

#[async_trait]
pub trait UniverseStore: Send + Sync {
    /// Register a new universe. The stored version is whatever the record
    /// carries (1 for freshly built universes).
    async fn insert(&self, universe: &Universe) -> Result<(), DbError>;

    async fn read(&self, universe_uuid: Uuid) -> Result<Universe, DbError>;

    async fn list(&self) -> Result<Vec<Universe>, DbError>;

    /// Apply `mutate` if the stored version still equals `expected_version`.
    ///
    /// Returns the new version (`expected_version + 1`) or
    /// [`DbError::VersionConflict`] when the record moved underneath the caller.
    async fn compare_and_swap(
        &self,
        universe_uuid: Uuid,
        expected_version: i64,
        mutate: DetailsMutation,
    ) -> Result<i64, DbError>;
}

/// Process-local store, used by tests and dry runs.
#[derive(Default)]
pub struct InMemoryUniverseStore {
    universes: RwLock<HashMap<Uuid, Universe>>,
}

impl InMemoryUniverseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UniverseStore for InMemoryUniverseStore {
    async fn insert(&self, universe: &Universe) -> Result<(), DbError> {
        let mut universes = self.universes.write().await;
        if universes.contains_key(&universe.universe_uuid) {
            return Err(DbError::UniverseExists(universe.universe_uuid));
        }
        universes.insert(universe.universe_uuid, universe.clone());
        Ok(())
    }

    async fn read(&self, universe_uuid: Uuid) -> Result<Universe, DbError> {
        self.universes
            .read()
            .await
            .get(&universe_uuid)
            .cloned()
            .ok_or(DbError::UniverseNotFound(universe_uuid))
    }

    async fn list(&self) -> Result<Vec<Universe>, DbError> {
        let mut all: Vec<Universe> = self.universes.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn compare_and_swap(
        &self,
        universe_uuid: Uuid,
        expected_version: i64,
        mutate: DetailsMutation,
    ) -> Result<i64, DbError> {
        let mut universes = self.universes.write().await;
        let universe = universes
            .get_mut(&universe_uuid)
            .ok_or(DbError::UniverseNotFound(universe_uuid))?;

        if universe.version != expected_version {
            debug!(
                universe_uuid = %universe_uuid,
                expected = expected_version,
                actual = universe.version,
                "Rejected stale universe update"
            );
            return Err(DbError::VersionConflict {
                universe_uuid,
                expected: expected_version,
                actual: universe.version,
            });
        }

        mutate(&mut universe.details);
        universe.version += 1;
        universe.updated_at = Utc::now();
        Ok(universe.version)
    }
}
