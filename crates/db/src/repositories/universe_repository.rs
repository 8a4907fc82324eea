use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use universe_core::Universe;
use uuid::Uuid;

use crate::error::DbError;
use crate::models::UniverseRow;
use crate::store::{DetailsMutation, UniverseStore};

/// SQLite-backed [`UniverseStore`].
///
/// The conditional `UPDATE .. WHERE version = ?` is the atomic step of every
/// compare-and-swap; the preceding read only supplies the document to mutate.
#[derive(Clone)]
pub struct UniverseRepository {
    pool: SqlitePool,
}

impl UniverseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn find_row(&self, universe_uuid: Uuid) -> Result<Option<UniverseRow>, DbError> {
        let row: Option<UniverseRow> = sqlx::query_as(
            r#"
            SELECT universe_uuid, name, version, details, created_at, updated_at
            FROM universes
            WHERE universe_uuid = ?
            "#,
        )
        .bind(universe_uuid.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn current_version(&self, universe_uuid: Uuid) -> Result<i64, DbError> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM universes WHERE universe_uuid = ?")
                .bind(universe_uuid.to_string())
                .fetch_optional(&self.pool)
                .await?;

        version.ok_or(DbError::UniverseNotFound(universe_uuid))
    }

    pub async fn delete(&self, universe_uuid: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM universes WHERE universe_uuid = ?")
            .bind(universe_uuid.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl UniverseStore for UniverseRepository {
    async fn insert(&self, universe: &Universe) -> Result<(), DbError> {
        let row = UniverseRow::from_domain(universe)?;

        let result = sqlx::query(
            r#"
            INSERT INTO universes (universe_uuid, name, version, details, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.universe_uuid)
        .bind(&row.name)
        .bind(row.version)
        .bind(&row.details)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(DbError::UniverseExists(universe.universe_uuid))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, universe_uuid: Uuid) -> Result<Universe, DbError> {
        self.find_row(universe_uuid)
            .await?
            .ok_or(DbError::UniverseNotFound(universe_uuid))?
            .into_domain()
    }

    async fn list(&self) -> Result<Vec<Universe>, DbError> {
        let rows: Vec<UniverseRow> = sqlx::query_as(
            r#"
            SELECT universe_uuid, name, version, details, created_at, updated_at
            FROM universes
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    async fn compare_and_swap(
        &self,
        universe_uuid: Uuid,
        expected_version: i64,
        mutate: DetailsMutation,
    ) -> Result<i64, DbError> {
        let mut universe = self.read(universe_uuid).await?;
        if universe.version != expected_version {
            return Err(DbError::VersionConflict {
                universe_uuid,
                expected: expected_version,
                actual: universe.version,
            });
        }

        mutate(&mut universe.details);
        let details = serde_json::to_string(&universe.details)?;
        let new_version = expected_version + 1;

        let result = sqlx::query(
            r#"
            UPDATE universes
            SET details = ?, version = ?, updated_at = ?
            WHERE universe_uuid = ? AND version = ?
            "#,
        )
        .bind(&details)
        .bind(new_version)
        .bind(Utc::now().timestamp())
        .bind(universe_uuid.to_string())
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let actual = self.current_version(universe_uuid).await?;
            debug!(
                universe_uuid = %universe_uuid,
                expected = expected_version,
                actual,
                "Universe changed between read and update"
            );
            return Err(DbError::VersionConflict {
                universe_uuid,
                expected: expected_version,
                actual,
            });
        }

        Ok(new_version)
    }
}
