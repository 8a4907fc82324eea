use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Universe not found: {0}")]
    UniverseNotFound(Uuid),

    #[error("Universe already exists: {0}")]
    UniverseExists(Uuid),

    #[error("Version conflict on universe {universe_uuid}: expected {expected}, found {actual}")]
    VersionConflict {
        universe_uuid: Uuid,
        expected: i64,
        actual: i64,
    },

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

impl DbError {
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}
