use chrono::Utc;
use sqlx::SqlitePool;
use universe_core::{TaskInfo, TaskState};
use uuid::Uuid;

use crate::error::DbError;
use crate::models::TaskInfoRow;

#[derive(Clone)]
pub struct TaskInfoRepository {
    pool: SqlitePool,
}

impl TaskInfoRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, info: &TaskInfo) -> Result<TaskInfo, DbError> {
        let row = TaskInfoRow::from(info);

        sqlx::query(
            r#"
            INSERT INTO task_info (task_uuid, universe_uuid, task_type, state, failure_message, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.task_uuid)
        .bind(&row.universe_uuid)
        .bind(&row.task_type)
        .bind(&row.state)
        .bind(&row.failure_message)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(info.clone())
    }

    pub async fn find_by_id(&self, task_uuid: Uuid) -> Result<Option<TaskInfo>, DbError> {
        let row: Option<TaskInfoRow> = sqlx::query_as(
            r#"
            SELECT task_uuid, universe_uuid, task_type, state, failure_message, created_at, updated_at
            FROM task_info
            WHERE task_uuid = ?
            "#,
        )
        .bind(task_uuid.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    pub async fn find_by_universe(&self, universe_uuid: Uuid) -> Result<Vec<TaskInfo>, DbError> {
        let rows: Vec<TaskInfoRow> = sqlx::query_as(
            r#"
            SELECT task_uuid, universe_uuid, task_type, state, failure_message, created_at, updated_at
            FROM task_info
            WHERE universe_uuid = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(universe_uuid.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    pub async fn update_state(
        &self,
        task_uuid: Uuid,
        state: TaskState,
        failure_message: Option<&str>,
    ) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE task_info
            SET state = ?, failure_message = ?, updated_at = ?
            WHERE task_uuid = ?
            "#,
        )
        .bind(state.as_str())
        .bind(failure_message)
        .bind(Utc::now().timestamp())
        .bind(task_uuid.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::TaskNotFound(task_uuid));
        }
        Ok(())
    }
}
