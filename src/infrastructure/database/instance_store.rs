//! SQLite workflow instance snapshot store.
//!
//! Instances persist as a JSON state blob beside indexable columns; the
//! in-memory copy owned by the kernel stays authoritative.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::utils::to_millis;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::WorkflowInstance;
use crate::domain::ports::InstanceStore;

pub struct SqliteInstanceStore {
    pool: SqlitePool,
}

impl SqliteInstanceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_instance(row: &sqlx::sqlite::SqliteRow) -> DomainResult<WorkflowInstance> {
        let state: String = row.get("state");
        serde_json::from_str(&state)
            .map_err(|e| DomainError::StoreFailure(format!("bad instance snapshot: {e}")))
    }
}

#[async_trait]
impl InstanceStore for SqliteInstanceStore {
    async fn upsert(&self, instance: &WorkflowInstance) -> DomainResult<()> {
        let state = serde_json::to_string(instance)?;
        sqlx::query(
            "INSERT INTO workflow_instances (
                id, workflow_id, session_id, status, state, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                state = excluded.state,
                updated_at = excluded.updated_at",
        )
        .bind(&instance.id)
        .bind(&instance.workflow_id)
        .bind(&instance.session_id)
        .bind(instance.status.to_string())
        .bind(state)
        .bind(to_millis(instance.created_at))
        .bind(to_millis(instance.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<WorkflowInstance>> {
        let row = sqlx::query("SELECT * FROM workflow_instances WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::row_to_instance(&r)).transpose()
    }

    async fn list(&self) -> DomainResult<Vec<WorkflowInstance>> {
        let rows = sqlx::query("SELECT * FROM workflow_instances ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_instance).collect()
    }

    async fn delete(&self, id: &str) -> DomainResult<()> {
        sqlx::query("DELETE FROM workflow_instances WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
