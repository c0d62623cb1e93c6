//! SQLite thinking-log store.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::utils::{from_millis, to_millis};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ThinkingStep, ThinkingStepType};
use crate::domain::ports::ThinkingLogStore;

pub struct SqliteThinkingLogStore {
    pool: SqlitePool,
}

impl SqliteThinkingLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ThinkingLogStore for SqliteThinkingLogStore {
    async fn append(&self, step: &ThinkingStep) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO thinking_logs (id, task_id, agent_id, step_type, content, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&step.id)
        .bind(&step.task_id)
        .bind(&step.agent_id)
        .bind(step.step_type.as_str())
        .bind(&step.content)
        .bind(to_millis(step.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_by_task(&self, task_id: &str) -> DomainResult<Vec<ThinkingStep>> {
        let rows = sqlx::query(
            "SELECT * FROM thinking_logs WHERE task_id = ? ORDER BY created_at ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let type_raw: String = row.get("step_type");
                Ok(ThinkingStep {
                    id: row.get("id"),
                    task_id: row.get("task_id"),
                    agent_id: row.get("agent_id"),
                    step_type: ThinkingStepType::from_str(&type_raw).ok_or_else(|| {
                        DomainError::StoreFailure(format!("bad thinking step type: {type_raw}"))
                    })?,
                    content: row.get("content"),
                    created_at: from_millis(row.get("created_at")),
                })
            })
            .collect()
    }
}
