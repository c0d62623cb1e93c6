//! SQLite agent store.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::utils::{decode_list, encode_list, from_millis, to_millis};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Agent, AgentStatus};
use crate::domain::ports::AgentStore;

pub struct SqliteAgentStore {
    pool: SqlitePool,
}

impl SqliteAgentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> DomainResult<Agent> {
        let status_raw: String = row.get("status");
        Ok(Agent {
            id: row.get("id"),
            roles: decode_list(&row.get::<String, _>("roles")),
            status: AgentStatus::from_str(&status_raw).ok_or_else(|| {
                DomainError::StoreFailure(format!("bad agent status: {status_raw}"))
            })?,
            is_enabled: row.get::<i64, _>("is_enabled") != 0,
            last_heartbeat_at: from_millis(row.get("last_heartbeat_at")),
            active_task_id: row.get("active_task_id"),
            created_at: from_millis(row.get("created_at")),
            status_updated_at: from_millis(row.get("status_updated_at")),
        })
    }
}

#[async_trait]
impl AgentStore for SqliteAgentStore {
    async fn upsert(&self, agent: &Agent) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO agents (
                id, roles, status, is_enabled, last_heartbeat_at, active_task_id,
                created_at, status_updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                roles = excluded.roles,
                status = excluded.status,
                is_enabled = excluded.is_enabled,
                last_heartbeat_at = excluded.last_heartbeat_at,
                active_task_id = excluded.active_task_id,
                status_updated_at = excluded.status_updated_at",
        )
        .bind(&agent.id)
        .bind(encode_list(&agent.roles))
        .bind(agent.status.as_str())
        .bind(i64::from(agent.is_enabled))
        .bind(to_millis(agent.last_heartbeat_at))
        .bind(&agent.active_task_id)
        .bind(to_millis(agent.created_at))
        .bind(to_millis(agent.status_updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<Agent>> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::row_to_agent(&r)).transpose()
    }

    async fn list(&self) -> DomainResult<Vec<Agent>> {
        let rows = sqlx::query("SELECT * FROM agents ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_agent).collect()
    }
}
