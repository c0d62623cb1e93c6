//! SQLite blackboard message store.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::utils::{decode_list, encode_list, from_millis, to_millis};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{BlackboardMessage, MessageType, Visibility};
use crate::domain::ports::MessageStore;

pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> DomainResult<BlackboardMessage> {
        let type_raw: String = row.get("message_type");
        let visibility_raw: String = row.get("visibility");
        Ok(BlackboardMessage {
            id: row.get("id"),
            session_id: row.get("session_id"),
            agent_id: row.get("agent_id"),
            message_type: MessageType::from_str(&type_raw).ok_or_else(|| {
                DomainError::StoreFailure(format!("bad message type: {type_raw}"))
            })?,
            content: row.get("content"),
            tags: decode_list(&row.get::<String, _>("tags")),
            mentions: decode_list(&row.get::<String, _>("mentions")),
            category: row.get("category"),
            visibility: match visibility_raw.as_str() {
                "agents" => Visibility::Agents,
                "user" => Visibility::User,
                _ => Visibility::Public,
            },
            payload: serde_json::from_str(&row.get::<String, _>("payload"))
                .unwrap_or(serde_json::Value::Null),
            created_at: from_millis(row.get("created_at")),
        })
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn insert(&self, message: &BlackboardMessage) -> DomainResult<()> {
        let visibility = match message.visibility {
            Visibility::Public => "public",
            Visibility::Agents => "agents",
            Visibility::User => "user",
        };
        sqlx::query(
            "INSERT INTO messages (
                id, session_id, agent_id, message_type, content, tags, mentions,
                category, visibility, payload, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.session_id)
        .bind(&message.agent_id)
        .bind(message.message_type.as_str())
        .bind(&message.content)
        .bind(encode_list(&message.tags))
        .bind(encode_list(&message.mentions))
        .bind(&message.category)
        .bind(visibility)
        .bind(message.payload.to_string())
        .bind(to_millis(message.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<BlackboardMessage>> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::row_to_message(&r)).transpose()
    }

    async fn list_by_session(&self, session_id: &str) -> DomainResult<Vec<BlackboardMessage>> {
        let rows =
            sqlx::query("SELECT * FROM messages WHERE session_id = ? ORDER BY created_at ASC")
                .bind(session_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(Self::row_to_message).collect()
    }

    async fn update_tags(&self, id: &str, tags: &[String]) -> DomainResult<()> {
        let result = sqlx::query("UPDATE messages SET tags = ? WHERE id = ?")
            .bind(encode_list(tags))
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::ValidationFailed(format!("unknown message: {id}")));
        }
        Ok(())
    }
}
