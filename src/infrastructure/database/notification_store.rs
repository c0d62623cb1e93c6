//! SQLite notification store.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::utils::{from_millis, to_millis};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Notification, NotificationLevel};
use crate::domain::ports::NotificationStore;

pub struct SqliteNotificationStore {
    pool: SqlitePool,
}

impl SqliteNotificationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_notification(row: &sqlx::sqlite::SqliteRow) -> DomainResult<Notification> {
        let level_raw: String = row.get("level");
        Ok(Notification {
            id: row.get("id"),
            session_id: row.get("session_id"),
            level: NotificationLevel::from_str(&level_raw).ok_or_else(|| {
                DomainError::StoreFailure(format!("bad notification level: {level_raw}"))
            })?,
            title: row.get("title"),
            body: row.get("body"),
            is_read: row.get::<i64, _>("is_read") != 0,
            created_at: from_millis(row.get("created_at")),
        })
    }
}

#[async_trait]
impl NotificationStore for SqliteNotificationStore {
    async fn insert(&self, notification: &Notification) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO notifications (id, session_id, level, title, body, is_read, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&notification.id)
        .bind(&notification.session_id)
        .bind(notification.level.as_str())
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(i64::from(notification.is_read))
        .bind(to_millis(notification.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_unread(&self) -> DomainResult<Vec<Notification>> {
        let rows = sqlx::query(
            "SELECT * FROM notifications WHERE is_read = 0 ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_notification).collect()
    }

    async fn mark_read(&self, id: &str) -> DomainResult<()> {
        sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
