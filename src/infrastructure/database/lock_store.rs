//! SQLite lock store.
//!
//! Atomic claim semantics in one statement: the upsert only lands when the
//! existing lock is expired or already held by the claimant. This keeps
//! the design safe for multi-process deployments.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use super::utils::{from_millis, to_millis};
use crate::domain::errors::DomainResult;
use crate::domain::models::{lock::expiry, Lock};
use crate::domain::ports::LockStore;

pub struct SqliteLockStore {
    pool: SqlitePool,
}

impl SqliteLockStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockStore for SqliteLockStore {
    async fn try_acquire(
        &self,
        resource: &str,
        holder_id: &str,
        session_id: Option<&str>,
        ttl_secs: i64,
    ) -> DomainResult<bool> {
        let now = to_millis(Utc::now());
        let result = sqlx::query(
            "INSERT INTO locks (resource, holder_id, session_id, expires_at, acquired_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(resource) DO UPDATE SET
                holder_id = excluded.holder_id,
                session_id = excluded.session_id,
                expires_at = excluded.expires_at,
                acquired_at = excluded.acquired_at
             WHERE locks.expires_at < ? OR locks.holder_id = excluded.holder_id",
        )
        .bind(resource)
        .bind(holder_id)
        .bind(session_id)
        .bind(to_millis(expiry(ttl_secs)))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, resource: &str, holder_id: &str) -> DomainResult<bool> {
        let result = sqlx::query(
            "DELETE FROM locks WHERE resource = ? AND (holder_id = ? OR expires_at < ?)",
        )
        .bind(resource)
        .bind(holder_id)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_all(&self, holder_id: &str) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM locks WHERE holder_id = ?")
            .bind(holder_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn get(&self, resource: &str) -> DomainResult<Option<Lock>> {
        let row = sqlx::query("SELECT * FROM locks WHERE resource = ?")
            .bind(resource)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Lock {
            resource: r.get("resource"),
            holder_id: r.get("holder_id"),
            session_id: r.get("session_id"),
            expires_at: from_millis(r.get("expires_at")),
            acquired_at: from_millis(r.get("acquired_at")),
        }))
    }
}
