//! SQLite connection management.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::domain::errors::{DomainError, DomainResult};

/// A pooled SQLite connection with WAL journaling.
pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    /// Open (and create if missing) the database at `url`,
    /// e.g. `sqlite:.arranger/arranger.db` or `sqlite::memory:`.
    pub async fn new(url: &str) -> DomainResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| DomainError::StoreFailure(format!("invalid database url: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| DomainError::StoreFailure(format!("database connect failed: {e}")))?;
        Ok(Self { pool })
    }

    /// Apply pending embedded migrations.
    pub async fn migrate(&self) -> DomainResult<()> {
        let migrator = super::migrations::Migrator::new(self.pool.clone());
        migrator
            .run_embedded_migrations(super::migrations::all_embedded_migrations())
            .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
