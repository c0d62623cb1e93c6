//! SQLite store adapter.

pub mod agent_store;
pub mod connection;
pub mod governance_store;
pub mod instance_store;
pub mod lock_store;
pub mod message_store;
pub mod migrations;
pub mod notification_store;
pub mod task_store;
pub mod thinking_store;
pub mod utils;

pub use agent_store::SqliteAgentStore;
pub use connection::DatabaseConnection;
pub use governance_store::{SqliteApprovalStore, SqliteProofStore, SqliteVoteStore};
pub use migrations::{Migration, MigrationError, Migrator};
pub use instance_store::SqliteInstanceStore;
pub use lock_store::SqliteLockStore;
pub use message_store::SqliteMessageStore;
pub use notification_store::SqliteNotificationStore;
pub use task_store::SqliteTaskStore;
pub use thinking_store::SqliteThinkingLogStore;
