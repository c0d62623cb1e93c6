//! Blackboard message store port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::BlackboardMessage;

/// Store interface for blackboard messages. Messages are immutable after
/// creation except for tag enrichment by the policy plugin.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message.
    async fn insert(&self, message: &BlackboardMessage) -> DomainResult<()>;

    /// Get a message by id.
    async fn get(&self, id: &str) -> DomainResult<Option<BlackboardMessage>>;

    /// List all messages of a session, oldest first.
    async fn list_by_session(&self, session_id: &str) -> DomainResult<Vec<BlackboardMessage>>;

    /// Replace the tag set of a message (metadata enrichment only).
    async fn update_tags(&self, id: &str, tags: &[String]) -> DomainResult<()>;
}
