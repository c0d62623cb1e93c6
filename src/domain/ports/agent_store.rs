//! Agent store port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Agent;

/// Store interface for Agent persistence.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Insert or replace an agent record.
    async fn upsert(&self, agent: &Agent) -> DomainResult<()>;

    /// Get an agent by id.
    async fn get(&self, id: &str) -> DomainResult<Option<Agent>>;

    /// List all agents.
    async fn list(&self) -> DomainResult<Vec<Agent>>;
}
