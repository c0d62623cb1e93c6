//! Workflow instance snapshot store port.
//!
//! The kernel owns instances in memory; snapshots are written through this
//! port after every mutation so state survives restarts.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::WorkflowInstance;

/// Store interface for workflow instance snapshots.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Insert or replace an instance snapshot.
    async fn upsert(&self, instance: &WorkflowInstance) -> DomainResult<()>;

    async fn get(&self, id: &str) -> DomainResult<Option<WorkflowInstance>>;

    async fn list(&self) -> DomainResult<Vec<WorkflowInstance>>;

    /// Remove an instance snapshot (explicit dispose only).
    async fn delete(&self, id: &str) -> DomainResult<()>;
}
