//! Lock store port.
//!
//! Lock acquisition must be atomic with claim-if-free-or-expired-or-own
//! semantics, so the design generalizes to multi-process deployments.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Lock;

/// Store interface for execution locks.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Try to claim a resource for `holder_id` with the given TTL.
    ///
    /// Succeeds when the resource is unheld, its lock has expired, or the
    /// holder already owns it (re-acquisition refreshes the TTL). Returns
    /// `false` on contention.
    async fn try_acquire(
        &self,
        resource: &str,
        holder_id: &str,
        session_id: Option<&str>,
        ttl_secs: i64,
    ) -> DomainResult<bool>;

    /// Release a lock. Owner-only unless the lock has expired.
    /// Returns `true` when a lock was removed.
    async fn release(&self, resource: &str, holder_id: &str) -> DomainResult<bool>;

    /// Release every lock held by the holder (agent shutdown).
    /// Returns the number of locks removed.
    async fn release_all(&self, holder_id: &str) -> DomainResult<u64>;

    /// Current lock on a resource, if any.
    async fn get(&self, resource: &str) -> DomainResult<Option<Lock>>;
}
