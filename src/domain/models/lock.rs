//! Lock domain model.
//!
//! Locks guard single-worker execution of tasks. The store enforces atomic
//! claim semantics: a resource can be taken when unheld, expired, or already
//! held by the requesting holder.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default lock TTL: 15 minutes.
pub const DEFAULT_LOCK_TTL_SECS: i64 = 15 * 60;

/// A claimed resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lock {
    /// Resource key, e.g. `lock:task:<taskId>`.
    pub resource: String,
    pub holder_id: String,
    pub session_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub acquired_at: DateTime<Utc>,
}

impl Lock {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Resource key for a task's execution lock.
pub fn task_lock_resource(task_id: &str) -> String {
    format!("lock:task:{task_id}")
}

/// Expiry instant for a fresh claim with the given TTL.
pub fn expiry(ttl_secs: i64) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(ttl_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_resource_key_shape() {
        assert_eq!(task_lock_resource("task-1"), "lock:task:task-1");
    }

    #[test]
    fn fresh_lock_is_not_expired() {
        let lock = Lock {
            resource: task_lock_resource("task-1"),
            holder_id: "dev-1".into(),
            session_id: None,
            expires_at: expiry(DEFAULT_LOCK_TTL_SECS),
            acquired_at: Utc::now(),
        };
        assert!(!lock.is_expired());
    }
}
