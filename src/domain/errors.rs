//! Domain errors for the Arranger orchestrator.

use thiserror::Error;

/// Domain-level errors that can occur across the orchestrator core.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Workflow definition invalid: {0}")]
    DefinitionInvalid(String),

    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Phase not found: {phase} in instance {instance}")]
    PhaseNotFound { instance: String, phase: String },

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Invalid task status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Lock contention on {resource} (held by {holder})")]
    LockContention { resource: String, holder: String },

    #[error("No agent available for role {0}")]
    NoAgentAvailable(String),

    #[error("Duplicate vote by agent {agent} on topic {topic}")]
    DuplicateVote { topic: String, agent: String },

    #[error("Vote topic not found: {0}")]
    TopicNotFound(String),

    #[error("Approval not found: {0}")]
    ApprovalNotFound(String),

    #[error("LLM call failed: {0}")]
    LlmFailure(String),

    #[error("Tool invocation failed: {tool}: {message}")]
    ToolFailure { tool: String, message: String },

    #[error("Store operation failed: {0}")]
    StoreFailure(String),

    #[error("Policy evaluation failed for {policy}: {message}")]
    PolicyEvaluationFailure { policy: String, message: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl DomainError {
    /// Whether the error is transient and the operation could succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::LockContention { .. }
                | Self::NoAgentAvailable(_)
                | Self::LlmFailure(_)
                | Self::StoreFailure(_)
        )
    }

    /// Whether the error is permanent and retrying is pointless.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::StoreFailure(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_contention_is_transient() {
        let err = DomainError::LockContention {
            resource: "lock:task:task-1".into(),
            holder: "agent-2".into(),
        };
        assert!(err.is_transient());
        assert!(!err.is_permanent());
    }

    #[test]
    fn invalid_transition_is_permanent() {
        let err = DomainError::InvalidTransition {
            from: "completed".into(),
            to: "running".into(),
        };
        assert!(err.is_permanent());
    }

    #[test]
    fn definition_invalid_display() {
        let err = DomainError::DefinitionInvalid("duplicate phase id: plan".into());
        assert_eq!(
            err.to_string(),
            "Workflow definition invalid: duplicate phase id: plan"
        );
    }
}
