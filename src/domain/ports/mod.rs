//! Ports: narrow interfaces the core depends on.

pub mod agent_store;
pub mod governance_store;
pub mod instance_store;
pub mod llm;
pub mod lock_store;
pub mod message_store;
pub mod notification_store;
pub mod task_store;
pub mod thinking_store;

pub use agent_store::AgentStore;
pub use governance_store::{ApprovalStore, ProofStore, VoteStore};
pub use instance_store::InstanceStore;
pub use llm::{
    Capabilities, ChatMessage, ChatRequest, ChatResponse, ChatRole, NullToolRunner, StopReason,
    StreamChunk, TokenUsage, ToolCall, ToolRunner, ToolSpec,
};
pub use lock_store::LockStore;
pub use message_store::MessageStore;
pub use notification_store::NotificationStore;
pub use task_store::{TaskFilter, TaskStore};
pub use thinking_store::ThinkingLogStore;
