//! Domain models for the Arranger orchestrator core.

pub mod agent;
pub mod audit;
pub mod governance;
pub mod instance;
pub mod lock;
pub mod message;
pub mod notification;
pub mod policy;
pub mod scenario;
pub mod task;
pub mod workflow;

pub use agent::{Agent, AgentStatus};
pub use audit::{ThinkingStep, ThinkingStepType};
pub use governance::{
    Approval, ApprovalDecision, AttestationStatus, BallotDecision, ProofType, TopicStatus, Vote,
    VoteTopic, VoteType, WorkflowProof,
};
pub use instance::{
    Artifact, DefectRecord, DefectSeverity, InstanceStatus, InstanceSummary, PhaseRuntimeState,
    PhaseStatus, TrackedTask, WorkflowInstance,
};
pub use lock::Lock;
pub use message::{BlackboardMessage, MessageType, Visibility};
pub use notification::{Notification, NotificationLevel};
pub use policy::{MessagePolicy, PolicyAction, PolicyConditions, PolicyType};
pub use task::{Task, TaskPriority, TaskStatus};
pub use workflow::{
    AutoTaskTemplate, ExitGate, PhaseDefinition, PhaseEntry, WorkflowDefinition,
};
