//! Governance domain models: proofs, approvals, vote topics and votes.
//!
//! Governance entities couple agent work to phase exit gates: proofs attest
//! that work happened (or was agreed to), approvals resolve escalations such
//! as task takeover, and vote topics collect one decision per agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Proofs
// ============================================================================

/// What a proof attests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofType {
    /// Something was done (evidence of work).
    Work,
    /// Something was approved (evidence of agreement).
    Agreement,
}

impl ProofType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::Agreement => "agreement",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "work" => Some(Self::Work),
            "agreement" => Some(Self::Agreement),
            _ => None,
        }
    }
}

/// Attestation lifecycle of a proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationStatus {
    Pending,
    Approved,
    Rejected,
}

impl Default for AttestationStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// A proof record linked to a workflow phase. Identity is `id`;
/// upserting by id replaces the previous record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowProof {
    pub id: String,
    pub workflow_instance_id: String,
    pub phase_id: String,
    pub proof_type: ProofType,
    pub task_id: Option<String>,
    pub evidence_uri: Option<String>,
    /// sha256 over the evidence bytes (or the stringified artifact).
    pub hash: Option<String>,
    pub acknowledgers: Vec<String>,
    pub attestation_status: AttestationStatus,
    pub created_at: DateTime<Utc>,
}

impl WorkflowProof {
    pub fn new(
        instance_id: impl Into<String>,
        phase_id: impl Into<String>,
        proof_type: ProofType,
    ) -> Self {
        Self {
            id: format!("proof-{}", Uuid::new_v4()),
            workflow_instance_id: instance_id.into(),
            phase_id: phase_id.into(),
            proof_type,
            task_id: None,
            evidence_uri: None,
            hash: None,
            acknowledgers: Vec::new(),
            attestation_status: AttestationStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Proof id derived from the producing task (`proof:<taskId>`), so that
    /// re-processing the same completed task replaces rather than duplicates.
    pub fn for_task(
        instance_id: impl Into<String>,
        phase_id: impl Into<String>,
        proof_type: ProofType,
        task_id: &str,
    ) -> Self {
        let mut proof = Self::new(instance_id, phase_id, proof_type);
        proof.id = format!("proof:{task_id}");
        proof.task_id = Some(task_id.to_string());
        proof
    }
}

// ============================================================================
// Approvals
// ============================================================================

/// Decision state of an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// A request for sign-off on a task, resolved by a single approver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub id: String,
    pub task_id: String,
    pub created_by: String,
    pub approver_id: String,
    pub decision: ApprovalDecision,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Approval {
    pub fn new(
        task_id: impl Into<String>,
        created_by: impl Into<String>,
        approver_id: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("approval-{}", Uuid::new_v4()),
            task_id: task_id.into(),
            created_by: created_by.into(),
            approver_id: approver_id.into(),
            decision: ApprovalDecision::Pending,
            reason: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}

// ============================================================================
// Votes
// ============================================================================

/// How a vote topic tallies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteType {
    /// Approvals outnumber rejections among cast votes.
    SimpleMajority,
    /// Approvals exceed half of the eligible electorate.
    AbsoluteMajority,
    /// Every eligible agent approves.
    Unanimous,
    /// A single rejection kills the topic.
    Veto,
}

impl VoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SimpleMajority => "simple_majority",
            Self::AbsoluteMajority => "absolute_majority",
            Self::Unanimous => "unanimous",
            Self::Veto => "veto",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "simple_majority" => Some(Self::SimpleMajority),
            "absolute_majority" => Some(Self::AbsoluteMajority),
            "unanimous" => Some(Self::Unanimous),
            "veto" => Some(Self::Veto),
            _ => None,
        }
    }
}

/// Lifecycle of a vote topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicStatus {
    Pending,
    Completed,
    Timeout,
}

/// A single agent's ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BallotDecision {
    Approve,
    Reject,
    Abstain,
}

impl BallotDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Abstain => "abstain",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            "abstain" => Some(Self::Abstain),
            _ => None,
        }
    }
}

/// A vote topic collecting one ballot per agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteTopic {
    pub id: String,
    pub session_id: Option<String>,
    pub subject: String,
    pub vote_type: VoteType,
    /// Roles whose holders form the electorate; empty = any agent.
    pub required_roles: Vec<String>,
    pub timeout_at: DateTime<Utc>,
    pub status: TopicStatus,
    /// Final outcome once completed.
    pub outcome: Option<ApprovalDecision>,
    pub created_at: DateTime<Utc>,
}

impl VoteTopic {
    pub fn new(
        subject: impl Into<String>,
        vote_type: VoteType,
        timeout_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("topic-{}", Uuid::new_v4()),
            session_id: None,
            subject: subject.into(),
            vote_type,
            required_roles: Vec::new(),
            timeout_at,
            status: TopicStatus::Pending,
            outcome: None,
            created_at: Utc::now(),
        }
    }
}

/// A ballot cast on a topic. At most one per `(topic_id, agent_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub topic_id: String,
    pub agent_id: String,
    pub decision: BallotDecision,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}
