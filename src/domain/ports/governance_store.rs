//! Governance store ports: approvals, vote topics + votes, proofs.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Approval, TopicStatus, Vote, VoteTopic, WorkflowProof};

/// Store interface for approvals.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn insert(&self, approval: &Approval) -> DomainResult<()>;

    async fn update(&self, approval: &Approval) -> DomainResult<()>;

    async fn get(&self, id: &str) -> DomainResult<Option<Approval>>;

    /// Pending approvals awaiting the given approver.
    async fn list_pending_for(&self, approver_id: &str) -> DomainResult<Vec<Approval>>;

    /// All pending approvals.
    async fn list_pending(&self) -> DomainResult<Vec<Approval>>;
}

/// Store interface for vote topics and ballots.
#[async_trait]
pub trait VoteStore: Send + Sync {
    async fn insert_topic(&self, topic: &VoteTopic) -> DomainResult<()>;

    async fn update_topic(&self, topic: &VoteTopic) -> DomainResult<()>;

    async fn get_topic(&self, id: &str) -> DomainResult<Option<VoteTopic>>;

    async fn list_topics_by_status(&self, status: TopicStatus) -> DomainResult<Vec<VoteTopic>>;

    /// Insert a ballot. Fails with `DuplicateVote` when the agent already
    /// voted on the topic.
    async fn insert_vote(&self, vote: &Vote) -> DomainResult<()>;

    async fn list_votes(&self, topic_id: &str) -> DomainResult<Vec<Vote>>;
}

/// Store interface for workflow proofs. Identity is the proof id;
/// upserting replaces.
#[async_trait]
pub trait ProofStore: Send + Sync {
    async fn upsert(&self, proof: &WorkflowProof) -> DomainResult<()>;

    async fn get(&self, id: &str) -> DomainResult<Option<WorkflowProof>>;

    async fn list_by_instance(&self, instance_id: &str) -> DomainResult<Vec<WorkflowProof>>;
}
