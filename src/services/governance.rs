//! Governance services: votes, approvals, proofs, notifications.
//!
//! These services own their entities; plugins and agent runtimes act only
//! through them. Vote and approval outcomes are mirrored to the blackboard
//! for audit and surfaced as notifications.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    task::labels, Agent, Approval, ApprovalDecision, BallotDecision, Notification,
    NotificationLevel, Task, TopicStatus, Vote, VoteTopic, VoteType, WorkflowProof,
};
use crate::domain::ports::{AgentStore, ApprovalStore, NotificationStore, ProofStore, VoteStore};
use crate::services::event_bus::{BusEvent, EventBus};
use crate::services::messages::MessageService;
use crate::services::scheduler::TaskScheduler;

// ============================================================================
// Notifications
// ============================================================================

/// Thin facade over the notification store.
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }

    pub async fn notify(
        &self,
        level: NotificationLevel,
        title: impl Into<String>,
        body: impl Into<String>,
        session_id: Option<&str>,
    ) -> DomainResult<()> {
        let mut notification = Notification::new(level, title, body);
        if let Some(session) = session_id {
            notification = notification.with_session(session);
        }
        self.store.insert(&notification).await
    }

    pub async fn list_unread(&self) -> DomainResult<Vec<Notification>> {
        self.store.list_unread().await
    }
}

// ============================================================================
// Proofs
// ============================================================================

/// Persists workflow proofs. Kernel-side phase state holds the live copy;
/// this service is the durable record.
pub struct ProofService {
    store: Arc<dyn ProofStore>,
}

impl ProofService {
    pub fn new(store: Arc<dyn ProofStore>) -> Self {
        Self { store }
    }

    /// Upsert a proof by id.
    pub async fn record(&self, proof: &WorkflowProof) -> DomainResult<()> {
        self.store.upsert(proof).await?;
        debug!(proof_id = %proof.id, phase_id = %proof.phase_id, "Proof persisted");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> DomainResult<Option<WorkflowProof>> {
        self.store.get(id).await
    }

    pub async fn list_by_instance(&self, instance_id: &str) -> DomainResult<Vec<WorkflowProof>> {
        self.store.list_by_instance(instance_id).await
    }
}

// ============================================================================
// Approvals
// ============================================================================

/// Owns approval lifecycle, including the task-takeover escalation path.
pub struct ApprovalService {
    store: Arc<dyn ApprovalStore>,
    notifications: Arc<NotificationService>,
    messages: Arc<MessageService>,
    bus: Arc<EventBus>,
}

impl ApprovalService {
    pub fn new(
        store: Arc<dyn ApprovalStore>,
        notifications: Arc<NotificationService>,
        messages: Arc<MessageService>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            notifications,
            messages,
            bus,
        }
    }

    /// Create a pending approval.
    pub async fn create(
        &self,
        task_id: &str,
        created_by: &str,
        approver_id: &str,
    ) -> DomainResult<Approval> {
        let approval = Approval::new(task_id, created_by, approver_id);
        self.store.insert(&approval).await?;
        self.bus
            .publish(BusEvent::ApprovalsUpdate(vec![approval.clone()]));
        Ok(approval)
    }

    /// Resolve a pending approval.
    pub async fn resolve(
        &self,
        approval_id: &str,
        decision: ApprovalDecision,
        reason: Option<String>,
    ) -> DomainResult<Approval> {
        let mut approval = self
            .store
            .get(approval_id)
            .await?
            .ok_or_else(|| DomainError::ApprovalNotFound(approval_id.to_string()))?;
        if approval.decision != ApprovalDecision::Pending {
            return Err(DomainError::ValidationFailed(format!(
                "approval {approval_id} already resolved"
            )));
        }
        approval.decision = decision;
        approval.reason = reason;
        approval.resolved_at = Some(Utc::now());
        self.store.update(&approval).await?;
        info!(approval_id, decision = decision.as_str(), "Approval resolved");
        self.notifications
            .notify(
                NotificationLevel::Info,
                "Approval resolved",
                format!(
                    "Approval for task {} was {} by {}",
                    approval.task_id,
                    decision.as_str(),
                    approval.approver_id
                ),
                None,
            )
            .await?;
        self.bus
            .publish(BusEvent::ApprovalsUpdate(vec![approval.clone()]));
        Ok(approval)
    }

    /// Escalate a failed task to the user: creates a takeover approval,
    /// excludes the failing agent from reassignment, and requeues the task
    /// so another eligible agent can pick it up.
    pub async fn request_task_takeover(
        &self,
        scheduler: &TaskScheduler,
        task: &Task,
        failing_agent: &str,
    ) -> DomainResult<Approval> {
        let approval = self.create(&task.id, failing_agent, "user").await?;
        scheduler
            .add_task_labels(
                &task.id,
                &[format!("{}{}", labels::AGENT_EXCLUDE, failing_agent)],
            )
            .await?;
        scheduler.release_task_claim(&task.id, failing_agent).await?;

        self.notifications
            .notify(
                NotificationLevel::Warning,
                "Task takeover requested",
                format!(
                    "Agent {failing_agent} failed task {} and requested takeover",
                    task.id
                ),
                task.session_id.as_deref(),
            )
            .await?;
        if let Some(session) = task.session_id.as_deref() {
            self.messages
                .post_audit(
                    session,
                    format!(
                        "takeover requested: task {} released by {failing_agent}",
                        task.id
                    ),
                )
                .await?;
        }
        Ok(approval)
    }

    pub async fn list_pending_for(&self, approver_id: &str) -> DomainResult<Vec<Approval>> {
        self.store.list_pending_for(approver_id).await
    }
}

// ============================================================================
// Votes
// ============================================================================

/// Owns vote topics and ballots; enforces one vote per (topic, agent).
pub struct VoteService {
    store: Arc<dyn VoteStore>,
    agents: Arc<dyn AgentStore>,
    notifications: Arc<NotificationService>,
    messages: Arc<MessageService>,
    bus: Arc<EventBus>,
}

impl VoteService {
    pub fn new(
        store: Arc<dyn VoteStore>,
        agents: Arc<dyn AgentStore>,
        notifications: Arc<NotificationService>,
        messages: Arc<MessageService>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            agents,
            notifications,
            messages,
            bus,
        }
    }

    /// Open a topic with the given tally rule and timeout.
    pub async fn create_topic(
        &self,
        subject: &str,
        session_id: Option<String>,
        vote_type: VoteType,
        required_roles: Vec<String>,
        timeout_secs: i64,
    ) -> DomainResult<VoteTopic> {
        let mut topic = VoteTopic::new(subject, vote_type, Utc::now() + Duration::seconds(timeout_secs));
        topic.session_id = session_id;
        topic.required_roles = required_roles;
        self.store.insert_topic(&topic).await?;
        self.bus.publish(BusEvent::VotesUpdate(vec![topic.clone()]));
        Ok(topic)
    }

    pub async fn get_topic(&self, topic_id: &str) -> DomainResult<Option<VoteTopic>> {
        self.store.get_topic(topic_id).await
    }

    pub async fn list_pending(&self) -> DomainResult<Vec<VoteTopic>> {
        self.store.list_topics_by_status(TopicStatus::Pending).await
    }

    pub async fn list_votes(&self, topic_id: &str) -> DomainResult<Vec<Vote>> {
        self.store.list_votes(topic_id).await
    }

    /// Cast a ballot; tallies the topic afterwards and completes it when
    /// the rule is decisive.
    pub async fn cast_vote(
        &self,
        topic_id: &str,
        agent_id: &str,
        decision: BallotDecision,
        reason: Option<String>,
    ) -> DomainResult<VoteTopic> {
        let topic = self
            .store
            .get_topic(topic_id)
            .await?
            .ok_or_else(|| DomainError::TopicNotFound(topic_id.to_string()))?;
        if topic.status != TopicStatus::Pending {
            return Err(DomainError::ValidationFailed(format!(
                "topic {topic_id} is no longer open"
            )));
        }

        self.store
            .insert_vote(&Vote {
                topic_id: topic_id.to_string(),
                agent_id: agent_id.to_string(),
                decision,
                reason,
                created_at: Utc::now(),
            })
            .await?;
        debug!(topic_id, agent_id, decision = decision.as_str(), "Vote cast");

        self.tally(topic).await
    }

    /// Mark expired pending topics as timed out.
    pub async fn timeout_sweep(&self) -> DomainResult<usize> {
        let pending = self.store.list_topics_by_status(TopicStatus::Pending).await?;
        let now = Utc::now();
        let mut expired = 0usize;
        for mut topic in pending {
            if topic.timeout_at > now {
                continue;
            }
            let votes = self.store.list_votes(&topic.id).await?;
            let approvals = count(&votes, BallotDecision::Approve);
            let rejections = count(&votes, BallotDecision::Reject);
            topic.status = TopicStatus::Timeout;
            topic.outcome = if votes.is_empty() {
                None
            } else if approvals > rejections {
                Some(ApprovalDecision::Approved)
            } else {
                Some(ApprovalDecision::Rejected)
            };
            self.store.update_topic(&topic).await?;
            warn!(topic_id = %topic.id, "Vote topic timed out");
            self.announce(&topic).await?;
            self.bus.publish(BusEvent::VotesUpdate(vec![topic]));
            expired += 1;
        }
        Ok(expired)
    }

    /// Agents forming the electorate of a topic.
    pub async fn electorate(&self, topic: &VoteTopic) -> DomainResult<Vec<Agent>> {
        let agents = self.agents.list().await?;
        Ok(agents
            .into_iter()
            .filter(|a| a.is_enabled)
            .filter(|a| {
                topic.required_roles.is_empty()
                    || topic.required_roles.iter().any(|r| a.has_role(r))
            })
            .collect())
    }

    async fn tally(&self, mut topic: VoteTopic) -> DomainResult<VoteTopic> {
        let votes = self.store.list_votes(&topic.id).await?;
        let electorate = self.electorate(&topic).await?;
        let eligible = electorate.len();
        let approvals = count(&votes, BallotDecision::Approve);
        let rejections = count(&votes, BallotDecision::Reject);
        let all_cast = votes.len() >= eligible;

        let outcome = match topic.vote_type {
            VoteType::Veto => {
                if rejections > 0 {
                    Some(ApprovalDecision::Rejected)
                } else if all_cast {
                    Some(ApprovalDecision::Approved)
                } else {
                    None
                }
            }
            VoteType::Unanimous => {
                if rejections > 0 {
                    Some(ApprovalDecision::Rejected)
                } else if all_cast && approvals == eligible {
                    Some(ApprovalDecision::Approved)
                } else if all_cast {
                    // Abstentions break unanimity.
                    Some(ApprovalDecision::Rejected)
                } else {
                    None
                }
            }
            VoteType::AbsoluteMajority => {
                if approvals * 2 > eligible {
                    Some(ApprovalDecision::Approved)
                } else if all_cast {
                    Some(ApprovalDecision::Rejected)
                } else {
                    None
                }
            }
            VoteType::SimpleMajority => {
                if all_cast {
                    Some(if approvals > rejections {
                        ApprovalDecision::Approved
                    } else {
                        ApprovalDecision::Rejected
                    })
                } else {
                    None
                }
            }
        };

        if let Some(outcome) = outcome {
            topic.status = TopicStatus::Completed;
            topic.outcome = Some(outcome);
            self.store.update_topic(&topic).await?;
            info!(topic_id = %topic.id, outcome = outcome.as_str(), "Vote topic completed");
            self.announce(&topic).await?;
        }
        self.bus.publish(BusEvent::VotesUpdate(vec![topic.clone()]));
        Ok(topic)
    }

    async fn announce(&self, topic: &VoteTopic) -> DomainResult<()> {
        let outcome = topic
            .outcome
            .map(|o| o.as_str().to_string())
            .unwrap_or_else(|| "undecided".into());
        self.notifications
            .notify(
                NotificationLevel::Info,
                "Vote concluded",
                format!("Topic \"{}\" finished: {outcome}", topic.subject),
                topic.session_id.as_deref(),
            )
            .await?;
        if let Some(session) = topic.session_id.as_deref() {
            self.messages
                .post_audit(session, format!("vote {}: {outcome}", topic.id))
                .await?;
        }
        Ok(())
    }
}

fn count(votes: &[Vote], decision: BallotDecision) -> usize {
    votes.iter().filter(|v| v.decision == decision).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AgentStatus;
    use crate::infrastructure::memory::MemoryStores;
    use crate::services::event_bus::EventBusConfig;

    struct Fixture {
        stores: MemoryStores,
        votes: VoteService,
    }

    async fn fixture(agent_roles: &[(&str, &[&str])]) -> Fixture {
        let stores = MemoryStores::new();
        let bus = Arc::new(EventBus::new(EventBusConfig::default()));
        for (id, roles) in agent_roles {
            let mut agent = Agent::new(*id, roles.iter().map(ToString::to_string).collect());
            agent.status = AgentStatus::Online;
            stores.agents.upsert(&agent).await.unwrap();
        }
        let notifications = Arc::new(NotificationService::new(stores.notifications.clone()));
        let messages = Arc::new(MessageService::new(stores.messages.clone(), bus.clone()));
        let votes = VoteService::new(
            stores.votes.clone(),
            stores.agents.clone(),
            notifications,
            messages,
            bus,
        );
        Fixture { stores, votes }
    }

    #[tokio::test]
    async fn veto_rejects_on_first_rejection() {
        let f = fixture(&[("a", &[]), ("b", &[]), ("c", &[])]).await;
        let topic = f
            .votes
            .create_topic("risky merge", None, VoteType::Veto, vec![], 600)
            .await
            .unwrap();

        f.votes
            .cast_vote(&topic.id, "a", BallotDecision::Approve, None)
            .await
            .unwrap();
        let topic = f
            .votes
            .cast_vote(&topic.id, "b", BallotDecision::Reject, None)
            .await
            .unwrap();
        assert_eq!(topic.status, TopicStatus::Completed);
        assert_eq!(topic.outcome, Some(ApprovalDecision::Rejected));
    }

    #[tokio::test]
    async fn absolute_majority_completes_early() {
        let f = fixture(&[("a", &[]), ("b", &[]), ("c", &[])]).await;
        let topic = f
            .votes
            .create_topic("ship it", None, VoteType::AbsoluteMajority, vec![], 600)
            .await
            .unwrap();

        f.votes
            .cast_vote(&topic.id, "a", BallotDecision::Approve, None)
            .await
            .unwrap();
        let topic = f
            .votes
            .cast_vote(&topic.id, "b", BallotDecision::Approve, None)
            .await
            .unwrap();
        // 2 of 3 approvals is already an absolute majority.
        assert_eq!(topic.status, TopicStatus::Completed);
        assert_eq!(topic.outcome, Some(ApprovalDecision::Approved));
    }

    #[tokio::test]
    async fn one_vote_per_agent_enforced() {
        let f = fixture(&[("a", &[]), ("b", &[])]).await;
        let topic = f
            .votes
            .create_topic("q", None, VoteType::SimpleMajority, vec![], 600)
            .await
            .unwrap();

        f.votes
            .cast_vote(&topic.id, "a", BallotDecision::Approve, None)
            .await
            .unwrap();
        let err = f
            .votes
            .cast_vote(&topic.id, "a", BallotDecision::Reject, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::DuplicateVote { .. }));
        assert_eq!(f.votes.list_votes(&topic.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn required_roles_scope_electorate() {
        let f = fixture(&[("qa-1", &["qa"]), ("dev-1", &["backend"])]).await;
        let topic = f
            .votes
            .create_topic("release?", None, VoteType::Unanimous, vec!["qa".into()], 600)
            .await
            .unwrap();

        // The single qa agent approving completes the unanimous vote.
        let topic = f
            .votes
            .cast_vote(&topic.id, "qa-1", BallotDecision::Approve, None)
            .await
            .unwrap();
        assert_eq!(topic.status, TopicStatus::Completed);
        assert_eq!(topic.outcome, Some(ApprovalDecision::Approved));
        let _ = &f.stores;
    }

    #[tokio::test]
    async fn timeout_sweep_expires_topics() {
        let f = fixture(&[("a", &[]), ("b", &[])]).await;
        let topic = f
            .votes
            .create_topic("stale", None, VoteType::SimpleMajority, vec![], -5)
            .await
            .unwrap();
        f.votes
            .cast_vote(&topic.id, "a", BallotDecision::Approve, None)
            .await
            .unwrap();

        let expired = f.votes.timeout_sweep().await.unwrap();
        assert_eq!(expired, 1);
        let topic = f.votes.get_topic(&topic.id).await.unwrap().unwrap();
        assert_eq!(topic.status, TopicStatus::Timeout);
        assert_eq!(topic.outcome, Some(ApprovalDecision::Approved));
    }
}
