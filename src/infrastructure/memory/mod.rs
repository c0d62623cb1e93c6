//! In-memory store adapter.
//!
//! A full implementation of the store ports over mutex-guarded maps.
//! Used by unit tests and ephemeral (no-database) runs; the SQLite adapter
//! in `infrastructure::database` is the durable counterpart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    lock::expiry, Agent, Approval, ApprovalDecision, BlackboardMessage, Lock, Notification, Task,
    ThinkingStep, TopicStatus, Vote, VoteTopic, WorkflowInstance, WorkflowProof,
};
use crate::domain::ports::{
    AgentStore, ApprovalStore, InstanceStore, LockStore, MessageStore, NotificationStore,
    ProofStore, TaskFilter, TaskStore, ThinkingLogStore, VoteStore,
};

/// In-memory task store.
#[derive(Default)]
pub struct MemoryTaskStore {
    inner: Mutex<HashMap<String, Task>>,
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: &Task) -> DomainResult<()> {
        self.inner.lock().await.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn update(&self, task: &Task) -> DomainResult<()> {
        let mut inner = self.inner.lock().await;
        if !inner.contains_key(&task.id) {
            return Err(DomainError::TaskNotFound(task.id.clone()));
        }
        inner.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<Task>> {
        Ok(self.inner.lock().await.get(id).cloned())
    }

    async fn list(&self, filter: &TaskFilter) -> DomainResult<Vec<Task>> {
        let inner = self.inner.lock().await;
        let mut tasks: Vec<Task> = inner
            .values()
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| {
                filter
                    .assigned_to
                    .as_deref()
                    .map_or(true, |a| t.assigned_to.as_deref() == Some(a))
            })
            .filter(|t| {
                filter
                    .session_id
                    .as_deref()
                    .map_or(true, |s| t.session_id.as_deref() == Some(s))
            })
            .filter(|t| filter.label.as_deref().map_or(true, |l| t.has_label(l)))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    async fn find_first_by_label(&self, label: &str) -> DomainResult<Option<Task>> {
        let inner = self.inner.lock().await;
        let mut matches: Vec<&Task> = inner.values().filter(|t| t.has_label(label)).collect();
        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matches.first().map(|t| (*t).clone()))
    }
}

/// In-memory agent store.
#[derive(Default)]
pub struct MemoryAgentStore {
    inner: Mutex<HashMap<String, Agent>>,
}

#[async_trait]
impl AgentStore for MemoryAgentStore {
    async fn upsert(&self, agent: &Agent) -> DomainResult<()> {
        self.inner.lock().await.insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<Agent>> {
        Ok(self.inner.lock().await.get(id).cloned())
    }

    async fn list(&self) -> DomainResult<Vec<Agent>> {
        let mut agents: Vec<Agent> = self.inner.lock().await.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }
}

/// In-memory message store.
#[derive(Default)]
pub struct MemoryMessageStore {
    inner: Mutex<HashMap<String, BlackboardMessage>>,
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert(&self, message: &BlackboardMessage) -> DomainResult<()> {
        self.inner
            .lock()
            .await
            .insert(message.id.clone(), message.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<BlackboardMessage>> {
        Ok(self.inner.lock().await.get(id).cloned())
    }

    async fn list_by_session(&self, session_id: &str) -> DomainResult<Vec<BlackboardMessage>> {
        let inner = self.inner.lock().await;
        let mut messages: Vec<BlackboardMessage> = inner
            .values()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    async fn update_tags(&self, id: &str, tags: &[String]) -> DomainResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.get_mut(id) {
            Some(message) => {
                message.tags = tags.to_vec();
                Ok(())
            }
            None => Err(DomainError::ValidationFailed(format!("unknown message: {id}"))),
        }
    }
}

/// In-memory approval store.
#[derive(Default)]
pub struct MemoryApprovalStore {
    inner: Mutex<HashMap<String, Approval>>,
}

#[async_trait]
impl ApprovalStore for MemoryApprovalStore {
    async fn insert(&self, approval: &Approval) -> DomainResult<()> {
        self.inner
            .lock()
            .await
            .insert(approval.id.clone(), approval.clone());
        Ok(())
    }

    async fn update(&self, approval: &Approval) -> DomainResult<()> {
        let mut inner = self.inner.lock().await;
        if !inner.contains_key(&approval.id) {
            return Err(DomainError::ApprovalNotFound(approval.id.clone()));
        }
        inner.insert(approval.id.clone(), approval.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<Approval>> {
        Ok(self.inner.lock().await.get(id).cloned())
    }

    async fn list_pending_for(&self, approver_id: &str) -> DomainResult<Vec<Approval>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .values()
            .filter(|a| a.decision == ApprovalDecision::Pending && a.approver_id == approver_id)
            .cloned()
            .collect())
    }

    async fn list_pending(&self) -> DomainResult<Vec<Approval>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .values()
            .filter(|a| a.decision == ApprovalDecision::Pending)
            .cloned()
            .collect())
    }
}

/// In-memory vote store.
#[derive(Default)]
pub struct MemoryVoteStore {
    topics: Mutex<HashMap<String, VoteTopic>>,
    votes: Mutex<Vec<Vote>>,
}

#[async_trait]
impl VoteStore for MemoryVoteStore {
    async fn insert_topic(&self, topic: &VoteTopic) -> DomainResult<()> {
        self.topics
            .lock()
            .await
            .insert(topic.id.clone(), topic.clone());
        Ok(())
    }

    async fn update_topic(&self, topic: &VoteTopic) -> DomainResult<()> {
        let mut topics = self.topics.lock().await;
        if !topics.contains_key(&topic.id) {
            return Err(DomainError::TopicNotFound(topic.id.clone()));
        }
        topics.insert(topic.id.clone(), topic.clone());
        Ok(())
    }

    async fn get_topic(&self, id: &str) -> DomainResult<Option<VoteTopic>> {
        Ok(self.topics.lock().await.get(id).cloned())
    }

    async fn list_topics_by_status(&self, status: TopicStatus) -> DomainResult<Vec<VoteTopic>> {
        Ok(self
            .topics
            .lock()
            .await
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect())
    }

    async fn insert_vote(&self, vote: &Vote) -> DomainResult<()> {
        let mut votes = self.votes.lock().await;
        if votes
            .iter()
            .any(|v| v.topic_id == vote.topic_id && v.agent_id == vote.agent_id)
        {
            return Err(DomainError::DuplicateVote {
                topic: vote.topic_id.clone(),
                agent: vote.agent_id.clone(),
            });
        }
        votes.push(vote.clone());
        Ok(())
    }

    async fn list_votes(&self, topic_id: &str) -> DomainResult<Vec<Vote>> {
        Ok(self
            .votes
            .lock()
            .await
            .iter()
            .filter(|v| v.topic_id == topic_id)
            .cloned()
            .collect())
    }
}

/// In-memory proof store.
#[derive(Default)]
pub struct MemoryProofStore {
    inner: Mutex<HashMap<String, WorkflowProof>>,
}

#[async_trait]
impl ProofStore for MemoryProofStore {
    async fn upsert(&self, proof: &WorkflowProof) -> DomainResult<()> {
        self.inner.lock().await.insert(proof.id.clone(), proof.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<WorkflowProof>> {
        Ok(self.inner.lock().await.get(id).cloned())
    }

    async fn list_by_instance(&self, instance_id: &str) -> DomainResult<Vec<WorkflowProof>> {
        Ok(self
            .inner
            .lock()
            .await
            .values()
            .filter(|p| p.workflow_instance_id == instance_id)
            .cloned()
            .collect())
    }
}

/// In-memory lock store with claim-if-free-or-expired-or-own semantics.
#[derive(Default)]
pub struct MemoryLockStore {
    inner: Mutex<HashMap<String, Lock>>,
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_acquire(
        &self,
        resource: &str,
        holder_id: &str,
        session_id: Option<&str>,
        ttl_secs: i64,
    ) -> DomainResult<bool> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.get(resource) {
            if !existing.is_expired() && existing.holder_id != holder_id {
                return Ok(false);
            }
        }
        inner.insert(
            resource.to_string(),
            Lock {
                resource: resource.to_string(),
                holder_id: holder_id.to_string(),
                session_id: session_id.map(ToString::to_string),
                expires_at: expiry(ttl_secs),
                acquired_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn release(&self, resource: &str, holder_id: &str) -> DomainResult<bool> {
        let mut inner = self.inner.lock().await;
        let removable = inner
            .get(resource)
            .map(|l| l.holder_id == holder_id || l.is_expired())
            .unwrap_or(false);
        if removable {
            inner.remove(resource);
        }
        Ok(removable)
    }

    async fn release_all(&self, holder_id: &str) -> DomainResult<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.len();
        inner.retain(|_, lock| lock.holder_id != holder_id);
        Ok((before - inner.len()) as u64)
    }

    async fn get(&self, resource: &str) -> DomainResult<Option<Lock>> {
        Ok(self.inner.lock().await.get(resource).cloned())
    }
}

/// In-memory notification store.
#[derive(Default)]
pub struct MemoryNotificationStore {
    inner: Mutex<Vec<Notification>>,
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, notification: &Notification) -> DomainResult<()> {
        self.inner.lock().await.push(notification.clone());
        Ok(())
    }

    async fn list_unread(&self) -> DomainResult<Vec<Notification>> {
        let inner = self.inner.lock().await;
        let mut unread: Vec<Notification> =
            inner.iter().filter(|n| !n.is_read).cloned().collect();
        unread.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(unread)
    }

    async fn mark_read(&self, id: &str) -> DomainResult<()> {
        let mut inner = self.inner.lock().await;
        for notification in inner.iter_mut() {
            if notification.id == id {
                notification.is_read = true;
            }
        }
        Ok(())
    }
}

/// In-memory instance snapshot store.
#[derive(Default)]
pub struct MemoryInstanceStore {
    inner: Mutex<HashMap<String, WorkflowInstance>>,
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn upsert(&self, instance: &WorkflowInstance) -> DomainResult<()> {
        self.inner
            .lock()
            .await
            .insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<WorkflowInstance>> {
        Ok(self.inner.lock().await.get(id).cloned())
    }

    async fn list(&self) -> DomainResult<Vec<WorkflowInstance>> {
        Ok(self.inner.lock().await.values().cloned().collect())
    }

    async fn delete(&self, id: &str) -> DomainResult<()> {
        self.inner.lock().await.remove(id);
        Ok(())
    }
}

/// In-memory thinking-log store.
#[derive(Default)]
pub struct MemoryThinkingLogStore {
    inner: Mutex<Vec<ThinkingStep>>,
}

#[async_trait]
impl ThinkingLogStore for MemoryThinkingLogStore {
    async fn append(&self, step: &ThinkingStep) -> DomainResult<()> {
        self.inner.lock().await.push(step.clone());
        Ok(())
    }

    async fn list_by_task(&self, task_id: &str) -> DomainResult<Vec<ThinkingStep>> {
        Ok(self
            .inner
            .lock()
            .await
            .iter()
            .filter(|s| s.task_id == task_id)
            .cloned()
            .collect())
    }
}

/// The complete in-memory store bundle.
pub struct MemoryStores {
    pub tasks: Arc<MemoryTaskStore>,
    pub agents: Arc<MemoryAgentStore>,
    pub messages: Arc<MemoryMessageStore>,
    pub approvals: Arc<MemoryApprovalStore>,
    pub votes: Arc<MemoryVoteStore>,
    pub proofs: Arc<MemoryProofStore>,
    pub locks: Arc<MemoryLockStore>,
    pub notifications: Arc<MemoryNotificationStore>,
    pub instances: Arc<MemoryInstanceStore>,
    pub thinking: Arc<MemoryThinkingLogStore>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(MemoryTaskStore::default()),
            agents: Arc::new(MemoryAgentStore::default()),
            messages: Arc::new(MemoryMessageStore::default()),
            approvals: Arc::new(MemoryApprovalStore::default()),
            votes: Arc::new(MemoryVoteStore::default()),
            proofs: Arc::new(MemoryProofStore::default()),
            locks: Arc::new(MemoryLockStore::default()),
            notifications: Arc::new(MemoryNotificationStore::default()),
            instances: Arc::new(MemoryInstanceStore::default()),
            thinking: Arc::new(MemoryThinkingLogStore::default()),
        }
    }
}

impl Default for MemoryStores {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::lock::task_lock_resource;

    #[tokio::test]
    async fn lock_claim_respects_holder() {
        let locks = MemoryLockStore::default();
        let resource = task_lock_resource("task-1");

        assert!(locks.try_acquire(&resource, "dev-1", None, 900).await.unwrap());
        // Contention for a different holder.
        assert!(!locks.try_acquire(&resource, "dev-2", None, 900).await.unwrap());
        // Re-acquisition by the owner refreshes.
        assert!(locks.try_acquire(&resource, "dev-1", None, 900).await.unwrap());

        // Owner-only release.
        assert!(!locks.release(&resource, "dev-2").await.unwrap());
        assert!(locks.release(&resource, "dev-1").await.unwrap());
        assert!(locks.get(&resource).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_lock_can_be_stolen() {
        let locks = MemoryLockStore::default();
        let resource = task_lock_resource("task-1");
        // TTL in the past.
        assert!(locks.try_acquire(&resource, "dev-1", None, -5).await.unwrap());
        assert!(locks.try_acquire(&resource, "dev-2", None, 900).await.unwrap());
        let lock = locks.get(&resource).await.unwrap().unwrap();
        assert_eq!(lock.holder_id, "dev-2");
    }

    #[tokio::test]
    async fn duplicate_vote_rejected() {
        let votes = MemoryVoteStore::default();
        let topic = VoteTopic::new("merge?", crate::domain::models::VoteType::SimpleMajority, Utc::now());
        votes.insert_topic(&topic).await.unwrap();

        let ballot = Vote {
            topic_id: topic.id.clone(),
            agent_id: "dev-1".into(),
            decision: crate::domain::models::BallotDecision::Approve,
            reason: None,
            created_at: Utc::now(),
        };
        votes.insert_vote(&ballot).await.unwrap();
        assert!(matches!(
            votes.insert_vote(&ballot).await,
            Err(DomainError::DuplicateVote { .. })
        ));
    }

    #[tokio::test]
    async fn task_filter_by_label() {
        let tasks = MemoryTaskStore::default();
        let mut task = Task::new("a");
        task.add_label("workflow:auto");
        tasks.insert(&task).await.unwrap();
        tasks.insert(&Task::new("b")).await.unwrap();

        let found = tasks.list(&TaskFilter::by_label("workflow:auto")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, task.id);
    }
}
