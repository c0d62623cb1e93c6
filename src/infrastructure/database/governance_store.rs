//! SQLite governance stores: approvals, vote topics + votes, proofs.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::utils::{decode_list, encode_list, from_millis, opt_from_millis, opt_to_millis, to_millis};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Approval, ApprovalDecision, AttestationStatus, BallotDecision, ProofType, TopicStatus, Vote,
    VoteTopic, VoteType, WorkflowProof,
};
use crate::domain::ports::{ApprovalStore, ProofStore, VoteStore};

// ============================================================================
// Approvals
// ============================================================================

pub struct SqliteApprovalStore {
    pool: SqlitePool,
}

impl SqliteApprovalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_approval(row: &sqlx::sqlite::SqliteRow) -> DomainResult<Approval> {
        let decision_raw: String = row.get("decision");
        Ok(Approval {
            id: row.get("id"),
            task_id: row.get("task_id"),
            created_by: row.get("created_by"),
            approver_id: row.get("approver_id"),
            decision: ApprovalDecision::from_str(&decision_raw).ok_or_else(|| {
                DomainError::StoreFailure(format!("bad approval decision: {decision_raw}"))
            })?,
            reason: row.get("reason"),
            created_at: from_millis(row.get("created_at")),
            resolved_at: opt_from_millis(row.get("resolved_at")),
        })
    }
}

#[async_trait]
impl ApprovalStore for SqliteApprovalStore {
    async fn insert(&self, approval: &Approval) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO approvals (
                id, task_id, created_by, approver_id, decision, reason, created_at, resolved_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&approval.id)
        .bind(&approval.task_id)
        .bind(&approval.created_by)
        .bind(&approval.approver_id)
        .bind(approval.decision.as_str())
        .bind(&approval.reason)
        .bind(to_millis(approval.created_at))
        .bind(opt_to_millis(approval.resolved_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, approval: &Approval) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE approvals SET decision = ?, reason = ?, resolved_at = ? WHERE id = ?",
        )
        .bind(approval.decision.as_str())
        .bind(&approval.reason)
        .bind(opt_to_millis(approval.resolved_at))
        .bind(&approval.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::ApprovalNotFound(approval.id.clone()));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<Approval>> {
        let row = sqlx::query("SELECT * FROM approvals WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::row_to_approval(&r)).transpose()
    }

    async fn list_pending_for(&self, approver_id: &str) -> DomainResult<Vec<Approval>> {
        let rows = sqlx::query(
            "SELECT * FROM approvals WHERE approver_id = ? AND decision = 'pending'
             ORDER BY created_at ASC",
        )
        .bind(approver_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_approval).collect()
    }

    async fn list_pending(&self) -> DomainResult<Vec<Approval>> {
        let rows = sqlx::query(
            "SELECT * FROM approvals WHERE decision = 'pending' ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_approval).collect()
    }
}

// ============================================================================
// Votes
// ============================================================================

pub struct SqliteVoteStore {
    pool: SqlitePool,
}

impl SqliteVoteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_topic(row: &sqlx::sqlite::SqliteRow) -> DomainResult<VoteTopic> {
        let type_raw: String = row.get("vote_type");
        let status_raw: String = row.get("status");
        Ok(VoteTopic {
            id: row.get("id"),
            session_id: row.get("session_id"),
            subject: row.get("subject"),
            vote_type: VoteType::from_str(&type_raw).ok_or_else(|| {
                DomainError::StoreFailure(format!("bad vote type: {type_raw}"))
            })?,
            required_roles: decode_list(&row.get::<String, _>("required_roles")),
            timeout_at: from_millis(row.get("timeout_at")),
            status: match status_raw.as_str() {
                "pending" => TopicStatus::Pending,
                "completed" => TopicStatus::Completed,
                "timeout" => TopicStatus::Timeout,
                other => {
                    return Err(DomainError::StoreFailure(format!(
                        "bad topic status: {other}"
                    )))
                }
            },
            outcome: row
                .get::<Option<String>, _>("outcome")
                .as_deref()
                .and_then(ApprovalDecision::from_str),
            created_at: from_millis(row.get("created_at")),
        })
    }

    fn topic_status_str(status: TopicStatus) -> &'static str {
        match status {
            TopicStatus::Pending => "pending",
            TopicStatus::Completed => "completed",
            TopicStatus::Timeout => "timeout",
        }
    }
}

#[async_trait]
impl VoteStore for SqliteVoteStore {
    async fn insert_topic(&self, topic: &VoteTopic) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO vote_topics (
                id, session_id, subject, vote_type, required_roles, timeout_at,
                status, outcome, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&topic.id)
        .bind(&topic.session_id)
        .bind(&topic.subject)
        .bind(topic.vote_type.as_str())
        .bind(encode_list(&topic.required_roles))
        .bind(to_millis(topic.timeout_at))
        .bind(Self::topic_status_str(topic.status))
        .bind(topic.outcome.map(|o| o.as_str()))
        .bind(to_millis(topic.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_topic(&self, topic: &VoteTopic) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE vote_topics SET status = ?, outcome = ?, timeout_at = ? WHERE id = ?",
        )
        .bind(Self::topic_status_str(topic.status))
        .bind(topic.outcome.map(|o| o.as_str()))
        .bind(to_millis(topic.timeout_at))
        .bind(&topic.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::TopicNotFound(topic.id.clone()));
        }
        Ok(())
    }

    async fn get_topic(&self, id: &str) -> DomainResult<Option<VoteTopic>> {
        let row = sqlx::query("SELECT * FROM vote_topics WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::row_to_topic(&r)).transpose()
    }

    async fn list_topics_by_status(&self, status: TopicStatus) -> DomainResult<Vec<VoteTopic>> {
        let rows = sqlx::query("SELECT * FROM vote_topics WHERE status = ? ORDER BY created_at ASC")
            .bind(Self::topic_status_str(status))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_topic).collect()
    }

    async fn insert_vote(&self, vote: &Vote) -> DomainResult<()> {
        let result = sqlx::query(
            "INSERT INTO votes (topic_id, agent_id, decision, reason, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&vote.topic_id)
        .bind(&vote.agent_id)
        .bind(vote.decision.as_str())
        .bind(&vote.reason)
        .bind(to_millis(vote.created_at))
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                // One ballot per (topic, agent): the PK enforces it.
                let unique = e
                    .as_database_error()
                    .map(|d| matches!(d.kind(), sqlx::error::ErrorKind::UniqueViolation))
                    .unwrap_or(false);
                if unique {
                    Err(DomainError::DuplicateVote {
                        topic: vote.topic_id.clone(),
                        agent: vote.agent_id.clone(),
                    })
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn list_votes(&self, topic_id: &str) -> DomainResult<Vec<Vote>> {
        let rows = sqlx::query("SELECT * FROM votes WHERE topic_id = ? ORDER BY created_at ASC")
            .bind(topic_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let decision_raw: String = row.get("decision");
                Ok(Vote {
                    topic_id: row.get("topic_id"),
                    agent_id: row.get("agent_id"),
                    decision: BallotDecision::from_str(&decision_raw).ok_or_else(|| {
                        DomainError::StoreFailure(format!("bad ballot: {decision_raw}"))
                    })?,
                    reason: row.get("reason"),
                    created_at: from_millis(row.get("created_at")),
                })
            })
            .collect()
    }
}

// ============================================================================
// Proofs
// ============================================================================

pub struct SqliteProofStore {
    pool: SqlitePool,
}

impl SqliteProofStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_proof(row: &sqlx::sqlite::SqliteRow) -> DomainResult<WorkflowProof> {
        let type_raw: String = row.get("proof_type");
        let attestation_raw: String = row.get("attestation_status");
        Ok(WorkflowProof {
            id: row.get("id"),
            workflow_instance_id: row.get("workflow_instance_id"),
            phase_id: row.get("phase_id"),
            proof_type: ProofType::from_str(&type_raw).ok_or_else(|| {
                DomainError::StoreFailure(format!("bad proof type: {type_raw}"))
            })?,
            task_id: row.get("task_id"),
            evidence_uri: row.get("evidence_uri"),
            hash: row.get("hash"),
            acknowledgers: decode_list(&row.get::<String, _>("acknowledgers")),
            attestation_status: match attestation_raw.as_str() {
                "pending" => AttestationStatus::Pending,
                "approved" => AttestationStatus::Approved,
                "rejected" => AttestationStatus::Rejected,
                other => {
                    return Err(DomainError::StoreFailure(format!(
                        "bad attestation status: {other}"
                    )))
                }
            },
            created_at: from_millis(row.get("created_at")),
        })
    }
}

#[async_trait]
impl ProofStore for SqliteProofStore {
    async fn upsert(&self, proof: &WorkflowProof) -> DomainResult<()> {
        let attestation = match proof.attestation_status {
            AttestationStatus::Pending => "pending",
            AttestationStatus::Approved => "approved",
            AttestationStatus::Rejected => "rejected",
        };
        sqlx::query(
            "INSERT INTO proofs (
                id, workflow_instance_id, phase_id, proof_type, task_id, evidence_uri,
                hash, acknowledgers, attestation_status, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                evidence_uri = excluded.evidence_uri,
                hash = excluded.hash,
                acknowledgers = excluded.acknowledgers,
                attestation_status = excluded.attestation_status",
        )
        .bind(&proof.id)
        .bind(&proof.workflow_instance_id)
        .bind(&proof.phase_id)
        .bind(proof.proof_type.as_str())
        .bind(&proof.task_id)
        .bind(&proof.evidence_uri)
        .bind(&proof.hash)
        .bind(encode_list(&proof.acknowledgers))
        .bind(attestation)
        .bind(to_millis(proof.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> DomainResult<Option<WorkflowProof>> {
        let row = sqlx::query("SELECT * FROM proofs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::row_to_proof(&r)).transpose()
    }

    async fn list_by_instance(&self, instance_id: &str) -> DomainResult<Vec<WorkflowProof>> {
        let rows = sqlx::query(
            "SELECT * FROM proofs WHERE workflow_instance_id = ? ORDER BY created_at ASC",
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_proof).collect()
    }
}
