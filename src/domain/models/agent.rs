//! Agent domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Availability status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    Offline,
    Busy,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Busy => "busy",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            "busy" => Some(Self::Busy),
            _ => None,
        }
    }

    /// Whether the agent can accept assignments.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Online | Self::Busy)
    }
}

/// A registered worker, human or LLM-backed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    /// Roles the agent can fill (frontend, backend, qa, doc, human_portal, ...).
    pub roles: Vec<String>,
    pub status: AgentStatus,
    pub is_enabled: bool,
    pub last_heartbeat_at: DateTime<Utc>,
    pub active_task_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// When the status field last changed; assignment tie-break key.
    pub status_updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(id: impl Into<String>, roles: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            roles,
            status: AgentStatus::Offline,
            is_enabled: true,
            last_heartbeat_at: now,
            active_task_id: None,
            created_at: now,
            status_updated_at: now,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Whether the agent is eligible for new assignments.
    pub fn is_assignable(&self) -> bool {
        self.is_enabled && self.status == AgentStatus::Online
    }
}
