//! Blackboard message domain model.
//!
//! Messages are append-only; after creation only metadata enrichment by
//! the message policy plugin (scenario tags) is allowed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of blackboard entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Chat,
    Requirement,
    Status,
    Audit,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Requirement => "requirement",
            Self::Status => "status",
            Self::Audit => "audit",
            Self::System => "system",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "chat" => Some(Self::Chat),
            "requirement" => Some(Self::Requirement),
            "status" => Some(Self::Status),
            "audit" => Some(Self::Audit),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Who can see a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Agents,
    User,
}

impl Default for Visibility {
    fn default() -> Self {
        Self::Public
    }
}

/// An entry on the session blackboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlackboardMessage {
    pub id: String,
    pub session_id: String,
    /// Author; "user" for human input.
    pub agent_id: String,
    pub message_type: MessageType,
    pub content: String,
    pub tags: Vec<String>,
    /// Agent ids mentioned with `@name` in the content.
    pub mentions: Vec<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    /// Untyped payload bag; validated at the consuming edge.
    #[serde(default)]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl BlackboardMessage {
    pub fn new(
        session_id: impl Into<String>,
        agent_id: impl Into<String>,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let mentions = parse_mentions(&content);
        Self {
            id: format!("msg-{}", Uuid::new_v4()),
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            message_type,
            content,
            tags: Vec::new(),
            mentions,
            category: None,
            visibility: Visibility::default(),
            payload: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Whether the author is the human user.
    pub fn is_from_user(&self) -> bool {
        self.agent_id == "user"
    }
}

/// Extract `@agent` mentions from message content.
///
/// A mention is `@` followed by [A-Za-z0-9_-]+; duplicates collapse,
/// order of first occurrence is kept.
pub fn parse_mentions(content: &str) -> Vec<String> {
    let mut mentions = Vec::new();
    let mut chars = content.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        if ch != '@' {
            continue;
        }
        let rest = &content[idx + 1..];
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(rest.len());
        if end > 0 {
            let name = rest[..end].to_string();
            if !mentions.contains(&name) {
                mentions.push(name);
            }
        }
    }
    mentions
}
