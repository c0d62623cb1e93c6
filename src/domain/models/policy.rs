//! Message routing policies.
//!
//! A `MessagePolicy` matches incoming blackboard messages via a condition
//! set and fires an ordered list of actions (mention interrupts, task
//! creation, notifications, requirement marking). Policies are evaluated
//! by the message policy plugin in descending priority.

use serde::{Deserialize, Serialize};

use super::message::{BlackboardMessage, MessageType};
use super::notification::NotificationLevel;
use super::task::TaskPriority;

/// Conditions that must all hold for a policy to match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConditions {
    /// Message types this policy applies to; empty = any.
    #[serde(default)]
    pub message_types: Vec<MessageType>,
    /// Require the author to be the human user.
    #[serde(default)]
    pub require_user: bool,
    /// Require at least one `@agent` mention.
    #[serde(default)]
    pub require_mentions: bool,
    /// Keywords that must all appear in the content (case-insensitive).
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Tags that must all be present on the message.
    #[serde(default)]
    pub require_tags: Vec<String>,
    /// Tags that must not appear on the message.
    #[serde(default)]
    pub exclude_tags: Vec<String>,
    /// Exact payload priority, when the message carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

impl PolicyConditions {
    /// Evaluate all conditions against a message.
    pub fn matches(&self, message: &BlackboardMessage) -> bool {
        if !self.message_types.is_empty() && !self.message_types.contains(&message.message_type) {
            return false;
        }
        if self.require_user && !message.is_from_user() {
            return false;
        }
        if self.require_mentions && message.mentions.is_empty() {
            return false;
        }
        if !self.keywords.is_empty() {
            let lowered = message.content.to_lowercase();
            if !self
                .keywords
                .iter()
                .all(|kw| lowered.contains(&kw.to_lowercase()))
            {
                return false;
            }
        }
        if !self.require_tags.iter().all(|t| message.has_tag(t)) {
            return false;
        }
        if self.exclude_tags.iter().any(|t| message.has_tag(t)) {
            return false;
        }
        if let Some(ref expected) = self.priority {
            let actual = message
                .payload
                .get("priority")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if actual != expected {
                return false;
            }
        }
        true
    }
}

/// An action executed when a policy matches. Actions run in listed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyAction {
    /// Pause each mentioned agent's active task and hand it a mention task.
    InterruptMentions,
    /// Create a task from the message, deduplicated per (policy, message).
    CreateTask {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority: Option<TaskPriority>,
        /// Create one task per mentioned agent instead of a single task.
        #[serde(default)]
        per_mention: bool,
    },
    /// Emit a notification.
    Notify {
        level: NotificationLevel,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    /// Tag the message as a requirement for workflow bootstrap.
    MarkRequirement,
}

/// Kind of policy; only routers participate in message evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    MessageRouter,
}

/// A routing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePolicy {
    pub id: String,
    pub name: String,
    pub policy_type: PolicyType,
    pub enabled: bool,
    /// Evaluation order: higher first.
    pub priority: i32,
    #[serde(default)]
    pub conditions: PolicyConditions,
    pub actions: Vec<PolicyAction>,
}
