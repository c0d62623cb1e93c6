//! Thinking-log audit model.
//!
//! Agents record their reasoning trail (start, tool calls, LLM output,
//! errors) as thinking steps so task execution stays auditable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of step in a task's thinking log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingStepType {
    Start,
    LlmResponse,
    ToolCall,
    ToolResult,
    Error,
}

impl ThinkingStepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::LlmResponse => "llm_response",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::Error => "error",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "start" => Some(Self::Start),
            "llm_response" => Some(Self::LlmResponse),
            "tool_call" => Some(Self::ToolCall),
            "tool_result" => Some(Self::ToolResult),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One entry in the thinking log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingStep {
    pub id: String,
    pub task_id: String,
    pub agent_id: String,
    pub step_type: ThinkingStepType,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ThinkingStep {
    pub fn new(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        step_type: ThinkingStepType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("think-{}", Uuid::new_v4()),
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            step_type,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}
