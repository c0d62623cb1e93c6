//! LLM and tool invocation ports.
//!
//! The chat surface is deliberately narrow: a message list in, a response
//! with optional tool calls out, plus a lazy stream of chunks for
//! incremental consumers. Backends are tagged variants (see
//! `infrastructure::llm::LlmClient`), not a trait-object hierarchy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on `Tool` messages: the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    /// Rough token estimate (4 bytes per token heuristic), used by the
    /// executor's context-budget trimming.
    pub fn estimated_tokens(&self) -> usize {
        self.content.len() / 4 + 4
    }
}

/// Declaration of a tool available to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// A chat completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Per-request deadline in seconds.
    pub deadline_secs: u64,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            tools: Vec::new(),
            max_tokens: Some(4096),
            temperature: Some(0.7),
            deadline_secs: 30,
        }
    }
}

/// Why a completion stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    Cancelled,
}

/// Token usage accounting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A chat completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub usage: TokenUsage,
}

/// One element of a streaming response.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// Incremental content delta.
    Delta(String),
    /// Stream finished; carries the aggregated response.
    Done(ChatResponse),
    /// Stream failed.
    Error(String),
}

/// Which operations a backend supports.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub chat: bool,
    pub stream: bool,
}

/// Tool invocation port. MCP and editor tooling live behind this seam.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Tools this runner exposes.
    fn specs(&self) -> Vec<ToolSpec>;

    /// Invoke a tool by name.
    async fn run(&self, name: &str, arguments: &serde_json::Value)
        -> DomainResult<serde_json::Value>;
}

/// A runner exposing no tools; the executor degrades to plain chat.
pub struct NullToolRunner;

#[async_trait]
impl ToolRunner for NullToolRunner {
    fn specs(&self) -> Vec<ToolSpec> {
        Vec::new()
    }

    async fn run(
        &self,
        name: &str,
        _arguments: &serde_json::Value,
    ) -> DomainResult<serde_json::Value> {
        Err(crate::domain::errors::DomainError::ToolFailure {
            tool: name.to_string(),
            message: "no tools registered".into(),
        })
    }
}
