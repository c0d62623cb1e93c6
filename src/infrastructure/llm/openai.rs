//! OpenAI-compatible chat completions client.
//!
//! Works against any endpoint implementing `/chat/completions`, which
//! covers self-hosted gateways and local model servers.

use std::time::Duration;

use backoff::ExponentialBackoff;
use serde_json::{json, Value};
use tracing::warn;

use super::{is_transient_status, llm_error};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::llm::{
    ChatMessage, ChatRequest, ChatResponse, ChatRole, StopReason, TokenUsage, ToolCall,
};

pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub async fn chat(&self, request: &ChatRequest) -> DomainResult<ChatResponse> {
        let payload = self.build_payload(request);
        let url = format!("{}/chat/completions", self.base_url);
        let deadline = Duration::from_secs(request.deadline_secs);

        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(deadline),
            ..ExponentialBackoff::default()
        };
        let body = backoff::future::retry(backoff, || async {
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .timeout(deadline)
                .json(&payload)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(llm_error("openai request", e)))?;

            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .map_err(|e| backoff::Error::transient(llm_error("openai body", e)))?;
            if status >= 400 {
                let err = DomainError::LlmFailure(format!("openai status {status}: {text}"));
                if is_transient_status(status) {
                    warn!(status, "Transient OpenAI-compatible API error; retrying");
                    return Err(backoff::Error::transient(err));
                }
                return Err(backoff::Error::permanent(err));
            }
            Ok(text)
        })
        .await?;

        let value: Value =
            serde_json::from_str(&body).map_err(|e| llm_error("openai response parse", e))?;
        Ok(parse_completion(&value))
    }

    fn build_payload(&self, request: &ChatRequest) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(to_api_message).collect();
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(max_tokens) = request.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }
        if !request.tools.is_empty() {
            payload["tools"] = json!(request
                .tools
                .iter()
                .map(|t| json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    },
                }))
                .collect::<Vec<_>>());
        }
        payload
    }
}

fn to_api_message(message: &ChatMessage) -> Value {
    let role = match message.role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    };
    let mut value = json!({ "role": role, "content": message.content });
    if let Some(call_id) = &message.tool_call_id {
        value["tool_call_id"] = json!(call_id);
    }
    if !message.tool_calls.is_empty() {
        value["tool_calls"] = json!(message
            .tool_calls
            .iter()
            .map(|c| json!({
                "id": c.id,
                "type": "function",
                "function": {
                    "name": c.name,
                    "arguments": c.arguments.to_string(),
                },
            }))
            .collect::<Vec<_>>());
    }
    value
}

fn parse_completion(value: &Value) -> ChatResponse {
    let message = value.pointer("/choices/0/message");
    let content = message
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message
        .and_then(|m| m.get("tool_calls"))
        .and_then(Value::as_array)
    {
        for call in calls {
            let arguments = call
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or(Value::Null);
            tool_calls.push(ToolCall {
                id: call
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                name: call
                    .pointer("/function/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                arguments,
            });
        }
    }

    let stop_reason = match value
        .pointer("/choices/0/finish_reason")
        .and_then(Value::as_str)
    {
        Some("length") => StopReason::MaxTokens,
        Some("tool_calls") => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    };
    let usage = TokenUsage {
        input_tokens: value
            .pointer("/usage/prompt_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        output_tokens: value
            .pointer("/usage/completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    };
    ChatResponse {
        content,
        tool_calls,
        stop_reason,
        usage,
    }
}
