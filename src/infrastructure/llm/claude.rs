//! Claude API client (messages endpoint, SSE streaming).

use std::time::Duration;

use backoff::ExponentialBackoff;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{is_transient_status, llm_error};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::llm::{
    ChatMessage, ChatRequest, ChatResponse, ChatRole, StopReason, StreamChunk, TokenUsage,
    ToolCall,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Client for the Anthropic messages API.
pub struct ClaudeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ClaudeClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub async fn chat(&self, request: &ChatRequest) -> DomainResult<ChatResponse> {
        let payload = self.build_payload(request, false);
        let url = format!("{}/v1/messages", self.base_url);
        let deadline = Duration::from_secs(request.deadline_secs);

        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(deadline),
            ..ExponentialBackoff::default()
        };
        let body = backoff::future::retry(backoff, || async {
            let response = self
                .http
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .timeout(deadline)
                .json(&payload)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(llm_error("claude request", e)))?;

            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .map_err(|e| backoff::Error::transient(llm_error("claude body", e)))?;
            if status >= 400 {
                let err = DomainError::LlmFailure(format!("claude status {status}: {text}"));
                if is_transient_status(status) {
                    warn!(status, "Transient Claude API error; retrying");
                    return Err(backoff::Error::transient(err));
                }
                return Err(backoff::Error::permanent(err));
            }
            Ok(text)
        })
        .await?;

        let value: Value =
            serde_json::from_str(&body).map_err(|e| llm_error("claude response parse", e))?;
        Ok(parse_message(&value))
    }

    /// Stream a completion. Tool-use deltas are not aggregated; the agent
    /// runtime uses buffered `chat` for tool loops.
    pub async fn stream_chat(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> DomainResult<mpsc::Receiver<StreamChunk>> {
        let payload = self.build_payload(request, true);
        let url = format!("{}/v1/messages", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(Duration::from_secs(request.deadline_secs))
            .json(&payload)
            .send()
            .await
            .map_err(|e| llm_error("claude stream request", e))?;

        if response.status().as_u16() >= 400 {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(DomainError::LlmFailure(format!(
                "claude stream status {status}: {text}"
            )));
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();
            let mut content = String::new();
            let mut stop_reason = StopReason::EndTurn;
            let mut usage = TokenUsage::default();

            loop {
                let chunk = tokio::select! {
                    chunk = bytes.next() => chunk,
                    () = cancel.cancelled() => {
                        let _ = tx.send(StreamChunk::Error("stream cancelled".into())).await;
                        return;
                    }
                };
                let Some(chunk) = chunk else { break };
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(StreamChunk::Error(e.to_string())).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // SSE events are separated by blank lines.
                while let Some(boundary) = buffer.find("\n\n") {
                    let event: String = buffer.drain(..boundary + 2).collect();
                    for line in event.lines() {
                        let Some(data) = line.strip_prefix("data: ") else {
                            continue;
                        };
                        let Ok(value) = serde_json::from_str::<Value>(data) else {
                            continue;
                        };
                        match value.get("type").and_then(Value::as_str) {
                            Some("content_block_delta") => {
                                if let Some(delta) =
                                    value.pointer("/delta/text").and_then(Value::as_str)
                                {
                                    content.push_str(delta);
                                    if tx
                                        .send(StreamChunk::Delta(delta.to_string()))
                                        .await
                                        .is_err()
                                    {
                                        return;
                                    }
                                }
                            }
                            Some("message_delta") => {
                                if let Some(reason) =
                                    value.pointer("/delta/stop_reason").and_then(Value::as_str)
                                {
                                    stop_reason = parse_stop_reason(reason);
                                }
                                if let Some(out) =
                                    value.pointer("/usage/output_tokens").and_then(Value::as_u64)
                                {
                                    usage.output_tokens = out;
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }

            debug!(chars = content.len(), "Claude stream finished");
            let _ = tx
                .send(StreamChunk::Done(ChatResponse {
                    content,
                    tool_calls: Vec::new(),
                    stop_reason,
                    usage,
                }))
                .await;
        });
        Ok(rx)
    }

    fn build_payload(&self, request: &ChatRequest, stream: bool) -> Value {
        let system: String = request
            .messages
            .iter()
            .filter(|m| matches!(m.role, ChatRole::System))
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| !matches!(m.role, ChatRole::System))
            .map(to_api_message)
            .collect();

        let mut payload = json!({
            "model": self.model,
            "max_tokens": request.max_tokens.unwrap_or(4096),
            "messages": messages,
            "stream": stream,
        });
        if !system.is_empty() {
            payload["system"] = json!(system);
        }
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }
        if !request.tools.is_empty() {
            payload["tools"] = json!(request
                .tools
                .iter()
                .map(|t| json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                }))
                .collect::<Vec<_>>());
        }
        payload
    }
}

fn to_api_message(message: &ChatMessage) -> Value {
    match message.role {
        ChatRole::Tool => json!({
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": message.tool_call_id,
                "content": message.content,
            }],
        }),
        ChatRole::Assistant if !message.tool_calls.is_empty() => {
            let mut blocks = Vec::new();
            if !message.content.is_empty() {
                blocks.push(json!({ "type": "text", "text": message.content }));
            }
            for call in &message.tool_calls {
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": call.arguments,
                }));
            }
            json!({ "role": "assistant", "content": blocks })
        }
        ChatRole::Assistant => json!({ "role": "assistant", "content": message.content }),
        _ => json!({ "role": "user", "content": message.content }),
    }
}

fn parse_message(value: &Value) -> ChatResponse {
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    if let Some(blocks) = value.get("content").and_then(Value::as_array) {
        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        content.push_str(text);
                    }
                }
                Some("tool_use") => {
                    tool_calls.push(ToolCall {
                        id: block
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        name: block
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        arguments: block.get("input").cloned().unwrap_or(Value::Null),
                    });
                }
                _ => {}
            }
        }
    }
    let stop_reason = value
        .get("stop_reason")
        .and_then(Value::as_str)
        .map(parse_stop_reason)
        .unwrap_or(StopReason::EndTurn);
    let usage = TokenUsage {
        input_tokens: value
            .pointer("/usage/input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        output_tokens: value
            .pointer("/usage/output_tokens")
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

fn parse_stop_reason(reason: &str) -> StopReason {
    match reason {
        "max_tokens" => StopReason::MaxTokens,
        "tool_use" => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}
