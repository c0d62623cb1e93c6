//! LLM client backends.
//!
//! Backends are tagged variants behind a capability set rather than a
//! trait-object hierarchy: the Claude API, any OpenAI-compatible endpoint,
//! and a scripted mock for tests and offline runs. Chat calls carry a
//! per-request deadline and retry transient failures with exponential
//! backoff; streaming produces a lazy chunk sequence with an explicit
//! cancellation token.

mod claude;
mod openai;

use std::collections::VecDeque;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

pub use claude::ClaudeClient;
pub use openai::OpenAiCompatibleClient;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::llm::{
    Capabilities, ChatRequest, ChatResponse, StopReason, StreamChunk, TokenUsage,
};

/// A configured LLM backend.
pub enum LlmClient {
    Claude(ClaudeClient),
    OpenAiCompatible(OpenAiCompatibleClient),
    Mock(MockLlm),
}

impl LlmClient {
    pub fn capabilities(&self) -> Capabilities {
        match self {
            Self::Claude(_) => Capabilities {
                chat: true,
                stream: true,
            },
            Self::OpenAiCompatible(_) => Capabilities {
                chat: true,
                stream: false,
            },
            Self::Mock(_) => Capabilities {
                chat: true,
                stream: true,
            },
        }
    }

    /// One chat completion round.
    pub async fn chat(&self, request: &ChatRequest) -> DomainResult<ChatResponse> {
        match self {
            Self::Claude(client) => client.chat(request).await,
            Self::OpenAiCompatible(client) => client.chat(request).await,
            Self::Mock(client) => client.chat(request).await,
        }
    }

    /// Stream a completion as `{delta | done | error}` chunks. Dropping the
    /// receiver or cancelling the token stops production. Backends without
    /// stream capability degrade to a single buffered response.
    pub async fn stream_chat(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> DomainResult<mpsc::Receiver<StreamChunk>> {
        match self {
            Self::Claude(client) => client.stream_chat(request, cancel).await,
            Self::OpenAiCompatible(client) => {
                // Buffered fallback: one delta, then done.
                let (tx, rx) = mpsc::channel(8);
                let response = client.chat(request).await?;
                let _ = tx.send(StreamChunk::Delta(response.content.clone())).await;
                let _ = tx.send(StreamChunk::Done(response)).await;
                Ok(rx)
            }
            Self::Mock(client) => client.stream_chat(request, cancel).await,
        }
    }
}

/// Scripted backend for tests and offline runs.
///
/// Responses queue in FIFO order; when the script runs out the mock echoes
/// the last user message.
pub struct MockLlm {
    responses: Mutex<VecDeque<Result<ChatResponse, String>>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue a plain-text response.
    pub async fn push_text(&self, content: impl Into<String>) {
        self.responses.lock().await.push_back(Ok(ChatResponse {
            content: content.into(),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
        }));
    }

    /// Queue a full response (e.g. with tool calls).
    pub async fn push_response(&self, response: ChatResponse) {
        self.responses.lock().await.push_back(Ok(response));
    }

    /// Queue a failure for the next chat call.
    pub async fn push_error(&self, message: impl Into<String>) {
        self.responses.lock().await.push_back(Err(message.into()));
    }

    pub async fn chat(&self, request: &ChatRequest) -> DomainResult<ChatResponse> {
        if let Some(scripted) = self.responses.lock().await.pop_front() {
            return scripted.map_err(DomainError::LlmFailure);
        }
        let echo = request
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, crate::domain::ports::llm::ChatRole::User))
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(ChatResponse {
            content: format!("ack: {echo}"),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
        })
    }

    pub async fn stream_chat(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> DomainResult<mpsc::Receiver<StreamChunk>> {
        let response = self.chat(request).await?;
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for piece in response.content.split_inclusive(' ') {
                if cancel.is_cancelled() {
                    let _ = tx
                        .send(StreamChunk::Error("stream cancelled".into()))
                        .await;
                    return;
                }
                if tx.send(StreamChunk::Delta(piece.to_string())).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(StreamChunk::Done(response)).await;
        });
        Ok(rx)
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify a chat error as retryable.
pub(crate) fn is_transient_status(status: u16) -> bool {
    status == 429 || status >= 500
}

pub(crate) fn llm_error(context: &str, err: impl std::fmt::Display) -> DomainError {
    DomainError::LlmFailure(format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::llm::ChatMessage;

    #[tokio::test]
    async fn mock_scripts_then_echoes() {
        let mock = MockLlm::new();
        mock.push_text("scripted").await;
        let client = LlmClient::Mock(mock);

        let request = ChatRequest::new(vec![ChatMessage::user("hello")]);
        assert_eq!(client.chat(&request).await.unwrap().content, "scripted");
        assert_eq!(client.chat(&request).await.unwrap().content, "ack: hello");
    }

    #[tokio::test]
    async fn mock_stream_aggregates_to_done() {
        let client = LlmClient::Mock(MockLlm::new());
        let request = ChatRequest::new(vec![ChatMessage::user("one two three")]);
        let mut rx = client
            .stream_chat(&request, CancellationToken::new())
            .await
            .unwrap();

        let mut deltas = String::new();
        let mut done = None;
        while let Some(chunk) = rx.recv().await {
            match chunk {
                StreamChunk::Delta(d) => deltas.push_str(&d),
                StreamChunk::Done(response) => done = Some(response),
                StreamChunk::Error(e) => panic!("stream error: {e}"),
            }
        }
        let done = done.expect("done chunk");
        assert_eq!(deltas, done.content);
    }

    #[tokio::test]
    async fn cancelled_stream_reports_error() {
        let client = LlmClient::Mock(MockLlm::new());
        let request = ChatRequest::new(vec![ChatMessage::user("one two three")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut rx = client.stream_chat(&request, cancel).await.unwrap();

        let mut saw_error = false;
        while let Some(chunk) = rx.recv().await {
            if matches!(chunk, StreamChunk::Error(_)) {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }
}
