//! Scripted provider implementations for testing.

use super::{
    ChatMessage, ChatProvider, ChatStream, ChatStreamEvent, CompletionParams, EmbeddingsProvider,
    FinishReason, LlmError, ToolDefinition,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// One scripted streaming response.
#[derive(Debug, Clone)]
pub struct MockTurn {
    pub deltas: Vec<String>,
    pub tool_call: Option<(String, serde_json::Value)>,
}

impl MockTurn {
    pub fn text(parts: &[&str]) -> Self {
        Self {
            deltas: parts.iter().map(|s| s.to_string()).collect(),
            tool_call: None,
        }
    }

    pub fn tool_call(name: &str, arguments: serde_json::Value) -> Self {
        Self {
            deltas: Vec::new(),
            tool_call: Some((name.to_string(), arguments)),
        }
    }
}

/// Chat provider driven by a queue of scripted turns.
///
/// With no scripted turn queued it echoes the last user message back as a
/// handful of deltas, which keeps multi-session tests deterministic without
/// scripting every session.
pub struct MockChatProvider {
    turns: Mutex<VecDeque<MockTurn>>,
    completions: Mutex<VecDeque<String>>,
    failures_remaining: AtomicU32,
    completion_failures_remaining: AtomicU32,
    stream_requests: Mutex<Vec<Vec<ChatMessage>>>,
    completion_requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl Default for MockChatProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChatProvider {
    pub fn new() -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            completions: Mutex::new(VecDeque::new()),
            failures_remaining: AtomicU32::new(0),
            completion_failures_remaining: AtomicU32::new(0),
            stream_requests: Mutex::new(Vec::new()),
            completion_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_turn(&self, turn: MockTurn) {
        self.turns.lock().unwrap().push_back(turn);
    }

    pub fn push_completion(&self, content: &str) {
        self.completions.lock().unwrap().push_back(content.to_string());
    }

    /// Make the next `count` streaming calls fail with a network error.
    pub fn fail_next_streams(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` non-streaming completions fail.
    pub fn fail_next_completions(&self, count: u32) {
        self.completion_failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Messages of every streaming request seen so far.
    pub fn stream_requests(&self) -> Vec<Vec<ChatMessage>> {
        self.stream_requests.lock().unwrap().clone()
    }

    pub fn completion_requests(&self) -> Vec<Vec<ChatMessage>> {
        self.completion_requests.lock().unwrap().clone()
    }

    fn echo_turn(messages: &[ChatMessage]) -> MockTurn {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let mut deltas = vec!["Echo:".to_string()];
        for word in last_user.split_whitespace() {
            deltas.push(format!(" {}", word));
        }
        MockTurn {
            deltas,
            tool_call: None,
        }
    }
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> Result<ChatStream, LlmError> {
        self.stream_requests.lock().unwrap().push(messages.to_vec());

        let failures = self.failures_remaining.load(Ordering::SeqCst);
        if failures > 0 {
            self.failures_remaining.store(failures - 1, Ordering::SeqCst);
            return Err(LlmError::Network("simulated connection reset".to_string()));
        }

        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Self::echo_turn(messages));

        let mut events: Vec<Result<ChatStreamEvent, LlmError>> = Vec::new();
        if let Some((name, arguments)) = turn.tool_call {
            // Split the arguments so the accumulator path is exercised.
            let raw = arguments.to_string();
            let midpoint = raw.len() / 2;
            events.push(Ok(ChatStreamEvent::ToolCallDelta {
                index: 0,
                id: Some("call_1".to_string()),
                name: Some(name),
                arguments: raw[..midpoint].to_string(),
            }));
            events.push(Ok(ChatStreamEvent::ToolCallDelta {
                index: 0,
                id: None,
                name: None,
                arguments: raw[midpoint..].to_string(),
            }));
            events.push(Ok(ChatStreamEvent::Done {
                finish_reason: FinishReason::ToolCalls,
            }));
        } else {
            for delta in turn.deltas {
                events.push(Ok(ChatStreamEvent::Delta(delta)));
            }
            events.push(Ok(ChatStreamEvent::Done {
                finish_reason: FinishReason::Stop,
            }));
        }

        Ok(Box::pin(tokio_stream::iter(events)) as ChatStream)
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _params: &CompletionParams,
    ) -> Result<String, LlmError> {
        self.completion_requests.lock().unwrap().push(messages.to_vec());

        let failures = self.completion_failures_remaining.load(Ordering::SeqCst);
        if failures > 0 {
            self.completion_failures_remaining
                .store(failures - 1, Ordering::SeqCst);
            return Err(LlmError::Network("simulated connection reset".to_string()));
        }

        Ok(self
            .completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "Mock response".to_string()))
    }
}

/// Deterministic embeddings: a byte-histogram vector, L2-normalised, so the
/// same text always embeds identically and similar texts score close.
pub struct MockEmbeddings;

const MOCK_DIMENSIONS: usize = 16;

#[async_trait]
impl EmbeddingsProvider for MockEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let mut vector = vec![0.0f32; MOCK_DIMENSIONS];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % MOCK_DIMENSIONS] += byte as f32 / 255.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn scripted_turn_streams_deltas_then_done() {
        let provider = MockChatProvider::new();
        provider.push_turn(MockTurn::text(&["Hello", " world"]));

        let mut stream = provider
            .chat_stream(&[ChatMessage::user("hi")], &[])
            .await
            .unwrap();

        let mut deltas = Vec::new();
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                ChatStreamEvent::Delta(text) => deltas.push(text),
                ChatStreamEvent::Done { finish_reason } => {
                    assert_eq!(finish_reason, FinishReason::Stop)
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert_eq!(deltas.join(""), "Hello world");
    }

    #[tokio::test]
    async fn echo_mode_reflects_the_user_message() {
        let provider = MockChatProvider::new();
        let mut stream = provider
            .chat_stream(&[ChatMessage::user("one two")], &[])
            .await
            .unwrap();

        let mut text = String::new();
        while let Some(event) = stream.next().await {
            if let ChatStreamEvent::Delta(delta) = event.unwrap() {
                text.push_str(&delta);
            }
        }
        assert_eq!(text, "Echo: one two");
    }

    #[tokio::test]
    async fn failures_are_consumed_before_success() {
        let provider = MockChatProvider::new();
        provider.fail_next_streams(1);

        assert!(provider
            .chat_stream(&[ChatMessage::user("hi")], &[])
            .await
            .is_err());
        assert!(provider
            .chat_stream(&[ChatMessage::user("hi")], &[])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn embeddings_are_deterministic() {
        let embeddings = MockEmbeddings;
        let a = embeddings.embed("vacation plans").await.unwrap();
        let b = embeddings.embed("vacation plans").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), MOCK_DIMENSIONS);
    }
}
