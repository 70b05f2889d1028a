//! LLM provider abstractions.
//!
//! [`ChatProvider`] covers streaming generation with tool-call deltas and
//! non-streaming completion (optionally with a JSON-schema response format);
//! [`EmbeddingsProvider`] covers text embeddings. [`openai::OpenAiProvider`]
//! talks to an OpenAI-compatible endpoint; [`mock`] holds scripted
//! implementations for tests.

pub mod mock;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::Stream;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl LlmError {
    /// Transient failures worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited | LlmError::Network(_) => true,
            LlmError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub const ROLE_TOOL: &str = "tool";

/// A message in an LLM request, OpenAI wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn plain(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: &str) -> Self {
        Self::plain(crate::models::conversation::ROLE_SYSTEM, content)
    }

    pub fn user(content: &str) -> Self {
        Self::plain(crate::models::conversation::ROLE_USER, content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::plain(crate::models::conversation::ROLE_ASSISTANT, content)
    }

    /// Assistant message carrying the tool calls the model requested.
    pub fn assistant_tool_calls(calls: &[ToolCall]) -> Self {
        Self {
            role: crate::models::conversation::ROLE_ASSISTANT.to_string(),
            content: String::new(),
            tool_calls: Some(calls.iter().map(ToolCallSpec::from).collect()),
            tool_call_id: None,
        }
    }

    /// Tool result fed back to the model.
    pub fn tool_result(tool_call_id: &str, content: &str) -> Self {
        Self {
            role: ROLE_TOOL.to_string(),
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.to_string()),
        }
    }
}

/// A fully assembled tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

impl From<&ToolCall> for ToolCallSpec {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

/// A function tool registered with the chat completion request.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

/// Events yielded by a streaming chat completion.
#[derive(Debug, Clone)]
pub enum ChatStreamEvent {
    /// A text delta.
    Delta(String),
    /// A tool-call fragment; arguments arrive across several events.
    ToolCallDelta {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    /// The provider finished this completion.
    Done { finish_reason: FinishReason },
}

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatStreamEvent, LlmError>> + Send>>;

/// JSON-schema response format for structured completions.
#[derive(Debug, Clone)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct CompletionParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub response_schema: Option<ResponseSchema>,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Streaming chat completion with tool support.
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatStream, LlmError>;

    /// Non-streaming completion returning the assistant text.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<String, LlmError>;
}

#[async_trait]
pub trait EmbeddingsProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

/// Reassembles complete [`ToolCall`]s from streamed fragments.
///
/// Fragments are keyed by choice index; the ID and name arrive on the first
/// fragment, argument text accumulates across the rest.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    partial: Vec<PartialCall>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, index: u32, id: Option<String>, name: Option<String>, arguments: &str) {
        let index = index as usize;
        if self.partial.len() <= index {
            self.partial.resize_with(index + 1, PartialCall::default);
        }
        let slot = &mut self.partial[index];
        if let Some(id) = id {
            slot.id = Some(id);
        }
        if let Some(name) = name {
            slot.name = Some(name);
        }
        slot.arguments.push_str(arguments);
    }

    /// Finished calls; fragments that never received a name are dropped.
    pub fn finish(self) -> Vec<ToolCall> {
        self.partial
            .into_iter()
            .filter_map(|partial| {
                let name = partial.name?;
                Some(ToolCall {
                    id: partial.id.unwrap_or_default(),
                    name,
                    arguments: partial.arguments,
                })
            })
            .collect()
    }
}
