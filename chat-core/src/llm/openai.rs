//! OpenAI-compatible chat completion and embeddings client.
//!
//! Works against any endpoint speaking the `/chat/completions` and
//! `/embeddings` wire protocol. Streaming responses are parsed from the SSE
//! body chunk by chunk and surfaced as [`ChatStreamEvent`]s.

use super::{
    ChatMessage, ChatProvider, ChatStream, ChatStreamEvent, CompletionParams, EmbeddingsProvider,
    FinishReason, LlmError, ToolDefinition,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub endpoint: String,
    pub api_key: String,
    pub chat_model: String,
    pub embeddings_model: String,
}

pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Self {
        // No overall request timeout: generation liveness is governed by the
        // provider-side stream, not a wall clock.
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(self.url(path));
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }
        builder
    }

    fn build_body(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        params: &CompletionParams,
        stream: bool,
    ) -> serde_json::Value {
        let mut body = json!({
            "model": self.config.chat_model,
            "messages": messages,
        });

        if stream {
            body["stream"] = json!(true);
        }
        if !tools.is_empty() {
            let tools: Vec<serde_json::Value> = tools
                .iter()
                .map(|tool| json!({ "type": "function", "function": tool }))
                .collect();
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }
        if let Some(temperature) = params.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = params.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(schema) = &params.response_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                    "strict": true,
                },
            });
        }

        body
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status.as_u16() == 429 {
        return Err(LlmError::RateLimited);
    }
    let message = response.text().await.unwrap_or_default();
    Err(LlmError::Api {
        status: status.as_u16(),
        message,
    })
}

fn parse_finish_reason(raw: &str) -> FinishReason {
    match raw {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatStream, LlmError> {
        let body = self.build_body(messages, tools, &CompletionParams::default(), true);

        tracing::debug!(
            model = %self.config.chat_model,
            message_count = messages.len(),
            tool_count = tools.len(),
            "Starting streaming chat completion"
        );

        let response = self
            .request("chat/completions")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;
        let response = check_status(response).await?;

        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut finish_reason = FinishReason::Stop;
            let mut done_sent = false;

            while let Some(chunk_result) = stream.next().await {
                let chunk = match chunk_result {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(LlmError::Network(e.to_string()))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(event_end) = buffer.find("\n\n") {
                    let event = buffer[..event_end].to_string();
                    buffer = buffer[event_end + 2..].to_string();

                    for line in event.lines() {
                        let Some(data) = line.strip_prefix("data: ") else {
                            continue;
                        };
                        if data.trim() == "[DONE]" {
                            let _ = tx
                                .send(Ok(ChatStreamEvent::Done { finish_reason }))
                                .await;
                            done_sent = true;
                            continue;
                        }
                        let Ok(parsed) = serde_json::from_str::<ChatChunk>(data) else {
                            continue;
                        };
                        let Some(choice) = parsed.choices.first() else {
                            continue;
                        };

                        if let Some(content) = &choice.delta.content {
                            if !content.is_empty()
                                && tx
                                    .send(Ok(ChatStreamEvent::Delta(content.clone())))
                                    .await
                                    .is_err()
                            {
                                return;
                            }
                        }
                        if let Some(tool_calls) = &choice.delta.tool_calls {
                            for tool_call in tool_calls {
                                let event = ChatStreamEvent::ToolCallDelta {
                                    index: tool_call.index.unwrap_or(0),
                                    id: tool_call.id.clone(),
                                    name: tool_call
                                        .function
                                        .as_ref()
                                        .and_then(|f| f.name.clone()),
                                    arguments: tool_call
                                        .function
                                        .as_ref()
                                        .and_then(|f| f.arguments.clone())
                                        .unwrap_or_default(),
                                };
                                if tx.send(Ok(event)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        if let Some(reason) = &choice.finish_reason {
                            finish_reason = parse_finish_reason(reason);
                        }
                    }
                }
            }

            if !done_sent {
                let _ = tx.send(Ok(ChatStreamEvent::Done { finish_reason })).await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)) as ChatStream)
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<String, LlmError> {
        let body = self.build_body(messages, &[], params, false);

        let response = self
            .request("chat/completions")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;
        let response = check_status(response).await?;

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Malformed("completion carried no content".to_string()))
    }
}

#[async_trait]
impl EmbeddingsProvider for OpenAiProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let body = json!({
            "model": self.config.embeddings_model,
            "input": [text],
        });

        let response = self
            .request("embeddings")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;
        let response = check_status(response).await?;

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .ok_or_else(|| LlmError::Malformed("embeddings response was empty".to_string()))
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}
