use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use chat_core::bus::MessageBus;
use chat_core::cache::ConversationCache;
use chat_core::error::AppError;
use chat_core::models::{TokenFragment, TokenPayload};
use futures::stream::Stream;
use futures::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::AppState;

pub const END_SENTINEL: &str = "__END__";

fn token_event(token: &str) -> Event {
    Event::default().data(json!({ "token": token }).to_string())
}

fn end_event() -> Event {
    Event::default().data(END_SENTINEL)
}

fn error_event(message: &str) -> Event {
    Event::default().event("error").data(message.to_string())
}

/// SSE egress: forward token fragments for one `(sessionId, chatMessageId)`.
///
/// If the turn already finished and sits in the hot cache, the stored
/// assistant message is replayed directly; the session stream's replay
/// buffer covers the remaining connect-after-complete window.
pub async fn stream_tokens(
    State(state): State<AppState>,
    Path((session_id, chat_message_id)): Path<(String, String)>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(64);

    let cached = state.cache.get(&session_id).await?;
    let finished_content =
        cached.and_then(|c| c.assistant_content(&chat_message_id).map(|s| s.to_string()));

    if let Some(content) = finished_content {
        tracing::debug!(
            session_id = %session_id,
            chat_message_id = %chat_message_id,
            "Turn already completed, replaying stored assistant message"
        );
        let _ = tx.send(Ok(token_event(&content))).await;
        let _ = tx.send(Ok(end_event())).await;
        return Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()));
    }

    let mut fragments = state
        .bus
        .open_session(&state.config.token_streams_topic, &session_id)
        .await?;
    let idle_timeout = Duration::from_secs(state.config.stream_idle_timeout_secs);

    tracing::debug!(
        session_id = %session_id,
        chat_message_id = %chat_message_id,
        "SSE stream opened"
    );

    tokio::spawn(async move {
        loop {
            let next = tokio::time::timeout(idle_timeout, fragments.next()).await;
            let message = match next {
                Err(_) => {
                    tracing::warn!(
                        session_id = %session_id,
                        chat_message_id = %chat_message_id,
                        "SSE stream idle ceiling reached"
                    );
                    let _ = tx.send(Ok(error_event("stream timed out"))).await;
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    tracing::error!(error = %e, session_id = %session_id, "Session receiver failed");
                    let _ = tx.send(Ok(error_event("stream unavailable"))).await;
                    break;
                }
                Ok(Some(Ok(message))) => message,
            };

            let fragment: TokenFragment = match serde_json::from_str(&message.body) {
                Ok(fragment) => fragment,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed token fragment");
                    continue;
                }
            };

            // One SSE stream per chatMessageId: fragments belonging to other
            // streams on the same session are skipped.
            if fragment.chat_message_id != chat_message_id {
                continue;
            }

            match fragment.payload {
                TokenPayload::Token { token } => {
                    if tx.send(Ok(token_event(&token))).await.is_err() {
                        // Client went away; drop the session receiver.
                        break;
                    }
                }
                TokenPayload::End { .. } => {
                    let _ = tx.send(Ok(end_event())).await;
                    break;
                }
                TokenPayload::Error { error } => {
                    let _ = tx.send(Ok(error_event(&error))).await;
                    break;
                }
            }
        }

        tracing::debug!(
            session_id = %session_id,
            chat_message_id = %chat_message_id,
            "SSE stream closed"
        );
    });

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}
