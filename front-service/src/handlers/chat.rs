use axum::{extract::State, http::StatusCode, Json};
use chat_core::bus::{BusMessage, TopicPublisher};
use chat_core::error::AppError;
use chat_core::models::UserMessageEnvelope;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::users::UserDirectory;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[validate(length(min = 1, message = "message must not be empty"))]
    pub message: String,
    #[validate(length(min = 1, message = "sessionId must not be empty"))]
    pub session_id: String,
    #[validate(length(min = 1, message = "chatMessageId must not be empty"))]
    pub chat_message_id: String,
    #[validate(length(min = 1, message = "userId must not be empty"))]
    pub user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub success: bool,
    pub chat_message_id: String,
    pub session_id: String,
    pub message: String,
}

/// Accept a chat submission and enqueue it for the generator fleet.
///
/// The envelope is keyed by `chatMessageId` and deliberately carries no bus
/// session: generators compete for work, and per-session ordering is enforced
/// downstream through the hot cache.
pub async fn submit_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<(StatusCode, Json<ChatResponse>), AppError> {
    request.validate()?;

    if !state.users.is_known(&request.user_id).await {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "Unknown user: {}",
            request.user_id
        )));
    }

    tracing::info!(
        session_id = %request.session_id,
        chat_message_id = %request.chat_message_id,
        user_id = %request.user_id,
        message_length = request.message.len(),
        "Received chat message"
    );

    let envelope = UserMessageEnvelope {
        session_id: request.session_id.clone(),
        user_id: request.user_id.clone(),
        chat_message_id: request.chat_message_id.clone(),
        text: request.message.clone(),
        submitted_at: Utc::now(),
    };

    let message = BusMessage::json(&request.chat_message_id, None, &envelope)?;
    state
        .bus
        .publish(&state.config.user_messages_topic, message)
        .await?;

    tracing::info!(
        session_id = %request.session_id,
        chat_message_id = %request.chat_message_id,
        topic = %state.config.user_messages_topic,
        "Message queued for processing"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(ChatResponse {
            success: true,
            chat_message_id: request.chat_message_id,
            session_id: request.session_id,
            message: "Message queued for processing".to_string(),
        }),
    ))
}
