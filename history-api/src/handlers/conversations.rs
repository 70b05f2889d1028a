use axum::extract::{Path, State};
use axum::Json;
use chat_core::error::AppError;
use chat_core::models::{ConversationMeta, StoredMessage};
use chat_core::store::HistoryStore;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;

/// Listing cap; conversations beyond it are reachable through their session
/// IDs but not enumerated.
const LIST_LIMIT: i64 = 50;

pub async fn list_conversations(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<ConversationMeta>>, AppError> {
    let conversations = state.store.list_conversations(&user_id, LIST_LIMIT).await?;
    tracing::info!(
        user_id = %user_id,
        count = conversations.len(),
        "Listed conversations"
    );
    Ok(Json(conversations))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetail {
    pub session_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub messages: Vec<StoredMessage>,
}

/// Full transcript. Partition-scoped: a session belonging to another user is
/// indistinguishable from a missing one.
pub async fn get_messages(
    State(state): State<AppState>,
    Path((user_id, session_id)): Path<(String, String)>,
) -> Result<Json<ConversationDetail>, AppError> {
    let conversation = state
        .store
        .get_conversation(&user_id, &session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Conversation not found")))?;

    tracing::info!(
        user_id = %user_id,
        session_id = %session_id,
        message_count = conversation.messages.len(),
        "Fetched conversation transcript"
    );

    Ok(Json(ConversationDetail {
        session_id: conversation.session_id,
        user_id: conversation.user_id,
        title: conversation.title,
        messages: conversation.messages,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTitleRequest {
    #[validate(length(min = 1, max = 200, message = "title must be 1-200 characters"))]
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct UpdateTitleResponse {
    pub success: bool,
    pub message: String,
}

pub async fn update_title(
    State(state): State<AppState>,
    Path((user_id, session_id)): Path<(String, String)>,
    Json(request): Json<UpdateTitleRequest>,
) -> Result<Json<UpdateTitleResponse>, AppError> {
    request.validate()?;

    let updated = state
        .store
        .update_title(&user_id, &session_id, &request.title)
        .await?;
    if !updated {
        return Err(AppError::NotFound(anyhow::anyhow!("Conversation not found")));
    }

    tracing::info!(
        user_id = %user_id,
        session_id = %session_id,
        title = %request.title,
        "Updated conversation title"
    );

    Ok(Json(UpdateTitleResponse {
        success: true,
        message: "Title updated successfully".to_string(),
    }))
}
