use axum::extract::{Path, State};
use axum::Json;
use chat_core::error::AppError;
use chat_core::models::UserProfile;
use chat_core::store::MemoryStore;
use serde::Serialize;

use crate::AppState;

pub async fn get_user_memories(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserProfile>, AppError> {
    let profile = state
        .store
        .get_profile(&user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("No user memories found")))?;

    tracing::info!(user_id = %user_id, "Fetched user memories");
    Ok(Json(profile))
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub status: String,
    pub message: String,
}

/// Delete the user's profile. Conversation summaries stay: history is
/// user-visible and removed through the history APIs separately.
pub async fn delete_user_memories(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let deleted = state.store.delete_profile(&user_id).await?;
    if !deleted {
        return Err(AppError::NotFound(anyhow::anyhow!("No user memories found")));
    }

    tracing::info!(user_id = %user_id, "Deleted user memories");
    Ok(Json(DeleteResponse {
        status: "success".to_string(),
        message: format!("User memories deleted for user {}", user_id),
    }))
}
