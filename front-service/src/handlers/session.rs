use axum::{extract::State, Json};
use chat_core::error::AppError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::users::UserDirectory;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct SessionStartRequest {
    #[serde(rename = "userId")]
    #[validate(length(min = 1, message = "userId must not be empty"))]
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionStartResponse {
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// Start a new chat session for a user. Stateless: the session exists once
/// the first message flows through the pipeline.
pub async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<SessionStartRequest>,
) -> Result<Json<SessionStartResponse>, AppError> {
    request.validate()?;

    if !state.users.is_known(&request.user_id).await {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "Unknown user: {}",
            request.user_id
        )));
    }

    let session_id = Uuid::new_v4().to_string();
    tracing::info!(
        session_id = %session_id,
        user_id = %request.user_id,
        "New session started"
    );

    Ok(Json(SessionStartResponse { session_id }))
}
