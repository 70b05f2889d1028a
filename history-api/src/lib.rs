//! History API: read-only HTTP surface over persisted conversations.

pub mod config;
pub mod handlers;

use axum::http::{HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{extract::State, Json, Router};
use chat_core::store::HistoryStore;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn HistoryStore>,
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "history-api",
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "service": "history-api",
                "error": e.to_string()
            })),
        ),
    }
}

fn cors_layer(origins: &str) -> CorsLayer {
    if origins.trim() == "*" {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let list: Vec<HeaderValue> = origins
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(list))
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn build_router(state: AppState, cors_origins: &str) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/users/:user_id/conversations",
            get(handlers::conversations::list_conversations),
        )
        .route(
            "/users/:user_id/conversations/:session_id/messages",
            get(handlers::conversations::get_messages),
        )
        .route(
            "/users/:user_id/conversations/:session_id/title",
            put(handlers::conversations::update_title),
        )
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
