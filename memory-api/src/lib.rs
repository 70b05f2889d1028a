//! Memory API: user profile surface and semantic search over conversation
//! summaries. Also called by the generator as its search tool backend.

pub mod config;
pub mod handlers;

use axum::http::{HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{extract::State, Json, Router};
use chat_core::llm::EmbeddingsProvider;
use chat_core::store::MemoryStore;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MemoryStore>,
    pub embeddings: Arc<dyn EmbeddingsProvider>,
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "memory-api",
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "service": "memory-api",
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
            "/users/:user_id/memories",
            get(handlers::memories::get_user_memories)
                .delete(handlers::memories::delete_user_memories),
        )
        .route(
            "/users/:user_id/conversations/search",
            post(handlers::search::search_conversations),
        )
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
