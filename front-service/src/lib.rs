//! Front service: HTTP ingress for chat submissions and the SSE egress
//! streaming generated tokens back to clients.

pub mod config;
pub mod handlers;
pub mod users;

use axum::http::{HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{extract::State, Json, Router};
use chat_core::bus::MessageBus;
use chat_core::cache::ConversationCache;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::FrontConfig;
use crate::users::UserDirectory;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<FrontConfig>,
    pub bus: Arc<dyn MessageBus>,
    pub cache: Arc<dyn ConversationCache>,
    pub users: Arc<dyn UserDirectory>,
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.cache.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "front-service",
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "service": "front-service",
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

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/health", get(health_check))
        .route("/session/start", post(handlers::session::start_session))
        .route("/chat", post(handlers::chat::submit_chat))
        .route(
            "/stream/:session_id/:chat_message_id",
            get(handlers::stream::stream_tokens),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
