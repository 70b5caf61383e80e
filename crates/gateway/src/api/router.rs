//! Route table and middleware assembly.

use axum::http::HeaderValue;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors.allowed_origins);

    Router::new()
        .route("/v1/chat", post(api::chat::chat))
        .route("/v1/chat/stream", post(api::chat::chat_stream))
        .route("/v1/sessions", get(api::sessions::list_sessions))
        .route(
            "/v1/sessions/:id/messages",
            get(api::sessions::session_messages),
        )
        .route("/v1/sessions/:id", delete(api::sessions::delete_session))
        .route(
            "/v1/sessions/:id/cancel",
            post(api::sessions::cancel_session),
        )
        .route("/v1/llm-calls", get(api::calls::list_calls))
        .route("/healthz", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}
