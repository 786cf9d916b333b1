//! Route table: every `/v1/*` endpoint plus `/health`.

use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{agents, chat, config, health, sessions, workflows};
use crate::state::AppState;

/// Single-process, CORS-open — no built-in auth. Callers that need auth
/// put this behind a reverse proxy.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/agents", get(agents::list_agents))
        .route("/v1/models", get(agents::list_models))
        .route("/v1/sessions", get(sessions::list_sessions))
        .route("/v1/sessions/:key", get(sessions::get_session))
        .route("/v1/sessions/:key", delete(sessions::delete_session))
        .route("/v1/sessions/:key/new", post(sessions::new_session))
        .route("/v1/sessions/:key/stop", post(sessions::stop_session))
        .route("/v1/workflows", get(workflows::list_workflows))
        .route("/v1/workflows/:name", get(workflows::get_workflow))
        .route("/v1/config", get(config::get_config))
        .route("/v1/config", put(config::put_config))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
