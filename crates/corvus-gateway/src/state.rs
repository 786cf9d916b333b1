//! Shared gateway state and the per-agent `AgentLoop` pool.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use corvus_agent::{AgentLoop, ExecToolConfig};
use corvus_core::agents::AgentRegistry;
use corvus_core::bus::queue::MessageBus;
use corvus_core::config::schema::Config;
use corvus_core::session::SessionManager;
use corvus_providers::http_provider::create_provider;

/// Errors surfaced by gateway handlers as structured HTTP error bodies.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("agent is busy with another request")]
    Busy,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Busy => StatusCode::CONFLICT,
            GatewayError::Provider(_) | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": { "message": self.to_string() } }));
        (status, body).into_response()
    }
}

/// Shared across every handler: bus, config, agent registry, and the
/// lazily-populated per-agent-name `AgentLoop` pool.
pub struct AppState {
    pub bus: Arc<MessageBus>,
    pub config: Config,
    pub workspace: PathBuf,
    pub registry: Arc<AgentRegistry>,
    /// Shared with every pooled `AgentLoop` so `/v1/sessions/*` handlers and
    /// the loops themselves observe the same history and single-flight
    /// cancellation state, regardless of which agent a session belongs to.
    pub sessions: Arc<SessionManager>,
    pools: Mutex<HashMap<String, Arc<AgentLoop>>>,
}

impl AppState {
    pub fn new(
        bus: Arc<MessageBus>,
        config: Config,
        workspace: PathBuf,
        registry: Arc<AgentRegistry>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            bus,
            config,
            workspace,
            registry,
            sessions,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve (building and caching if needed) the `AgentLoop` for the
    /// named registry entry, falling back to `"default"` on a miss.
    pub fn agent_loop(&self, name: &str) -> Result<Arc<AgentLoop>, GatewayError> {
        let entry = self.registry.get_or_default(name);

        {
            let pools = self.pools.lock().unwrap();
            if let Some(existing) = pools.get(&entry.name) {
                return Ok(existing.clone());
            }
        }

        let providers_map = self.config.providers.to_map();
        let provider = create_provider(&entry.model, &providers_map).map_err(GatewayError::Provider)?;

        let brave_key = if self.config.tools.web.search.api_key.is_empty() {
            None
        } else {
            Some(self.config.tools.web.search.api_key.clone())
        };

        let loop_ = Arc::new(AgentLoop::new(
            self.bus.clone(),
            Arc::new(provider),
            self.workspace.clone(),
            Some(entry.model.clone()),
            Some(entry.max_tool_iterations as usize),
            None,
            brave_key,
            Some(ExecToolConfig::default()),
            self.config.tools.restrict_to_workspace,
            Some(self.sessions.clone()),
            Some(entry.name.clone()),
        ));

        self.pools.lock().unwrap().insert(entry.name.clone(), loop_.clone());
        Ok(loop_)
    }
}
