//! `GET /v1/agents`, `GET /v1/models` — registry introspection.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use corvus_core::agents::AgentEntry;

use crate::state::AppState;

pub async fn list_agents(State(state): State<Arc<AppState>>) -> Json<Vec<AgentEntry>> {
    Json(state.registry.list())
}

#[derive(Serialize)]
struct ModelEntry {
    id: String,
    object: &'static str,
    owned_by: String,
}

#[derive(Serialize)]
struct ModelsResponse {
    object: &'static str,
    data: Vec<ModelEntry>,
}

/// OpenAI-shaped `/v1/models` listing, one entry per enabled agent's model.
pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    let data = state
        .registry
        .list()
        .into_iter()
        .filter(|a| a.enabled)
        .map(|a| ModelEntry {
            id: a.model,
            object: "model",
            owned_by: a.name,
        })
        .collect();
    Json(ModelsResponse { object: "list", data })
}
