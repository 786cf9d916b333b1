//! `GET/DELETE /v1/sessions*` — session introspection and lifecycle.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use corvus_core::session::manager::SessionSummary;

use crate::state::AppState;

const WEB_PREFIX: &str = "web:";

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionSummary>> {
    Json(state.sessions.list_sessions(Some(WEB_PREFIX)))
}

#[derive(Serialize)]
struct HistoryResponse {
    key: String,
    messages: Vec<corvus_core::types::Message>,
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Json<HistoryResponse> {
    let messages = state.sessions.get_history(&key, usize::MAX);
    Json(HistoryResponse { key, messages })
}

pub async fn new_session(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Json<Value> {
    state.sessions.clear(&key);
    Json(json!({ "key": key, "status": "cleared" }))
}

pub async fn stop_session(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Json<Value> {
    let outcome = state.sessions.stop(&key);
    Json(json!({ "key": key, "status": outcome.as_str() }))
}

pub async fn delete_session(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Json<Value> {
    let deleted = state.sessions.delete(&key);
    Json(json!({ "key": key, "deleted": deleted }))
}
