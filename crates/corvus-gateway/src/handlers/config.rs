//! `GET/PUT /v1/config` — masked read, merge-then-persist write.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::Value;

use corvus_core::config::loader::save_config;
use corvus_core::config::schema::Config;

use crate::config_mask::{mask, merge_masked};
use crate::state::{AppState, GatewayError};

pub async fn get_config(State(state): State<Arc<AppState>>) -> Result<Json<Value>, GatewayError> {
    let current =
        serde_json::to_value(&state.config).map_err(|e| GatewayError::Internal(e.into()))?;
    Ok(Json(mask(&current)))
}

/// Persists to disk; takes effect for the running process on next restart.
/// `AppState.config` is not hot-swapped in place, so already-pooled agent
/// loops keep running with the config they were built from.
pub async fn put_config(
    State(state): State<Arc<AppState>>,
    Json(incoming): Json<Value>,
) -> Result<Json<Value>, GatewayError> {
    let current =
        serde_json::to_value(&state.config).map_err(|e| GatewayError::Internal(e.into()))?;
    let merged = merge_masked(&current, &incoming);

    let new_config: Config = serde_json::from_value(merged.clone())
        .map_err(|e| GatewayError::BadRequest(format!("invalid config: {e}")))?;

    save_config(&new_config, None).map_err(|e| GatewayError::Internal(e.into()))?;

    Ok(Json(mask(&merged)))
}
