//! `GET /v1/workflows*` — read-only workflow inspection.
//!
//! Workflows are *run* through the CLI or channel slash-commands, which wire
//! a live `AgentStepRunner`; the gateway only exposes listing/loading so a
//! web client can show what's available.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use corvus_workflow::engine::workflows_dir_for;
use corvus_workflow::{Workflow, WorkflowEngine, WorkflowSummary};

use crate::adapters::InertToolExecutor;
use crate::state::{AppState, GatewayError};

fn engine_for(state: &AppState) -> WorkflowEngine {
    WorkflowEngine::new(workflows_dir_for(&state.workspace), Arc::new(InertToolExecutor))
}

pub async fn list_workflows(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<WorkflowSummary>>, GatewayError> {
    let summaries = engine_for(&state)
        .list()
        .map_err(|e| GatewayError::Internal(e.into()))?;
    Ok(Json(summaries))
}

pub async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Workflow>, GatewayError> {
    let workflow = engine_for(&state)
        .load(&name)
        .map_err(|e| GatewayError::NotFound(e.to_string()))?;
    Ok(Json(workflow))
}
