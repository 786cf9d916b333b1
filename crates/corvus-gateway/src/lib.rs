//! OpenAI-compatible HTTP + SSE gateway for Corvus.
//!
//! This crate contains:
//! - **state**: shared [`AppState`], which lazily builds and caches one
//!   `corvus_agent::AgentLoop` per registry entry via `AppState::agent_loop`
//! - **adapters**: thin trait adapters bridging `corvus-agent`'s concrete
//!   `ToolRegistry`/`SkillsLoader`/`AgentLoop` to `corvus-workflow`'s narrow traits
//! - **config_mask**: secret-masking for `GET`/`PUT /v1/config`
//! - **handlers**: one module per endpoint family
//! - **router**: route table construction
//! - **serve**: graceful-shutdown `axum::serve` entry point

pub mod adapters;
pub mod config_mask;
pub mod handlers;
pub mod router;
pub mod serve;
pub mod state;

pub use router::build_router;
pub use serve::run_serve_on_listener;
pub use state::{AppState, GatewayError};
