//! Core types, message bus, configuration, and shared utilities for Corvus.
//!
//! This crate contains:
//! - **types**: typed chat message / tool-call / session data model shared by every other crate
//! - **dynamic**: schema-driven argument coercion (`DynamicValue`)
//! - **bus**: the in-process pub/sub message broker
//! - **session**: conversation history manager (in-memory + on-disk)
//! - **agents**: named agent configuration registry (`agents/registry.json`)
//! - **config**: layered configuration schema, loading, and env overrides
//! - **heartbeat**: periodic workspace wake-up service
//! - **utils**: path/string helpers

pub mod agents;
pub mod bus;
pub mod config;
pub mod dynamic;
pub mod heartbeat;
pub mod session;
pub mod types;
pub mod utils;

pub use agents::{AgentEntry, AgentRegistry};
pub use dynamic::DynamicValue;
pub use session::SessionManager;
pub use types::{Message, Session};
