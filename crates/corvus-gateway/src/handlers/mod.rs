//! One module per HTTP endpoint family.

pub mod agents;
pub mod chat;
pub mod config;
pub mod health;
pub mod sessions;
pub mod workflows;
