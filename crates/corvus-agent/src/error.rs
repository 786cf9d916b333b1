//! Typed errors a caller of the agent loop needs to branch on.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    /// A second concurrent dispatch was rejected for an already-running session key.
    #[error("a request is already in flight for this session")]
    Busy,
    /// The invocation was cancelled via its session's cancellation token.
    #[error("cancelled")]
    Cancelled,
    /// A workflow/agent-name lookup found nothing.
    #[error("not found: {0}")]
    NotFound(String),
}
