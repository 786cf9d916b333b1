//! Typed errors for workflow validation and execution.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow '{0}' not found")]
    NotFound(String),

    #[error("invalid workflow: {0}")]
    Invalid(String),

    #[error("step '{step}': tool '{tool}' not registered")]
    UnknownTool { step: String, tool: String },

    #[error("step '{step}': tool '{tool}' failed: {source}")]
    ToolFailed {
        step: String,
        tool: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("step '{step}': skill '{skill}' not found")]
    UnknownSkill { step: String, skill: String },

    #[error("step '{step}': agent step requires an agent runner, none was configured")]
    NoAgentRunner { step: String },

    #[error("step '{step}': agent invocation failed: {source}")]
    AgentFailed {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
