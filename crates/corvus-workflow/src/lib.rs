//! Declarative multi-step workflow engine for Corvus.
//!
//! This crate contains:
//! - **types**: `Workflow` / `WorkflowStep` data model and run reports
//! - **interpolate**: `{{variable}}` substitution over strings and JSON args
//! - **engine**: `WorkflowEngine` — Save/Load/List/Execute, plus the narrow
//!   `ToolExecutor`/`SkillsSource`/`AgentStepRunner` traits callers implement

pub mod engine;
pub mod error;
pub mod interpolate;
pub mod types;

pub use engine::{AgentStepRunner, SkillsSource, ToolExecutor, WorkflowEngine};
pub use error::WorkflowError;
pub use types::{StepKind, StepReport, Workflow, WorkflowReport, WorkflowStep, WorkflowSummary};
