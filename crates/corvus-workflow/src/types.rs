//! Workflow data model — definitions, steps, and execution summaries.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A saved, named sequence of steps with a default variable map.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    pub steps: Vec<WorkflowStep>,
}

/// One step in a workflow. Exactly one of `tool`, pure `goal`, `skill`, or
/// `agent` is set — `kind()` reports which.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStep {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<HashMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

/// The four mutually-exclusive step shapes a `WorkflowStep` can take.
#[derive(Clone, Debug, PartialEq)]
pub enum StepKind<'a> {
    Tool { tool: &'a str, args: &'a HashMap<String, Value> },
    Goal { goal: &'a str },
    Skill { skill: &'a str, goal: &'a str },
    Agent { agent: &'a str, goal: &'a str },
}

impl WorkflowStep {
    /// Classify this step, or `None` if it matches none of the four valid shapes.
    pub fn kind(&self) -> Option<StepKind<'_>> {
        match (&self.tool, &self.args, &self.goal, &self.skill, &self.agent) {
            (Some(tool), Some(args), None, None, None) => {
                Some(StepKind::Tool { tool, args })
            }
            (None, None, Some(goal), None, None) => Some(StepKind::Goal { goal }),
            (None, None, Some(goal), Some(skill), None) => {
                Some(StepKind::Skill { skill, goal })
            }
            (None, None, Some(goal), None, Some(agent)) => {
                Some(StepKind::Agent { agent, goal })
            }
            _ => None,
        }
    }
}

/// Summary row for `List()`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSummary {
    pub name: String,
    pub description: String,
    pub step_count: usize,
}

impl From<&Workflow> for WorkflowSummary {
    fn from(wf: &Workflow) -> Self {
        WorkflowSummary {
            name: wf.name.clone(),
            description: wf.description.clone(),
            step_count: wf.steps.len(),
        }
    }
}

/// Outcome of one step's execution, recorded in the run report.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StepReport {
    pub name: String,
    pub output: String,
}

/// Full execution report for `Execute()`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkflowReport {
    pub workflow: String,
    pub steps: Vec<StepReport>,
    pub variables: HashMap<String, String>,
}
