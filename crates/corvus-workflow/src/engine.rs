//! Workflow persistence and execution.
//!
//! The engine takes its two external dependencies — tool execution and
//! (optionally) agent-step dispatch — as narrow trait objects rather than a
//! direct dependency on the agent crate's concrete types. This keeps
//! `corvus-workflow` buildable and testable standalone; a caller that never
//! supplies an `AgentStepRunner` simply can't run `agent` steps.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use corvus_core::dynamic::coerce_args;

use crate::error::WorkflowError;
use crate::interpolate::{interpolate, interpolate_args};
use crate::types::{StepKind, StepReport, Workflow, WorkflowReport, WorkflowStep, WorkflowSummary};

/// Narrow view of the tool registry the workflow engine needs: existence
/// check, parameter-schema lookup (for argument coercion), and execution.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn exists(&self, name: &str) -> bool;
    fn parameter_schema(&self, name: &str) -> Option<Value>;
    async fn execute(&self, name: &str, args: HashMap<String, Value>) -> anyhow::Result<String>;
}

/// Narrow view of the skills store: load a skill's raw Markdown by name.
pub trait SkillsSource: Send + Sync {
    fn load_skill(&self, name: &str) -> Option<String>;
}

/// Narrow callback for `agent` steps: run `goal` under `agent_name`, scoped
/// to `session_key`, and return the agent's final text.
#[async_trait]
pub trait AgentStepRunner: Send + Sync {
    async fn run(&self, goal: &str, session_key: &str, agent_name: &str) -> anyhow::Result<String>;
}

/// Loads, validates, persists, and executes workflow definitions.
pub struct WorkflowEngine {
    workflows_dir: PathBuf,
    tools: Arc<dyn ToolExecutor>,
    skills: Option<Arc<dyn SkillsSource>>,
    agent_runner: Option<Arc<dyn AgentStepRunner>>,
}

impl WorkflowEngine {
    pub fn new(workflows_dir: impl Into<PathBuf>, tools: Arc<dyn ToolExecutor>) -> Self {
        Self {
            workflows_dir: workflows_dir.into(),
            tools,
            skills: None,
            agent_runner: None,
        }
    }

    pub fn with_skills(mut self, skills: Arc<dyn SkillsSource>) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn with_agent_runner(mut self, runner: Arc<dyn AgentStepRunner>) -> Self {
        self.agent_runner = Some(runner);
        self
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.workflows_dir.join(format!("{name}.json"))
    }

    /// Validate and persist a workflow definition.
    pub fn save(&self, workflow: &Workflow) -> Result<(), WorkflowError> {
        self.validate(workflow)?;

        std::fs::create_dir_all(&self.workflows_dir)?;
        let path = self.path_for(&workflow.name);
        let tmp_path = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(workflow)?;
        std::fs::write(&tmp_path, body)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Load a workflow definition by name.
    pub fn load(&self, name: &str) -> Result<Workflow, WorkflowError> {
        let path = self.path_for(name);
        let body = std::fs::read_to_string(&path)
            .map_err(|_| WorkflowError::NotFound(name.to_string()))?;
        let workflow: Workflow = serde_json::from_str(&body)?;
        Ok(workflow)
    }

    /// List all saved workflows as summaries.
    pub fn list(&self) -> Result<Vec<WorkflowSummary>, WorkflowError> {
        let mut summaries = Vec::new();
        let entries = match std::fs::read_dir(&self.workflows_dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(summaries),
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(body) = std::fs::read_to_string(&path) {
                if let Ok(wf) = serde_json::from_str::<Workflow>(&body) {
                    summaries.push(WorkflowSummary::from(&wf));
                }
            }
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    pub fn delete(&self, name: &str) -> Result<(), WorkflowError> {
        let path = self.path_for(name);
        std::fs::remove_file(&path).map_err(|_| WorkflowError::NotFound(name.to_string()))
    }

    /// Validate a workflow definition without saving it.
    pub fn validate(&self, workflow: &Workflow) -> Result<(), WorkflowError> {
        if workflow.name.trim().is_empty() {
            return Err(WorkflowError::Invalid("workflow name must not be empty".into()));
        }
        if workflow.steps.is_empty() {
            return Err(WorkflowError::Invalid("workflow must have at least one step".into()));
        }

        let mut seen_names = std::collections::HashSet::new();
        for step in &workflow.steps {
            if step.name.trim().is_empty() {
                return Err(WorkflowError::Invalid("every step must have a name".into()));
            }
            if !seen_names.insert(step.name.clone()) {
                return Err(WorkflowError::Invalid(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }

            match step.kind() {
                Some(StepKind::Tool { tool, args }) => {
                    if !self.tools.exists(tool) {
                        return Err(WorkflowError::Invalid(format!(
                            "step '{}': tool '{tool}' is not registered",
                            step.name
                        )));
                    }
                    if let Some(schema) = self.tools.parameter_schema(tool) {
                        self.validate_required_args(&step.name, tool, args, &schema)?;
                    }
                }
                Some(_) => {}
                None => {
                    return Err(WorkflowError::Invalid(format!(
                        "step '{}' must be exactly one of: tool+args, goal, skill+goal, agent+goal",
                        step.name
                    )));
                }
            }
        }

        Ok(())
    }

    fn validate_required_args(
        &self,
        step_name: &str,
        tool: &str,
        args: &HashMap<String, Value>,
        schema: &Value,
    ) -> Result<(), WorkflowError> {
        let required = schema
            .get("required")
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default();

        for key in required {
            let Some(key) = key.as_str() else { continue };
            // A literal value or a `{{...}}` placeholder (resolved at execution
            // time) both satisfy a required parameter — only absence is invalid.
            match args.get(key) {
                Some(value) if !value.is_null() => {}
                _ => {
                    return Err(WorkflowError::Invalid(format!(
                        "step '{step_name}': tool '{tool}' requires argument '{key}'"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Execute a workflow, merging `overrides` on top of its default variables.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        overrides: HashMap<String, String>,
    ) -> Result<WorkflowReport, WorkflowError> {
        self.validate(workflow)?;

        let mut vars = workflow.variables.clone();
        vars.extend(overrides);

        let mut reports = Vec::with_capacity(workflow.steps.len());

        for step in &workflow.steps {
            let output = self.execute_step(workflow, step, &vars).await?;
            let suffix = match step.kind() {
                Some(StepKind::Goal { .. }) => "goal",
                _ => "output",
            };
            vars.insert(format!("{}_{suffix}", step.name), output.clone());
            reports.push(StepReport {
                name: step.name.clone(),
                output,
            });
        }

        Ok(WorkflowReport {
            workflow: workflow.name.clone(),
            steps: reports,
            variables: vars,
        })
    }

    async fn execute_step(
        &self,
        workflow: &Workflow,
        step: &WorkflowStep,
        vars: &HashMap<String, String>,
    ) -> Result<String, WorkflowError> {
        let kind = step.kind().ok_or_else(|| {
            WorkflowError::Invalid(format!("step '{}' has no valid shape", step.name))
        })?;

        match kind {
            StepKind::Tool { tool, args } => {
                debug!(step = %step.name, tool, "executing tool step");
                let interpolated = interpolate_args(args, vars);
                let schema = self.tools.parameter_schema(tool).unwrap_or(Value::Null);
                let coerced = coerce_args(&interpolated, &schema);
                self.tools
                    .execute(tool, coerced)
                    .await
                    .map_err(|source| WorkflowError::ToolFailed {
                        step: step.name.clone(),
                        tool: tool.to_string(),
                        source,
                    })
            }
            StepKind::Goal { goal } => {
                let interpolated = interpolate(goal, vars);
                Ok(interpolated)
            }
            StepKind::Skill { skill, goal } => {
                let skills = self.skills.as_ref().ok_or_else(|| WorkflowError::UnknownSkill {
                    step: step.name.clone(),
                    skill: skill.to_string(),
                })?;
                let content = skills.load_skill(skill).ok_or_else(|| WorkflowError::UnknownSkill {
                    step: step.name.clone(),
                    skill: skill.to_string(),
                })?;
                let goal = interpolate(goal, vars);
                Ok(format!("Using skill '{skill}': {content}\n\nGoal: {goal}"))
            }
            StepKind::Agent { agent, goal } => {
                let runner = self
                    .agent_runner
                    .as_ref()
                    .ok_or_else(|| WorkflowError::NoAgentRunner { step: step.name.clone() })?;
                let goal = interpolate(goal, vars);
                let session_key = format!("workflow:{}:{}", workflow.name, step.name);
                runner
                    .run(&goal, &session_key, agent)
                    .await
                    .map_err(|source| WorkflowError::AgentFailed {
                        step: step.name.clone(),
                        source,
                    })
            }
        }
    }
}

/// Convenience: build a `WorkflowEngine` rooted at `<workspace>/workflows`.
pub fn workflows_dir_for(workspace: &Path) -> PathBuf {
    workspace.join("workflows")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WorkflowStep;
    use serde_json::json;
    use std::sync::Mutex;

    struct MockTools {
        schemas: HashMap<String, Value>,
        calls: Mutex<Vec<(String, HashMap<String, Value>)>>,
    }

    impl MockTools {
        fn new() -> Self {
            let mut schemas = HashMap::new();
            schemas.insert(
                "weather".to_string(),
                json!({
                    "type": "object",
                    "properties": {
                        "city": {"type": "string"},
                        "days": {"type": "integer"}
                    },
                    "required": ["city"]
                }),
            );
            Self {
                schemas,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ToolExecutor for MockTools {
        fn exists(&self, name: &str) -> bool {
            self.schemas.contains_key(name)
        }

        fn parameter_schema(&self, name: &str) -> Option<Value> {
            self.schemas.get(name).cloned()
        }

        async fn execute(&self, name: &str, args: HashMap<String, Value>) -> anyhow::Result<String> {
            self.calls.lock().unwrap().push((name.to_string(), args.clone()));
            Ok(format!("{name} called with {args:?}"))
        }
    }

    struct MockSkills;
    impl SkillsSource for MockSkills {
        fn load_skill(&self, name: &str) -> Option<String> {
            if name == "greeting" {
                Some("Always greet warmly.".to_string())
            } else {
                None
            }
        }
    }

    struct MockAgentRunner;
    #[async_trait]
    impl AgentStepRunner for MockAgentRunner {
        async fn run(&self, goal: &str, session_key: &str, agent_name: &str) -> anyhow::Result<String> {
            Ok(format!("[{agent_name}@{session_key}] handled: {goal}"))
        }
    }

    fn tool_step(name: &str, tool: &str, args: HashMap<String, Value>) -> WorkflowStep {
        WorkflowStep {
            name: name.to_string(),
            tool: Some(tool.to_string()),
            args: Some(args),
            goal: None,
            skill: None,
            agent: None,
        }
    }

    fn goal_step(name: &str, goal: &str) -> WorkflowStep {
        WorkflowStep {
            name: name.to_string(),
            tool: None,
            args: None,
            goal: Some(goal.to_string()),
            skill: None,
            agent: None,
        }
    }

    fn make_engine(dir: &Path) -> WorkflowEngine {
        WorkflowEngine::new(dir, Arc::new(MockTools::new()))
            .with_skills(Arc::new(MockSkills))
            .with_agent_runner(Arc::new(MockAgentRunner))
    }

    #[test]
    fn test_validate_rejects_empty_steps() {
        let dir = tempfile::tempdir().unwrap();
        let engine = make_engine(dir.path());
        let wf = Workflow {
            name: "empty".into(),
            description: String::new(),
            variables: HashMap::new(),
            steps: vec![],
        };
        assert!(engine.validate(&wf).is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_tool() {
        let dir = tempfile::tempdir().unwrap();
        let engine = make_engine(dir.path());
        let wf = Workflow {
            name: "bad".into(),
            description: String::new(),
            variables: HashMap::new(),
            steps: vec![tool_step("s1", "nonexistent", HashMap::new())],
        };
        assert!(engine.validate(&wf).is_err());
    }

    #[test]
    fn test_validate_rejects_missing_required_arg() {
        let dir = tempfile::tempdir().unwrap();
        let engine = make_engine(dir.path());
        let wf = Workflow {
            name: "bad".into(),
            description: String::new(),
            variables: HashMap::new(),
            steps: vec![tool_step("s1", "weather", HashMap::new())],
        };
        let err = engine.validate(&wf).unwrap_err();
        assert!(err.to_string().contains("requires argument 'city'"));
    }

    #[test]
    fn test_validate_accepts_placeholder_for_required_arg() {
        let dir = tempfile::tempdir().unwrap();
        let engine = make_engine(dir.path());
        let mut args = HashMap::new();
        args.insert("city".to_string(), json!("{{target_city}}"));
        let wf = Workflow {
            name: "ok".into(),
            description: String::new(),
            variables: HashMap::new(),
            steps: vec![tool_step("s1", "weather", args)],
        };
        assert!(engine.validate(&wf).is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_step_names() {
        let dir = tempfile::tempdir().unwrap();
        let engine = make_engine(dir.path());
        let wf = Workflow {
            name: "dupes".into(),
            description: String::new(),
            variables: HashMap::new(),
            steps: vec![goal_step("a", "go"), goal_step("a", "go again")],
        };
        assert!(engine.validate(&wf).is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let engine = make_engine(dir.path());
        let mut args = HashMap::new();
        args.insert("city".to_string(), json!("Paris"));
        let wf = Workflow {
            name: "trip".into(),
            description: "plan a trip".into(),
            variables: HashMap::new(),
            steps: vec![tool_step("check_weather", "weather", args)],
        };

        engine.save(&wf).unwrap();
        assert!(dir.path().join("trip.json").is_file());
        assert!(!dir.path().join("trip.json.tmp").exists());

        let loaded = engine.load("trip").unwrap();
        assert_eq!(loaded, wf);
    }

    #[test]
    fn test_load_missing_returns_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let engine = make_engine(dir.path());
        assert!(matches!(engine.load("nope"), Err(WorkflowError::NotFound(_))));
    }

    #[test]
    fn test_list_summaries() {
        let dir = tempfile::tempdir().unwrap();
        let engine = make_engine(dir.path());
        let wf1 = Workflow {
            name: "a".into(),
            description: "first".into(),
            variables: HashMap::new(),
            steps: vec![goal_step("s", "g")],
        };
        let wf2 = Workflow {
            name: "b".into(),
            description: "second".into(),
            variables: HashMap::new(),
            steps: vec![goal_step("s1", "g"), goal_step("s2", "g")],
        };
        engine.save(&wf1).unwrap();
        engine.save(&wf2).unwrap();

        let summaries = engine.list().unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].name, "a");
        assert_eq!(summaries[0].step_count, 1);
        assert_eq!(summaries[1].name, "b");
        assert_eq!(summaries[1].step_count, 2);
    }

    #[test]
    fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let engine = make_engine(dir.path());
        let wf = Workflow {
            name: "gone".into(),
            description: String::new(),
            variables: HashMap::new(),
            steps: vec![goal_step("s", "g")],
        };
        engine.save(&wf).unwrap();
        engine.delete("gone").unwrap();
        assert!(engine.load("gone").is_err());
    }

    #[tokio::test]
    async fn test_execute_tool_step_coerces_and_interpolates() {
        let dir = tempfile::tempdir().unwrap();
        let engine = make_engine(dir.path());
        let mut args = HashMap::new();
        args.insert("city".to_string(), json!("{{target_city}}"));
        args.insert("days".to_string(), json!("{{days}}"));
        let wf = Workflow {
            name: "trip".into(),
            description: String::new(),
            variables: HashMap::new(),
            steps: vec![tool_step("check", "weather", args)],
        };

        let mut overrides = HashMap::new();
        overrides.insert("target_city".to_string(), "Tokyo".to_string());
        overrides.insert("days".to_string(), "3".to_string());

        let report = engine.execute(&wf, overrides).await.unwrap();
        assert_eq!(report.steps.len(), 1);
        assert!(report.steps[0].output.contains("Tokyo"));
        assert_eq!(
            report.variables.get("check_output"),
            Some(&report.steps[0].output)
        );
    }

    #[tokio::test]
    async fn test_execute_goal_step_records_under_goal_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let engine = make_engine(dir.path());
        let wf = Workflow {
            name: "plan".into(),
            description: String::new(),
            variables: HashMap::new(),
            steps: vec![goal_step("think", "Plan a trip to {{city}}")],
        };
        let mut overrides = HashMap::new();
        overrides.insert("city".to_string(), "Rome".to_string());

        let report = engine.execute(&wf, overrides).await.unwrap();
        assert_eq!(report.steps[0].output, "Plan a trip to Rome");
        assert_eq!(
            report.variables.get("think_goal"),
            Some(&"Plan a trip to Rome".to_string())
        );
        assert!(!report.variables.contains_key("think_output"));
    }

    #[tokio::test]
    async fn test_execute_skill_step_formats_with_goal() {
        let dir = tempfile::tempdir().unwrap();
        let engine = make_engine(dir.path());
        let wf = Workflow {
            name: "greet".into(),
            description: String::new(),
            variables: HashMap::new(),
            steps: vec![WorkflowStep {
                name: "s".into(),
                tool: None,
                args: None,
                goal: Some("Say hello".into()),
                skill: Some("greeting".into()),
                agent: None,
            }],
        };
        let report = engine.execute(&wf, HashMap::new()).await.unwrap();
        assert!(report.steps[0].output.contains("Using skill 'greeting'"));
        assert!(report.steps[0].output.contains("Always greet warmly."));
        assert!(report.steps[0].output.contains("Goal: Say hello"));
    }

    #[tokio::test]
    async fn test_execute_agent_step_invokes_runner() {
        let dir = tempfile::tempdir().unwrap();
        let engine = make_engine(dir.path());
        let wf = Workflow {
            name: "wf".into(),
            description: String::new(),
            variables: HashMap::new(),
            steps: vec![WorkflowStep {
                name: "ask".into(),
                tool: None,
                args: None,
                goal: Some("Summarize the trip".into()),
                skill: None,
                agent: Some("researcher".into()),
            }],
        };
        let report = engine.execute(&wf, HashMap::new()).await.unwrap();
        assert!(report.steps[0].output.contains("researcher@workflow:wf:ask"));
        assert!(report.steps[0].output.contains("Summarize the trip"));
    }

    #[tokio::test]
    async fn test_execute_agent_step_without_runner_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let engine = WorkflowEngine::new(dir.path(), Arc::new(MockTools::new()));
        let wf = Workflow {
            name: "wf".into(),
            description: String::new(),
            variables: HashMap::new(),
            steps: vec![WorkflowStep {
                name: "ask".into(),
                tool: None,
                args: None,
                goal: Some("Summarize".into()),
                skill: None,
                agent: Some("researcher".into()),
            }],
        };
        let err = engine.execute(&wf, HashMap::new()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NoAgentRunner { .. }));
    }
}
