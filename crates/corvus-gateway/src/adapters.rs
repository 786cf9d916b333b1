//! Narrow-trait adapters bridging `corvus-agent`'s concrete types to
//! `corvus-workflow`'s `ToolExecutor`/`SkillsSource`/`AgentStepRunner` traits,
//! so the workflow crate never depends on the agent crate directly.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use corvus_agent::{AgentLoop, SkillsLoader, ToolRegistry};
use corvus_workflow::{AgentStepRunner, SkillsSource, ToolExecutor};

/// Wraps an `Arc<ToolRegistry>` (shared with the agent loop it belongs to)
/// as a workflow-engine `ToolExecutor`.
pub struct ToolRegistryAdapter {
    registry: Arc<ToolRegistry>,
}

impl ToolRegistryAdapter {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistryAdapter {
    fn exists(&self, name: &str) -> bool {
        self.registry.has(name)
    }

    fn parameter_schema(&self, name: &str) -> Option<Value> {
        self.registry.get(name).map(|t| t.to_definition().function.parameters)
    }

    async fn execute(&self, name: &str, args: HashMap<String, Value>) -> anyhow::Result<String> {
        Ok(self.registry.execute(name, args).await)
    }
}

/// Wraps an `Arc<SkillsLoader>` as a workflow-engine `SkillsSource`.
pub struct SkillsLoaderAdapter {
    skills: Arc<SkillsLoader>,
}

impl SkillsLoaderAdapter {
    pub fn new(skills: Arc<SkillsLoader>) -> Self {
        Self { skills }
    }
}

impl SkillsSource for SkillsLoaderAdapter {
    fn load_skill(&self, name: &str) -> Option<String> {
        self.skills.load_skill(name)
    }
}

/// Runs `agent` workflow steps against a specific, already-resolved
/// `AgentLoop` (the one the owning gateway request's `X-Agent` selected).
/// `session_key`/`agent_name` are accepted per the trait contract but the
/// loop's own model/config are fixed at pool-construction time — a true
/// per-step agent *switch* would require pool lookup inside `run`, which
/// the workflow engine's narrow trait deliberately doesn't expose a path
/// for (see the workflow-engine adapter grounding entry in DESIGN.md).
pub struct AgentStepRunnerAdapter {
    agent: Arc<AgentLoop>,
}

impl AgentStepRunnerAdapter {
    pub fn new(agent: Arc<AgentLoop>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl AgentStepRunner for AgentStepRunnerAdapter {
    async fn run(&self, goal: &str, _session_key: &str, _agent_name: &str) -> anyhow::Result<String> {
        self.agent.process_direct(goal).await
    }
}

/// A `ToolExecutor` that never executes anything — used to construct a
/// `WorkflowEngine` for the read-only `GET /v1/workflows*` endpoints, which
/// only list/load/delete definitions and never run a step.
pub struct InertToolExecutor;

#[async_trait]
impl ToolExecutor for InertToolExecutor {
    fn exists(&self, _name: &str) -> bool {
        false
    }

    fn parameter_schema(&self, _name: &str) -> Option<Value> {
        None
    }

    async fn execute(&self, name: &str, _args: HashMap<String, Value>) -> anyhow::Result<String> {
        anyhow::bail!("tool execution unavailable on a read-only workflow engine: {name}")
    }
}
