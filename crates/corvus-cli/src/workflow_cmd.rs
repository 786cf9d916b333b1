//! `corvus workflow` — manage and run declarative multi-step workflows.
//!
//! - `corvus workflow list` — list saved workflow summaries
//! - `corvus workflow show <name>` — print a saved workflow definition
//! - `corvus workflow validate -f <file>` — validate a workflow file without saving it
//! - `corvus workflow run (<name> | -f <file>) [--var k=v]...` — execute a workflow
//! - `corvus workflow delete <name>` — delete a saved workflow

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use corvus_agent::tools::filesystem::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};
use corvus_agent::tools::shell::ExecTool;
use corvus_agent::tools::web::{WebFetchTool, WebSearchTool};
use corvus_agent::tools::ToolRegistry;
use corvus_agent::SkillsLoader;
use corvus_core::config::{load_config, Config};
use corvus_workflow::engine::workflows_dir_for;
use corvus_workflow::{Workflow, WorkflowEngine};

use corvus_gateway::adapters::{AgentStepRunnerAdapter, SkillsLoaderAdapter, ToolRegistryAdapter};

#[derive(Subcommand)]
pub enum WorkflowCommands {
    /// List saved workflows
    List,

    /// Print a saved workflow's definition
    Show {
        /// Workflow name
        name: String,
    },

    /// Validate a workflow file without saving it
    Validate {
        /// Path to a workflow JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Execute a workflow
    Run {
        /// Saved workflow name (mutually exclusive with --file)
        name: Option<String>,

        /// Path to a workflow JSON file instead of a saved name
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Variable override in `key=value` form, may repeat
        #[arg(long = "var")]
        vars: Vec<String>,
    },

    /// Delete a saved workflow
    Delete {
        /// Workflow name
        name: String,
    },
}

pub async fn dispatch(cmd: WorkflowCommands) -> Result<()> {
    match cmd {
        WorkflowCommands::List => list(),
        WorkflowCommands::Show { name } => show(&name),
        WorkflowCommands::Validate { file } => validate(&file),
        WorkflowCommands::Run { name, file, vars } => run(name, file, vars).await,
        WorkflowCommands::Delete { name } => delete(&name),
    }
}

fn resolve_workspace(config: &Config) -> PathBuf {
    crate::helpers::expand_tilde(&config.agents.defaults.workspace)
}

fn engine_for(config: &Config, tools: Arc<dyn corvus_workflow::ToolExecutor>) -> WorkflowEngine {
    let workspace = resolve_workspace(config);
    WorkflowEngine::new(workflows_dir_for(&workspace), tools)
}

fn inert_engine(config: &Config) -> WorkflowEngine {
    engine_for(config, Arc::new(corvus_gateway::adapters::InertToolExecutor))
}

fn list() -> Result<()> {
    let config = load_config(None);
    let summaries = inert_engine(&config)
        .list()
        .context("failed to list workflows")?;

    if summaries.is_empty() {
        println!("  No saved workflows.");
        return Ok(());
    }

    println!();
    println!("{}", "  Workflows".cyan().bold());
    println!();
    for s in summaries {
        println!("  {:<20} {:<5} steps  {}", s.name.bold(), s.step_count, s.description);
    }
    println!();
    Ok(())
}

fn show(name: &str) -> Result<()> {
    let config = load_config(None);
    let workflow = inert_engine(&config)
        .load(name)
        .with_context(|| format!("failed to load workflow '{name}'"))?;
    println!("{}", serde_json::to_string_pretty(&workflow)?);
    Ok(())
}

fn validate(file: &PathBuf) -> Result<()> {
    let body = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let workflow: Workflow =
        serde_json::from_str(&body).with_context(|| format!("invalid workflow JSON in {}", file.display()))?;

    let config = load_config(None);
    inert_engine(&config).validate(&workflow)?;
    println!("  {} '{}' is valid ({} steps)", "✓".green(), workflow.name, workflow.steps.len());
    Ok(())
}

fn delete(name: &str) -> Result<()> {
    let config = load_config(None);
    inert_engine(&config)
        .delete(name)
        .with_context(|| format!("failed to delete workflow '{name}'"))?;
    println!("  {} Deleted workflow '{}'", "✓".green(), name);
    Ok(())
}

fn parse_vars(vars: Vec<String>) -> Result<std::collections::HashMap<String, String>> {
    vars.into_iter()
        .map(|kv| {
            kv.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| anyhow::anyhow!("--var must be in key=value form, got '{kv}'"))
        })
        .collect()
}

/// Builds the same tool set `AgentLoop::new` registers, so workflow `tool`
/// steps see the identical surface a live agent run would.
fn build_tool_registry(config: &Config) -> ToolRegistry {
    let workspace = resolve_workspace(config);
    let restrict = config.tools.restrict_to_workspace;
    let allowed_dir = if restrict { Some(workspace.clone()) } else { None };
    let brave_key = if config.tools.web.search.api_key.is_empty() {
        None
    } else {
        Some(config.tools.web.search.api_key.clone())
    };

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(ReadFileTool::new(allowed_dir.clone())));
    tools.register(Arc::new(WriteFileTool::new(allowed_dir.clone())));
    tools.register(Arc::new(EditFileTool::new(allowed_dir.clone())));
    tools.register(Arc::new(ListDirTool::new(allowed_dir)));
    tools.register(Arc::new(ExecTool::new(workspace.clone(), None, restrict)));
    tools.register(Arc::new(WebSearchTool::new(brave_key)));
    tools.register(Arc::new(WebFetchTool::new()));
    tools
}

async fn run(name: Option<String>, file: Option<PathBuf>, vars: Vec<String>) -> Result<()> {
    let config = load_config(None);
    let workspace = resolve_workspace(&config);
    let overrides = parse_vars(vars)?;

    let workflow = match (name, file) {
        (Some(_), Some(_)) => anyhow::bail!("specify either a workflow name or --file, not both"),
        (None, None) => anyhow::bail!("specify either a workflow name or --file"),
        (Some(name), None) => inert_engine(&config)
            .load(&name)
            .with_context(|| format!("failed to load workflow '{name}'"))?,
        (None, Some(path)) => {
            let body = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&body)
                .with_context(|| format!("invalid workflow JSON in {}", path.display()))?
        }
    };

    let tools = Arc::new(build_tool_registry(&config));
    let skills = Arc::new(SkillsLoader::new(&workspace, None));
    let agent_loop = crate::build_agent_loop(&config)?;

    let engine = WorkflowEngine::new(workflows_dir_for(&workspace), Arc::new(ToolRegistryAdapter::new(tools)))
        .with_skills(Arc::new(SkillsLoaderAdapter::new(skills)))
        .with_agent_runner(Arc::new(AgentStepRunnerAdapter::new(Arc::new(agent_loop))));

    println!("  {} Running workflow '{}'...", "⠿".dimmed(), workflow.name);
    let report = engine.execute(&workflow, overrides).await?;

    println!();
    println!("{}", format!("  {} — {} steps", report.workflow, report.steps.len()).cyan().bold());
    for step in &report.steps {
        println!("  {} {}", "✓".green(), step.name.bold());
        println!("    {}", step.output);
    }
    println!();
    Ok(())
}
