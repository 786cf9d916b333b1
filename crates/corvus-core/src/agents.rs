//! Agent registry — the set of named agent configurations loaded from
//! `agents/registry.json`, guaranteeing a `"default"` entry always exists.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One named agent's configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentEntry {
    pub name: String,
    pub enabled: bool,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub max_tool_iterations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_dir: Option<String>,
}

impl Default for AgentEntry {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            model: String::new(),
            provider: None,
            description: None,
            temperature: 0.7,
            max_tokens: 4096,
            max_tool_iterations: 20,
            prompt_dir: None,
        }
    }
}

impl AgentEntry {
    /// Synthesize the "default" entry from global defaults when the
    /// registry file is absent or doesn't define one.
    pub fn synthesize_default(model: &str, max_tool_iterations: u32, max_tokens: u32) -> Self {
        Self {
            name: "default".to_string(),
            enabled: true,
            model: model.to_string(),
            provider: None,
            description: Some("Default Corvus agent".to_string()),
            temperature: 0.7,
            max_tokens,
            max_tool_iterations,
            prompt_dir: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    agents: Vec<AgentEntry>,
}

/// Loads, validates, and persists the set of named agent configurations.
///
/// Writes are atomic (tmp-file-then-rename), matching the rest of the
/// persisted-state layout. The `"default"` entry is guaranteed present at
/// load time: if the file is absent or doesn't define one, one is
/// synthesized from the caller-supplied global defaults.
pub struct AgentRegistry {
    path: PathBuf,
    entries: RwLock<HashMap<String, AgentEntry>>,
}

impl AgentRegistry {
    /// Load `agents/registry.json` under `workspace`, synthesizing a
    /// `"default"` entry from `default_model`/`default_max_iterations`/
    /// `default_max_tokens` if the file is missing or has none.
    pub fn load(
        workspace: &Path,
        default_model: &str,
        default_max_iterations: u32,
        default_max_tokens: u32,
    ) -> std::io::Result<Self> {
        let dir = workspace.join("agents");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("registry.json");

        let mut file = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str::<RegistryFile>(&content).unwrap_or_else(|e| {
                warn!(error = %e, "failed to parse agent registry, starting empty");
                RegistryFile::default()
            })
        } else {
            RegistryFile::default()
        };

        if !file.agents.iter().any(|a| a.name == "default") {
            file.agents.push(AgentEntry::synthesize_default(
                default_model,
                default_max_iterations,
                default_max_tokens,
            ));
        }

        let entries: HashMap<String, AgentEntry> =
            file.agents.into_iter().map(|a| (a.name.clone(), a)).collect();

        let registry = Self {
            path,
            entries: RwLock::new(entries),
        };
        registry.save()?;
        Ok(registry)
    }

    /// List all entries, sorted by name.
    pub fn list(&self) -> Vec<AgentEntry> {
        let entries = self.entries.read().unwrap();
        let mut list: Vec<AgentEntry> = entries.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Look up an entry by name. Callers needing "fall back to default on
    /// miss" should use [`AgentRegistry::get_or_default`].
    pub fn get(&self, name: &str) -> Option<AgentEntry> {
        self.entries.read().unwrap().get(name).cloned()
    }

    /// Look up an entry by name, falling back to `"default"` on a miss (per
    /// the component design: "an agent lookup failure for a valid request
    /// falls back to the default").
    pub fn get_or_default(&self, name: &str) -> AgentEntry {
        let entries = self.entries.read().unwrap();
        entries
            .get(name)
            .or_else(|| entries.get("default"))
            .cloned()
            .expect("default entry always present")
    }

    /// Insert or replace an entry, then persist atomically.
    pub fn register(&self, entry: AgentEntry) -> std::io::Result<()> {
        self.entries.write().unwrap().insert(entry.name.clone(), entry);
        self.save()
    }

    /// Remove an entry by name (refusing to remove `"default"`), then
    /// persist atomically.
    pub fn remove(&self, name: &str) -> std::io::Result<bool> {
        if name == "default" {
            return Ok(false);
        }
        let removed = self.entries.write().unwrap().remove(name).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    /// Enable/disable an entry by name, then persist atomically.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> std::io::Result<bool> {
        let changed = {
            let mut entries = self.entries.write().unwrap();
            match entries.get_mut(name) {
                Some(entry) => {
                    entry.enabled = enabled;
                    true
                }
                None => false,
            }
        };
        if changed {
            self.save()?;
        }
        Ok(changed)
    }

    /// Serialize current entries back to `agents/registry.json` via
    /// tmp-file-then-rename.
    fn save(&self) -> std::io::Result<()> {
        let entries = self.entries.read().unwrap();
        let mut agents: Vec<AgentEntry> = entries.values().cloned().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        drop(entries);

        let file = RegistryFile { agents };
        let body = serde_json::to_string_pretty(&file)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, body)?;
        std::fs::rename(&tmp_path, &self.path)?;
        debug!(path = %self.path.display(), "saved agent registry");
        Ok(())
    }
}
