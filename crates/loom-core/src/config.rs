//! On-disk configuration layout (spec §6): per-workspace `.loom/` files and
//! per-user `~/.loom/` files, plus the environment knobs that govern the
//! orchestrator loop.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_STEPS: usize = 64;

/// `LOOM_MAX_STEPS`: the orchestrator's depth bound (spec §4.1). Malformed
/// or absent values fall back to the default rather than failing the turn.
pub fn max_steps() -> usize {
    std::env::var("LOOM_MAX_STEPS")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&n: &usize| n > 0)
        .unwrap_or(DEFAULT_MAX_STEPS)
}

/// `LOOM_DEBUG_ENGINE`: when set (to any non-empty value), the orchestrator
/// and stream adapter emit verbose JSON-formatted trace events (spec §4.10).
pub fn debug_engine_enabled() -> bool {
    std::env::var("LOOM_DEBUG_ENGINE")
        .map(|v| !v.is_empty())
        .unwrap_or(false)
}

/// `<workspace>/.loom/rules.json`: free-form project rule strings injected
/// into the system prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rules {
    #[serde(default)]
    pub rules: Vec<String>,
}

/// `<workspace>/.loom/mcp.json`: MCP servers this workspace wires up.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfigFile {
    #[serde(default, rename = "mcpServers")]
    pub mcp_servers: HashMap<String, McpServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub safe: bool,
    #[serde(default = "default_mcp_timeout")]
    pub timeout_sec: u64,
}

fn default_mcp_timeout() -> u64 {
    30
}

/// `~/.loom/settings.json`: user-level preferences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub assistant_name: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub auto_approve_shell: bool,
    #[serde(default)]
    pub auto_approve_edits: bool,
}

/// `~/.loom/memories.json`: durable facts the assistant has been told to
/// remember, injected into the system prompt (spec §4.8).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Memories {
    #[serde(default)]
    pub entries: Vec<MemoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub text: String,
}

/// `~/.loom/rules.json`: user-level rule strings, distinct from the
/// workspace-level `rules.json`.
pub type UserRules = Rules;

/// Load a JSON file as `T`, treating a missing file as `T::default()` and a
/// malformed file as a recoverable configuration error (spec §4.11) rather
/// than a panic.
pub fn load_json<T>(path: &Path) -> Result<T>
where
    T: Default + for<'de> Deserialize<'de>,
{
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// Resolved paths for a given user home and workspace root (spec §6).
pub struct Paths {
    pub home: PathBuf,
    pub workspace: PathBuf,
}

impl Paths {
    pub fn new(home: impl Into<PathBuf>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            workspace: workspace.into(),
        }
    }

    pub fn workspace_rules(&self) -> PathBuf {
        self.workspace.join(".loom").join("rules.json")
    }

    pub fn workspace_mcp(&self) -> PathBuf {
        self.workspace.join(".loom").join("mcp.json")
    }

    pub fn workspace_history_dir(&self) -> PathBuf {
        self.workspace.join(".loom").join("history")
    }

    pub fn user_settings(&self) -> PathBuf {
        self.home.join(".loom").join("settings.json")
    }

    pub fn user_memories(&self) -> PathBuf {
        self.home.join(".loom").join("memories.json")
    }

    pub fn user_rules(&self) -> PathBuf {
        self.home.join(".loom").join("rules.json")
    }

    pub fn usage_aggregates(&self) -> PathBuf {
        self.home.join(".loom").join("usages").join("aggregates.json")
    }
}
