//! MCP Supervisor (spec §4.5, component B): starts/restarts configured MCP
//! servers, namespaces and registers their tools, and restarts a server
//! only when its effective configuration actually changed.

use super::client::McpClient;
use crate::config::McpServerConfig;
use crate::error::{LoomError, Result};
use crate::tool::{Tool, ToolDefinition, ToolRegistry};
use crate::ui::UiBridge;
use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const LIST_TOOLS_ATTEMPTS: u32 = 3;
const LIST_TOOLS_BACKOFF: Duration = Duration::from_millis(500);

/// A canonical hash of a server config: sorted env vars, PATH-resolved
/// command, and args in their given order. Restart decisions key off this
/// rather than the raw config so irrelevant formatting differences in
/// `mcp.json` don't force a needless restart (spec §4.5 invariants).
pub fn config_hash(config: &McpServerConfig) -> String {
    let resolved_command = which::which(&config.command)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| config.command.clone());

    let mut env: Vec<(&String, &String)> = config.env.iter().collect();
    env.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    hasher.update(resolved_command.as_bytes());
    for arg in &config.args {
        hasher.update(b"\0");
        hasher.update(arg.as_bytes());
    }
    for (k, v) in env {
        hasher.update(b"\0env\0");
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Replace characters outside `[a-zA-Z0-9_]` with `_` and namespace by
/// alias, so two servers can never collide on tool name (spec §4.5).
pub fn namespaced_tool_name(alias: &str, raw_name: &str) -> String {
    let sanitized: String = raw_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("{alias}__{sanitized}")
}

struct RunningServer {
    client: Arc<McpClient>,
    hash: String,
}

/// A tool backed by a running MCP client; invoking it performs a
/// `tools/call` JSON-RPC round trip.
struct McpTool {
    alias: String,
    raw_name: String,
    definition: ToolDefinition,
    client: Arc<McpClient>,
}

#[async_trait]
impl Tool for McpTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn call(&self, args: serde_json::Value, _ui: &dyn UiBridge) -> Result<String> {
        let result = self.client.call_tool(&self.raw_name, args).await?;
        Ok(serde_json::to_string(&result)?)
    }

    fn activity_line(&self, _args: &serde_json::Value) -> String {
        format!("MCP {}/{}", self.alias, self.raw_name)
    }
}

#[derive(Default)]
pub struct McpSupervisor {
    servers: SyncMutex<HashMap<String, RunningServer>>,
}

impl McpSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile against `configs`: start new servers, restart ones whose
    /// config hash changed, leave unchanged ones running, and stop any
    /// alias no longer present. Successfully (re)started servers have their
    /// tools listed (with retry) and registered into `registry`.
    pub async fn reconcile(
        &self,
        configs: &HashMap<String, McpServerConfig>,
        registry: &mut ToolRegistry,
    ) -> Result<()> {
        let removed: Vec<String> = {
            let servers = self.servers.lock();
            servers.keys().filter(|a| !configs.contains_key(*a)).cloned().collect()
        };
        for alias in removed {
            self.stop(&alias, registry).await;
        }

        for (alias, config) in configs {
            let new_hash = config_hash(config);
            let needs_restart = {
                let servers = self.servers.lock();
                match servers.get(alias) {
                    Some(running) => running.hash != new_hash,
                    None => true,
                }
            };
            if !needs_restart {
                continue;
            }
            self.stop(alias, registry).await;
            self.start_one(alias, config, new_hash, registry).await?;
        }
        Ok(())
    }

    async fn start_one(
        &self,
        alias: &str,
        config: &McpServerConfig,
        hash: String,
        registry: &mut ToolRegistry,
    ) -> Result<()> {
        let client = Arc::new(McpClient::start(alias, config).await?);
        let tools = list_tools_with_retry(&client).await?;

        for raw in &tools {
            let raw_name = raw.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            if raw_name.is_empty() {
                continue;
            }
            let description = raw
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let parameters = raw.get("inputSchema").cloned().unwrap_or_else(|| serde_json::json!({}));
            let definition = ToolDefinition {
                name: namespaced_tool_name(alias, &raw_name),
                description,
                parameters,
                safe: config.safe,
            };
            registry.replace(Arc::new(McpTool {
                alias: alias.to_string(),
                raw_name,
                definition,
                client: client.clone(),
            }));
        }

        self.servers
            .lock()
            .insert(alias.to_string(), RunningServer { client, hash });
        Ok(())
    }

    async fn stop(&self, alias: &str, registry: &mut ToolRegistry) {
        let running = self.servers.lock().remove(alias);
        if let Some(running) = running {
            running.client.shutdown().await;
        }
        let stale: Vec<String> = registry
            .names()
            .into_iter()
            .filter(|name| name.starts_with(&format!("{alias}__")))
            .collect();
        for name in stale {
            registry.unregister(&name);
        }
    }

    /// Kill every running server without touching the registry; used at
    /// process shutdown, when no further tool dispatch will occur.
    pub async fn stop_all(&self) {
        let running: Vec<Arc<McpClient>> = {
            let mut servers = self.servers.lock();
            servers.drain().map(|(_, r)| r.client).collect()
        };
        for client in running {
            client.shutdown().await;
        }
    }
}

async fn list_tools_with_retry(client: &McpClient) -> Result<Vec<serde_json::Value>> {
    let mut last_err = None;
    for attempt in 0..LIST_TOOLS_ATTEMPTS {
        match client.list_tools().await {
            Ok(tools) => return Ok(tools),
            Err(e) => {
                last_err = Some(e);
                if attempt + 1 < LIST_TOOLS_ATTEMPTS {
                    tokio::time::sleep(LIST_TOOLS_BACKOFF).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| LoomError::Mcp("tools/list failed".into())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(command: &str, args: &[&str]) -> McpServerConfig {
        McpServerConfig {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: HashMap::new(),
            safe: true,
            timeout_sec: 30,
        }
    }

    #[test]
    fn hash_is_stable_for_identical_config() {
        let a = config("echo", &["hi"]);
        let b = config("echo", &["hi"]);
        assert_eq!(config_hash(&a), config_hash(&b));
    }

    #[test]
    fn hash_changes_with_args() {
        let a = config("echo", &["hi"]);
        let b = config("echo", &["bye"]);
        assert_ne!(config_hash(&a), config_hash(&b));
    }

    #[test]
    fn hash_ignores_env_insertion_order() {
        let mut a = config("echo", &["hi"]);
        a.env.insert("A".into(), "1".into());
        a.env.insert("B".into(), "2".into());
        let mut b = config("echo", &["hi"]);
        b.env.insert("B".into(), "2".into());
        b.env.insert("A".into(), "1".into());
        assert_eq!(config_hash(&a), config_hash(&b));
    }

    #[test]
    fn tool_names_are_namespaced_and_sanitized() {
        assert_eq!(namespaced_tool_name("git", "log tree"), "git__log_tree");
        assert_eq!(namespaced_tool_name("fs", "read_file"), "fs__read_file");
    }
}
