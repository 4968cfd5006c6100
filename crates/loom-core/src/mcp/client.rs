//! MCP client: one spawned stdio server process, JSON-RPC request
//! multiplexing, and the initialize handshake with protocol-version
//! fallback (spec §4.5).

use super::transport::StdioTransport;
use crate::config::McpServerConfig;
use crate::error::{LoomError, Result};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;

/// Negotiation order: newest protocol first, falling back to older
/// revisions the server might still speak.
pub const PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

struct Pending {
    waiters: Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>,
    next_id: AtomicU64,
}

pub struct McpClient {
    alias: String,
    child: Mutex<Child>,
    transport: Arc<tokio::sync::Mutex<StdioTransport>>,
    pending: Arc<Pending>,
    pub protocol_version: String,
}

impl McpClient {
    /// Spawn the server process and complete the initialize handshake,
    /// trying each protocol version in `PROTOCOL_VERSIONS` order until one
    /// is accepted.
    pub async fn start(alias: &str, config: &McpServerConfig) -> Result<Self> {
        let resolved = which::which(&config.command)
            .map_err(|e| LoomError::Mcp(format!("cannot resolve command {}: {e}", config.command)))?;

        let mut cmd = Command::new(resolved);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| LoomError::Mcp(format!("failed to spawn MCP server '{alias}': {e}")))?;

        let stdin = child.stdin.take().ok_or_else(|| LoomError::Mcp("no stdin".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| LoomError::Mcp("no stdout".into()))?;
        let transport = Arc::new(tokio::sync::Mutex::new(StdioTransport::new(stdin, stdout)));
        let pending = Arc::new(Pending {
            waiters: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        });

        spawn_reader(transport.clone(), pending.clone());

        let client = Self {
            alias: alias.to_string(),
            child: Mutex::new(child),
            transport,
            pending,
            protocol_version: String::new(),
        };

        let version = client.negotiate().await?;
        Ok(Self { protocol_version: version, ..client })
    }

    async fn negotiate(&self) -> Result<String> {
        let mut last_err = None;
        for version in PROTOCOL_VERSIONS {
            let params = json!({
                "protocolVersion": version,
                "capabilities": {
                    "roots": {"listChanged": false},
                    "sampling": {},
                    "tools": {},
                    "transport": {"stdio": true},
                },
                "clientInfo": {"name": "loom", "version": env!("CARGO_PKG_VERSION")},
            });
            match self.request("initialize", params).await {
                Ok(result) => {
                    let accepted = result
                        .get("protocolVersion")
                        .and_then(|v| v.as_str())
                        .unwrap_or(version)
                        .to_string();
                    self.notify("notifications/initialized", json!({})).await?;
                    return Ok(accepted);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            LoomError::Mcp(format!("no protocol version accepted by '{}'", self.alias))
        }))
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.pending.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.waiters.lock().insert(id, tx);

        let frame = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        self.transport.lock().await.send(&frame).await.map_err(|e| {
            self.pending.waiters.lock().remove(&id);
            e
        })?;

        match rx.await {
            Ok(result) => result,
            Err(_) => {
                self.pending.waiters.lock().remove(&id);
                Err(LoomError::Mcp(format!("'{}' closed the connection", self.alias)))
            }
        }
    }

    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let frame = json!({"jsonrpc": "2.0", "method": method, "params": params});
        self.transport.lock().await.send(&frame).await
    }

    pub async fn list_tools(&self) -> Result<Vec<Value>> {
        let result = self.request("tools/list", json!({})).await?;
        Ok(result
            .get("tools")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        self.request("tools/call", json!({"name": name, "arguments": arguments}))
            .await
    }

    pub async fn shutdown(&self) {
        let _ = self.child.lock().start_kill();
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }
}

/// Background task draining responses off the transport and resolving the
/// matching waiter. Requests with no matching waiter (late or duplicate
/// responses) are dropped; unsolicited notifications are ignored.
fn spawn_reader(transport: Arc<tokio::sync::Mutex<StdioTransport>>, pending: Arc<Pending>) {
    tokio::spawn(async move {
        loop {
            let frame = {
                let mut t = transport.lock().await;
                t.recv().await
            };
            match frame {
                Ok(Some(value)) => {
                    let Some(id) = value.get("id").and_then(|v| v.as_u64()) else {
                        continue;
                    };
                    if let Some(tx) = pending.waiters.lock().remove(&id) {
                        let result = if let Some(error) = value.get("error") {
                            Err(LoomError::Mcp(error.to_string()))
                        } else {
                            Ok(value.get("result").cloned().unwrap_or(Value::Null))
                        };
                        let _ = tx.send(result);
                    }
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }
    });
}
