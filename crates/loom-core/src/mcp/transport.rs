//! Stdio JSON-RPC framing for MCP servers (spec §4.5): one JSON object per
//! line, newline-delimited, matching the MCP stdio transport.

use crate::error::{LoomError, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};

pub struct StdioTransport {
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
}

impl StdioTransport {
    pub fn new(stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self {
            stdin,
            reader: BufReader::new(stdout),
        }
    }

    pub async fn send(&mut self, message: &Value) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| LoomError::Transport(e.to_string()))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| LoomError::Transport(e.to_string()))?;
        Ok(())
    }

    /// Read the next JSON-RPC frame, skipping blank lines. `None` on EOF.
    pub async fn recv(&mut self) -> Result<Option<Value>> {
        loop {
            let mut line = String::new();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| LoomError::Transport(e.to_string()))?;
            if n == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(trimmed)
                .map_err(|e| LoomError::Protocol(format!("malformed MCP frame: {e}")))?;
            return Ok(Some(value));
        }
    }
}

/// Parse a single already-read line, used by unit tests and by the reader
/// loop's error path without requiring a live child process.
pub fn parse_frame(line: &str) -> Result<Value> {
    serde_json::from_str(line.trim()).map_err(|e| LoomError::Protocol(format!("malformed MCP frame: {e}")))
}
