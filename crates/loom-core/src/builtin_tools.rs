//! Minimal built-in tool set (spec §4.3 examples): filesystem read/edit,
//! a ripgrep-backed search, and a shell runner. These exist to exercise the
//! registry/approval/MCP integration end to end; a real deployment is
//! expected to register richer tools the same way.

use crate::error::{LoomError, Result};
use crate::tool::{Tool, ToolDefinition, ToolRegistry};
use crate::ui::UiBridge;
use async_trait::async_trait;
use std::sync::Arc;

struct ReadFile;

#[async_trait]
impl Tool for ReadFile {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".into(),
            description: "Read a UTF-8 text file's contents".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
            safe: true,
        }
    }

    async fn call(&self, args: serde_json::Value, _ui: &dyn UiBridge) -> Result<String> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LoomError::Validation("read_file requires a 'path' argument".into()))?;
        Ok(std::fs::read_to_string(path)?)
    }
}

struct SearchCode;

#[async_trait]
impl Tool for SearchCode {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_code".into(),
            description: "Search the workspace for a literal query using ripgrep".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }),
            safe: true,
        }
    }

    async fn call(&self, args: serde_json::Value, _ui: &dyn UiBridge) -> Result<String> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LoomError::Validation("search_code requires a 'query' argument".into()))?;
        let output = std::process::Command::new("rg")
            .arg("--line-number")
            .arg(query)
            .output()
            .map_err(|e| LoomError::Other(anyhow::anyhow!("failed to run rg: {e}")))?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Proposes an edit without writing anything: returns a JSON plan
/// `{diff, message}` that the orchestrator turns into an approval prompt
/// (spec §4.3, §9 "auto-apply-edit coupling"). The actual write happens in
/// `ApplyEdit`, either synthesized by the orchestrator or called by the
/// model on its next turn.
struct EditFile;

fn line_diff(old: &str, new: &str) -> String {
    let mut out = String::new();
    for line in old.lines() {
        out.push_str(&format!("-{line}\n"));
    }
    for line in new.lines() {
        out.push_str(&format!("+{line}\n"));
    }
    out
}

#[async_trait]
impl Tool for EditFile {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "edit_file".into(),
            description: "Propose a file creation or modification for approval".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "action": {"type": "string", "enum": ["CREATE", "MODIFY"]},
                    "content": {"type": "string"}
                },
                "required": ["path", "content"]
            }),
            safe: false,
        }
    }

    async fn call(&self, args: serde_json::Value, _ui: &dyn UiBridge) -> Result<String> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LoomError::Validation("edit_file requires a 'path' argument".into()))?;
        let content = args.get("content").and_then(|v| v.as_str()).unwrap_or_default();

        let (diff, message) = match std::fs::read_to_string(path) {
            Ok(existing) => (line_diff(&existing, content), format!("File will be modified: {path}")),
            Err(_) => (line_diff("", content), format!("File will be created: {path}")),
        };
        Ok(serde_json::json!({"diff": diff, "message": message}).to_string())
    }
}

/// Performs the write `edit_file` only planned. Always safe: by the time
/// this runs, a human (or the auto-approve policy) has already approved it.
struct ApplyEdit;

#[async_trait]
impl Tool for ApplyEdit {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "apply_edit".into(),
            description: "Write an already-approved edit_file plan to disk".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}, "content": {"type": "string"}},
                "required": ["path", "content"]
            }),
            safe: true,
        }
    }

    async fn call(&self, args: serde_json::Value, _ui: &dyn UiBridge) -> Result<String> {
        let path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LoomError::Validation("apply_edit requires a 'path' argument".into()))?;
        let content = args.get("content").and_then(|v| v.as_str()).unwrap_or_default();
        std::fs::write(path, content)?;
        Ok(format!("Wrote {} bytes to {path}", content.len()))
    }
}

/// Schema-only: the orchestrator intercepts `user_choice` calls before they
/// reach the registry and routes them through the Approval Gateway's choice
/// path instead (spec §4.3).
struct UserChoice;

#[async_trait]
impl Tool for UserChoice {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "user_choice".into(),
            description: "Ask the user to choose among a small set of options".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "question": {"type": "string"},
                    "options": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["question", "options"]
            }),
            safe: true,
        }
    }

    async fn call(&self, _args: serde_json::Value, _ui: &dyn UiBridge) -> Result<String> {
        Err(LoomError::Configuration(
            "user_choice must be routed through the orchestrator, not invoked directly".into(),
        ))
    }
}

struct RunShell;

#[async_trait]
impl Tool for RunShell {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "run_shell".into(),
            description: "Run a shell command in the workspace".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"command": {"type": "string"}},
                "required": ["command"]
            }),
            safe: false,
        }
    }

    async fn call(&self, args: serde_json::Value, _ui: &dyn UiBridge) -> Result<String> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LoomError::Validation("run_shell requires a 'command' argument".into()))?;
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|e| LoomError::Other(anyhow::anyhow!("failed to run shell: {e}")))?;
        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(combined)
    }
}

pub fn register_builtin_tools(registry: &mut ToolRegistry) -> Result<()> {
    registry.register(Arc::new(ReadFile))?;
    registry.register(Arc::new(SearchCode))?;
    registry.register(Arc::new(EditFile))?;
    registry.register(Arc::new(ApplyEdit))?;
    registry.register(Arc::new(UserChoice))?;
    registry.register(Arc::new(RunShell))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::NullUiBridge;

    #[tokio::test]
    async fn read_file_requires_path() {
        let tool = ReadFile;
        let err = tool.call(serde_json::json!({}), &NullUiBridge).await.unwrap_err();
        assert!(matches!(err, LoomError::Validation(_)));
    }

    #[tokio::test]
    async fn edit_file_proposes_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let tool = EditFile;
        let plan_raw = tool
            .call(
                serde_json::json!({"path": path.to_str().unwrap(), "content": "hi"}),
                &NullUiBridge,
            )
            .await
            .unwrap();
        let plan: serde_json::Value = serde_json::from_str(&plan_raw).unwrap();
        assert!(plan["message"].as_str().unwrap().contains("will be created"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn apply_edit_writes_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let tool = ApplyEdit;
        tool.call(
            serde_json::json!({"path": path.to_str().unwrap(), "content": "hi"}),
            &NullUiBridge,
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hi");
    }

    #[tokio::test]
    async fn user_choice_cannot_be_invoked_directly() {
        let tool = UserChoice;
        let err = tool
            .call(serde_json::json!({"question": "?", "options": []}), &NullUiBridge)
            .await
            .unwrap_err();
        assert!(matches!(err, LoomError::Configuration(_)));
    }

    #[test]
    fn registering_builtins_has_no_duplicates() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry).unwrap();
        assert_eq!(registry.names().len(), 6);
    }
}
