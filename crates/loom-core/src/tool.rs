//! Tool Registry and Executor (spec §4.3, component A).

use crate::error::{LoomError, Result};
use crate::ui::UiBridge;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Catalog entry advertised to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    /// `true` ⇒ no approval required before the model sees the result.
    pub safe: bool,
}

/// A runnable tool. File-path arguments named `path` trigger an
/// `open_file_in_ui` hint after a successful call (spec §4.3).
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn call(&self, args: serde_json::Value, ui: &dyn UiBridge) -> Result<String>;

    /// Human-readable one-line activity description, e.g. "READING foo.go".
    /// Default derives from the tool name and a `path` argument if present.
    fn activity_line(&self, args: &serde_json::Value) -> String {
        let verb = self.definition().name.to_uppercase();
        match args.get("path").and_then(|v| v.as_str()) {
            Some(path) => format!("{verb} {path}"),
            None => verb,
        }
    }
}

/// Typed catalog of callable tools (spec §4.3: Register/Schemas/Invoke).
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a uniquely named tool. Two `register` calls for the same
    /// name fail the second with `DuplicateTool` (spec §8 property 5).
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.definition().name.clone();
        if self.tools.contains_key(&name) {
            return Err(LoomError::DuplicateTool(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Replace an existing registration, used by the MCP supervisor when a
    /// client restarts and re-advertises its tools (spec §4.5).
    pub fn replace(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name.clone();
        self.tools.insert(name, tool);
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name)
    }

    /// The public catalog supplied to the LLM.
    pub fn schemas(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn is_safe(&self, name: &str) -> Option<bool> {
        self.tools.get(name).map(|t| t.definition().safe)
    }

    /// Run `name` with `args`, emitting the activity line and an
    /// open-file hint to the UI bridge (spec §4.3 "Invocation wrapping").
    pub async fn invoke(
        &self,
        name: &str,
        args: serde_json::Value,
        ui: &dyn UiBridge,
    ) -> Result<String> {
        let tool = self
            .find(name)
            .ok_or_else(|| LoomError::UnknownTool(name.to_string()))?;
        ui.send_chat("system", &tool.activity_line(&args)).await;
        let result = tool.call(args.clone(), ui).await?;
        if let Some(path) = args.get("path").and_then(|v| v.as_str()) {
            ui.open_file_in_ui(path).await;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::NullUiBridge;

    struct Echo(&'static str, bool);

    #[async_trait]
    impl Tool for Echo {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.0.to_string(),
                description: "echoes its args".into(),
                parameters: serde_json::json!({"type": "object"}),
                safe: self.1,
            }
        }

        async fn call(&self, args: serde_json::Value, _ui: &dyn UiBridge) -> Result<String> {
            Ok(args.to_string())
        }
    }

    #[test]
    fn duplicate_register_fails() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(Echo("a", true))).unwrap();
        let err = reg.register(Arc::new(Echo("a", true))).unwrap_err();
        assert!(matches!(err, LoomError::DuplicateTool(_)));
    }

    #[tokio::test]
    async fn invoke_unknown_tool_errors() {
        let reg = ToolRegistry::new();
        let err = reg
            .invoke("nope", serde_json::json!({}), &NullUiBridge)
            .await
            .unwrap_err();
        assert!(matches!(err, LoomError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn invoke_runs_handler() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(Echo("echo", true))).unwrap();
        let out = reg
            .invoke("echo", serde_json::json!({"x": 1}), &NullUiBridge)
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!({"x": 1}).to_string());
    }
}
