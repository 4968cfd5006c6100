//! Core data model (spec §3): Message, ToolCall, ExecutionResult.

use serde::{Deserialize, Serialize};

/// Role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single entry in a conversation. Tool invocations and their results
/// carry `tool_name`/`tool_call_id`; every other message leaves them `None`.
///
/// Invariant: a message with `role == Tool` MUST carry a `tool_call_id`
/// matching an earlier assistant message's tool call in the same
/// conversation (spec §3, §8 property 1). That invariant is enforced by
/// the conversation store, not by this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// An assistant message recording that a tool call was emitted, so later
    /// property checks can find the matching tool-use entry by id.
    pub fn assistant_tool_use(tool_name: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        let mut m = Self::new(Role::Assistant, String::new());
        m.tool_name = Some(tool_name.into());
        m.tool_call_id = Some(tool_call_id.into());
        m
    }

    pub fn tool_result(
        tool_name: impl Into<String>,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut m = Self::new(Role::Tool, content);
        m.tool_name = Some(tool_name.into());
        m.tool_call_id = Some(tool_call_id.into());
        m
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_name: None,
            tool_call_id: None,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// A structured tool invocation request emitted by the stream adapter once
/// its arguments are known to be complete (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The result of running a tool handler (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    pub safe: bool,
}

impl ExecutionResult {
    pub fn ok(content: impl Into<String>, safe: bool) -> Self {
        Self {
            content: content.into(),
            diff: None,
            safe,
        }
    }

    pub fn with_diff(content: impl Into<String>, diff: impl Into<String>, safe: bool) -> Self {
        Self {
            content: content.into(),
            diff: Some(diff.into()),
            safe,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_round_trips_id() {
        let m = Message::tool_result("read_file", "call_1", "contents");
        assert_eq!(m.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(m.tool_name.as_deref(), Some("read_file"));
        assert!(matches!(m.role, Role::Tool));
    }

    #[test]
    fn serde_round_trip() {
        let m = Message::user("hello");
        let json = serde_json::to_string(&m).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content, "hello");
    }
}
