//! loom-core: the agent core — orchestration loop, provider stream adapter,
//! tool registry, MCP supervisor, conversation store, usage ledger and
//! system prompt builder. Front-ends (the `loom` CLI, or any other UI)
//! depend on this crate and implement `ui::UiBridge`.

pub mod approval;
pub mod builtin_tools;
pub mod config;
pub mod conversation;
pub mod error;
pub mod mcp;
pub mod message;
pub mod orchestrator;
pub mod prompt;
pub mod stream;
pub mod tool;
pub mod ui;
pub mod usage;

pub use approval::{ApprovalGateway, AutoApprovePolicy, SharedApprovalGateway};
pub use conversation::{ConversationStore, SharedConversationStore};
pub use error::{LoomError, Result};
pub use message::{ExecutionResult, Message, Role, ToolCall};
pub use orchestrator::Agent;
pub use tool::{Tool, ToolDefinition, ToolRegistry};
pub use ui::UiBridge;
