//! MCP Supervisor (spec §4.5, component B): stdio transport framing,
//! a multiplexed JSON-RPC client, and the reconciliation loop that keeps
//! registered tools in sync with configured servers.

pub mod client;
pub mod supervisor;
pub mod transport;

pub use client::{McpClient, PROTOCOL_VERSIONS};
pub use supervisor::{config_hash, namespaced_tool_name, McpSupervisor};
