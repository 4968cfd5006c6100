//! Unified error taxonomy for the agent core (spec §7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LoomError>;

/// Top-level error type. Components convert their local errors into this
/// at the boundary they cross into the orchestrator; nothing here is meant
/// to crash the process — the orchestrator always turns a `LoomError` into
/// a single user-visible system chat message and ends the turn cleanly.
#[derive(Debug, Error)]
pub enum LoomError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("tool loop exceeded max depth ({0} steps)")]
    DepthExhausted(usize),

    #[error("{0} consecutive empty responses after tool use")]
    ConsecutiveEmpty(usize),

    #[error("duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("mcp error: {0}")]
    Mcp(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
