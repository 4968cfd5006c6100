//! UI bridge contract (spec §6): the narrow interface the core calls into.
//! The terminal/GUI front-end implements this; the core never depends on
//! a concrete front-end.

use async_trait::async_trait;

/// Capability the orchestrator, registry and approval gateway call into.
/// Implementations must be cheap to call repeatedly and must not block the
/// calling task beyond their own I/O (no re-entrant calls back into the
/// agent).
#[async_trait]
pub trait UiBridge: Send + Sync {
    /// A system notice or tool result to render in the transcript.
    async fn send_chat(&self, role: &str, text: &str);

    /// A streamed assistant text delta.
    async fn emit_assistant(&self, partial_text: &str);

    /// A streamed reasoning delta; `done` marks the end of the reasoning block.
    async fn emit_reasoning(&self, text: &str, done: bool);

    /// A billing event derived from a usage frame (spec §4.7).
    async fn emit_billing(
        &self,
        provider: &str,
        model: &str,
        in_tokens: u64,
        out_tokens: u64,
        in_usd: f64,
        out_usd: f64,
        total_usd: f64,
    );

    /// Fire-and-forget: ask the human to approve an unsafe tool call. The
    /// core blocks on a later `resolve_approval` for the same `action_id`.
    async fn prompt_approval(&self, action_id: &str, summary: &str, diff: Option<&str>);

    /// Fire-and-forget: ask the human to choose among options. The core
    /// blocks on a later `resolve_choice` for the same `action_id`.
    async fn prompt_choice(&self, action_id: &str, question: &str, options: &[String]);

    /// Busy indicator for the duration of an in-flight turn.
    async fn set_busy(&self, busy: bool);

    /// Advisory hint that the UI should open `path` (spec §4.3).
    async fn open_file_in_ui(&self, path: &str);
}

/// A bridge that records nothing and answers nothing; useful for tests and
/// for headless invocations that only care about the persisted transcript.
#[derive(Default)]
pub struct NullUiBridge;

#[async_trait]
impl UiBridge for NullUiBridge {
    async fn send_chat(&self, _role: &str, _text: &str) {}
    async fn emit_assistant(&self, _partial_text: &str) {}
    async fn emit_reasoning(&self, _text: &str, _done: bool) {}
    async fn emit_billing(
        &self,
        _provider: &str,
        _model: &str,
        _in_tokens: u64,
        _out_tokens: u64,
        _in_usd: f64,
        _out_usd: f64,
        _total_usd: f64,
    ) {
    }
    async fn prompt_approval(&self, _action_id: &str, _summary: &str, _diff: Option<&str>) {}
    async fn prompt_choice(&self, _action_id: &str, _question: &str, _options: &[String]) {}
    async fn set_busy(&self, _busy: bool) {}
    async fn open_file_in_ui(&self, _path: &str) {}
}
