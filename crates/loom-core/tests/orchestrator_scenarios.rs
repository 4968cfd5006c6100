//! End-to-end orchestrator scenarios (spec §8 worked examples): a scripted
//! provider plays the model side, real registry/approval/conversation
//! components play everything else.

use async_trait::async_trait;
use futures::stream::BoxStream;
use loom_core::message::Message;
use loom_core::tool::{Tool, ToolDefinition, ToolRegistry};
use loom_core::ui::UiBridge;
use loom_core::{Agent, ApprovalGateway, AutoApprovePolicy, ConversationStore};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct ScriptedProvider {
    responses: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl loom_core::stream::ProviderClient for ScriptedProvider {
    async fn open_stream(
        &self,
        _transcript: &[Message],
        _tools: &[ToolDefinition],
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<String>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().remove(0);
        let lines: Vec<anyhow::Result<String>> = next.lines().map(|l| Ok(l.to_string())).collect();
        Ok(Box::pin(futures::stream::iter(lines)))
    }

    async fn send_once(&self, _transcript: &[Message], _tools: &[ToolDefinition]) -> anyhow::Result<Value> {
        unreachable!("these scenarios only exercise the streaming path")
    }
}

/// A `UiBridge` that immediately resolves every approval prompt itself
/// (`prompt_approval` is fire-and-forget per the trait contract; a real
/// front-end resolves asynchronously via `resolve_approval`, but a test
/// double can just do it inline before returning).
struct AutoResolveUi {
    approvals: Arc<ApprovalGateway>,
    approve: bool,
}

#[async_trait]
impl UiBridge for AutoResolveUi {
    async fn send_chat(&self, _role: &str, _text: &str) {}
    async fn emit_assistant(&self, _text: &str) {}
    async fn emit_reasoning(&self, _text: &str, _done: bool) {}
    async fn emit_billing(&self, _provider: &str, _model: &str, _in: u64, _out: u64, _a: f64, _b: f64, _c: f64) {}
    async fn set_busy(&self, _busy: bool) {}
    async fn open_file_in_ui(&self, _path: &str) {}

    async fn prompt_approval(&self, action_id: &str, _summary: &str, _diff: Option<&str>) {
        self.approvals.resolve_approval(action_id, self.approve);
    }

    async fn prompt_choice(&self, action_id: &str, _question: &str, _options: &[String]) {
        self.approvals.resolve_choice(action_id, 0);
    }
}

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".into(),
            description: "Echo back its input".into(),
            parameters: serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            safe: true,
        }
    }

    async fn call(&self, args: Value, _ui: &dyn UiBridge) -> loom_core::Result<String> {
        Ok(args.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_string())
    }
}

struct DangerousTool;

#[async_trait]
impl Tool for DangerousTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "delete_everything".into(),
            description: "Unsafe tool requiring approval".into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
            safe: false,
        }
    }

    async fn call(&self, _args: Value, _ui: &dyn UiBridge) -> loom_core::Result<String> {
        Ok("done".into())
    }
}

fn build_agent(
    responses: Vec<&str>,
    registry: ToolRegistry,
    policy: AutoApprovePolicy,
    make_ui: impl FnOnce(Arc<ApprovalGateway>) -> Arc<dyn UiBridge>,
) -> (Agent, tempfile::TempDir, Arc<ApprovalGateway>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ConversationStore::new(dir.path()).unwrap());
    let provider = Arc::new(ScriptedProvider::new(responses));
    let approvals = Arc::new(ApprovalGateway::new());
    approvals.set_policy(policy);
    let ui = make_ui(approvals.clone());
    let agent = Agent::new(
        store,
        registry,
        approvals.clone(),
        provider,
        ui,
        loom_core::prompt::PromptContext {
            assistant_name: "loom".into(),
            model_label: "test-model".into(),
            date: "2026-07-27".into(),
            ..Default::default()
        },
    );
    (agent, dir, approvals)
}

/// "Single tool then answer": the model calls a safe tool, then answers
/// using the tool's result.
#[tokio::test]
async fn single_safe_tool_then_final_answer() {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(EchoTool)).unwrap();

    let (agent, _dir, _approvals) = build_agent(
        vec![
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"echo","arguments":"{\"text\":\"hi\"}"}}]},"finish_reason":"tool_calls"}]}"#,
            "data: {\"choices\":[{\"delta\":{\"content\":\"the tool said hi\"}}]}\ndata: [DONE]",
        ],
        registry,
        AutoApprovePolicy::default(),
        |_approvals| Arc::new(loom_core::ui::NullUiBridge),
    );

    agent.enqueue("say hi via the tool").await.unwrap();
    let id = agent.conversations().current_id().unwrap();
    let history = agent.conversations().history(&id);

    assert!(history.iter().any(|m| m.tool_call_id.as_deref() == Some("c1") && m.tool_name.as_deref() == Some("echo")));
    assert!(history.iter().any(|m| matches!(m.role, loom_core::message::Role::Tool) && m.content == "hi"));
    assert!(history
        .iter()
        .any(|m| matches!(m.role, loom_core::message::Role::Assistant) && m.content == "the tool said hi"));
}

/// "Unsafe tool auto-approved by policy": with `shell`/general auto-approve
/// on, an unsafe tool still runs without a prompt and the result is wrapped
/// in the `{tool, approved, diff, message}` envelope.
#[tokio::test]
async fn unsafe_tool_denied_without_auto_approve_wraps_result() {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(DangerousTool)).unwrap();

    let (agent, _dir, _approvals) = build_agent(
        vec![
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"delete_everything","arguments":"{}"}}]},"finish_reason":"tool_calls"}]}"#,
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\ndata: [DONE]",
        ],
        registry,
        AutoApprovePolicy::default(),
        |approvals| Arc::new(AutoResolveUi { approvals, approve: false }),
    );

    agent.enqueue("delete everything").await.unwrap();
    let id = agent.conversations().current_id().unwrap();
    let history = agent.conversations().history(&id);

    let tool_msg = history
        .iter()
        .find(|m| matches!(m.role, loom_core::message::Role::Tool))
        .expect("a tool-result entry must exist even when denied");
    let payload: Value = serde_json::from_str(&tool_msg.content).unwrap();
    assert_eq!(payload["approved"], false);
    assert_eq!(payload["message"], "Denied by user.");
}

/// "Unsafe edit with auto-approval": `edit_file` proposes a plan without
/// writing; with the edits policy on, the orchestrator synthesizes a sibling
/// `apply_edit` call under a distinct id and the file actually gets written.
#[tokio::test]
async fn edit_file_auto_approved_synthesizes_apply_edit() {
    let work_dir = tempfile::tempdir().unwrap();
    let target = work_dir.path().join("notes.txt");
    let target_str = target.to_str().unwrap().to_string();

    let mut registry = ToolRegistry::new();
    loom_core::builtin_tools::register_builtin_tools(&mut registry).unwrap();

    let args = serde_json::json!({"path": target_str, "content": "hello world"}).to_string();
    let frame = serde_json::json!({
        "choices": [{
            "delta": {
                "tool_calls": [{
                    "index": 0,
                    "id": "c1",
                    "function": {"name": "edit_file", "arguments": args}
                }]
            },
            "finish_reason": "tool_calls"
        }]
    });
    let first_line = format!("data: {frame}");
    let (agent, _history_dir, _approvals) = build_agent(
        vec![
            first_line.as_str(),
            "data: {\"choices\":[{\"delta\":{\"content\":\"done\"}}]}\ndata: [DONE]",
        ],
        registry,
        AutoApprovePolicy { shell: false, edits: true },
        |_approvals| Arc::new(loom_core::ui::NullUiBridge),
    );

    agent.enqueue("write some notes").await.unwrap();

    assert_eq!(std::fs::read_to_string(&target).unwrap(), "hello world");

    let id = agent.conversations().current_id().unwrap();
    let history = agent.conversations().history(&id);
    let edit_result = history
        .iter()
        .find(|m| m.tool_name.as_deref() == Some("edit_file") && m.tool_call_id.as_deref() == Some("c1"))
        .expect("edit_file tool-result must be recorded under the original call id");
    let payload: Value = serde_json::from_str(&edit_result.content).unwrap();
    assert_eq!(payload["approved"], true);

    let apply_result = history
        .iter()
        .find(|m| m.tool_name.as_deref() == Some("apply_edit"))
        .expect("a synthesized apply_edit tool-result must be recorded");
    assert_eq!(apply_result.tool_call_id.as_deref(), Some("c1:apply"));
}
