//! Orchestrator (spec §4.1, component G): the depth-bounded tool loop that
//! drives a single conversation turn from user input to final assistant
//! text, invoking tools through the registry and approval gateway and
//! streaming through the provider adapter.

use crate::approval::SharedApprovalGateway;
use crate::config::max_steps;
use crate::conversation::SharedConversationStore;
use crate::error::{LoomError, Result};
use crate::message::Message;
use crate::prompt::{self, PromptContext};
use crate::stream::{self, has_recent_tool_activity, ProviderClient, StreamEvent};
use crate::tool::ToolRegistry;
use crate::ui::UiBridge;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Shared, mutable agent state. Cheap to clone (`Arc` internally) so a UI
/// front-end can hold one handle per session.
pub struct Agent {
    conversations: SharedConversationStore,
    registry: Mutex<ToolRegistry>,
    approvals: SharedApprovalGateway,
    provider: Arc<dyn ProviderClient>,
    ui: Arc<dyn UiBridge>,
    prompt_ctx: Mutex<PromptContext>,
    cancel: Mutex<CancellationToken>,
}

impl Agent {
    pub fn new(
        conversations: SharedConversationStore,
        registry: ToolRegistry,
        approvals: SharedApprovalGateway,
        provider: Arc<dyn ProviderClient>,
        ui: Arc<dyn UiBridge>,
        prompt_ctx: PromptContext,
    ) -> Self {
        Self {
            conversations,
            registry: Mutex::new(registry),
            approvals,
            provider,
            ui,
            prompt_ctx: Mutex::new(prompt_ctx),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Enqueue a user turn and run it to completion (spec §4.1 `Enqueue`).
    /// Subsequent `enqueue` calls while a turn is in flight are not
    /// supported by this single-turn driver; a front-end should await the
    /// returned future before enqueuing another message.
    pub async fn enqueue(&self, text: &str) -> Result<()> {
        let cancel = {
            let mut guard = self.cancel.lock();
            *guard = CancellationToken::new();
            guard.clone()
        };

        let id = self.conversations.start_conversation()?;
        self.refresh_system_prompt(&id)?;
        self.conversations.add_user(&id, text)?;
        self.ui.set_busy(true).await;
        let result = self.run_turn(&id, &cancel).await;
        self.ui.set_busy(false).await;
        self.conversations.cleanup_empty_conversations(&id)?;
        result
    }

    /// Cooperatively cancel the in-flight turn (spec §4.1 `Stop`, §5).
    pub fn stop(&self) {
        self.cancel.lock().cancel();
    }

    pub fn resolve_approval(&self, action_id: &str, approved: bool) {
        self.approvals.resolve_approval(action_id, approved);
    }

    pub fn resolve_choice(&self, action_id: &str, index: usize) {
        self.approvals.resolve_choice(action_id, index);
    }

    /// Handle to the underlying conversation store, for front-ends that need
    /// to list/switch conversations independently of a running turn.
    pub fn conversations(&self) -> &SharedConversationStore {
        &self.conversations
    }

    fn refresh_system_prompt(&self, conversation_id: &str) -> Result<()> {
        let ctx = self.prompt_ctx.lock();
        let rendered = prompt::build(&ctx);
        self.conversations.update_system_message(conversation_id, rendered)
    }

    async fn run_turn(&self, conversation_id: &str, cancel: &CancellationToken) -> Result<()> {
        let mut consecutive_empty = 0usize;

        for _step in 0..max_steps() {
            if cancel.is_cancelled() {
                self.conversations
                    .add_system(conversation_id, "Operation stopped.")?;
                return Ok(());
            }

            let transcript = self.conversations.history(conversation_id);
            let tools = self.registry.lock().schemas();

            let mut streaming = true;
            let (mut events, mut observed) = self
                .drive_one_response(&transcript, &tools, streaming, cancel)
                .await?;

            if !observed {
                streaming = !streaming;
                let retry = self
                    .drive_one_response(&transcript, &tools, streaming, cancel)
                    .await?;
                events = retry.0;
                observed = retry.1;
            }

            if !observed {
                consecutive_empty += 1;
                let recent_tool_activity = has_recent_tool_activity(&transcript);
                if consecutive_empty >= 3 && recent_tool_activity {
                    return Err(LoomError::ConsecutiveEmpty(consecutive_empty));
                }
                self.conversations
                    .add_assistant(conversation_id, "")?;
                continue;
            }
            consecutive_empty = 0;

            let mut text = String::new();
            let mut tool_call = None;
            for event in events {
                match event {
                    StreamEvent::Token(t) => {
                        if let Some(usage) = t.strip_prefix("[USAGE] ") {
                            self.emit_usage(usage).await;
                        } else if let Some(reasoning) = t.strip_prefix("[REASONING] ") {
                            self.ui.emit_reasoning(reasoning, false).await;
                        } else if t == "[REASONING_DONE] " {
                            self.ui.emit_reasoning("", true).await;
                        } else {
                            text.push_str(&t);
                            self.ui.emit_assistant(&t).await;
                        }
                    }
                    StreamEvent::ToolCall(call) => tool_call = Some(call),
                }
            }

            if let Some(call) = tool_call {
                self.conversations
                    .add_assistant_tool_use(conversation_id, &call.name, &call.id)?;

                if cancel.is_cancelled() {
                    self.conversations
                        .add_system(conversation_id, "Operation stopped.")?;
                    return Ok(());
                }

                // `user_choice` and `edit_file` get bespoke routing (spec §4.3);
                // every other tool goes through the generic safe/unsafe path.
                if call.name == "user_choice" {
                    self.handle_user_choice(conversation_id, &call, cancel).await?;
                    continue;
                }
                if call.name == "edit_file" {
                    self.handle_edit_file(conversation_id, &call, cancel).await?;
                    continue;
                }

                let is_safe = self.registry.lock().is_safe(&call.name).unwrap_or(false);
                if is_safe {
                    let output = self.invoke_tool(&call.name, call.arguments.clone()).await;
                    self.conversations
                        .add_tool_result(conversation_id, &call.name, &call.id, output)?;
                    continue;
                }

                let auto_approved = call.name == "run_shell" && self.approvals.policy().shell;
                let approved = auto_approved
                    || matches!(
                        self.approvals
                            .user_approved(
                                self.ui.as_ref(),
                                &call.id,
                                &format!("Run {}", call.name),
                                None,
                                cancel,
                            )
                            .await,
                        Some(true)
                    );

                let message = if approved {
                    self.invoke_tool(&call.name, call.arguments.clone()).await
                } else {
                    "Denied by user.".to_string()
                };
                let payload = serde_json::json!({
                    "tool": call.name,
                    "approved": approved,
                    "diff": serde_json::Value::Null,
                    "message": message,
                });
                self.conversations
                    .add_tool_result(conversation_id, &call.name, &call.id, payload.to_string())?;
                continue;
            }

            if !text.is_empty() {
                self.conversations.add_assistant(conversation_id, text)?;
            }
            return Ok(());
        }

        Err(LoomError::DepthExhausted(max_steps()))
    }

    /// Run `name` through the registry, turning an unknown-tool or handler
    /// error into the error text itself rather than failing the turn.
    async fn invoke_tool(&self, name: &str, args: serde_json::Value) -> String {
        let tool = self.registry.lock().find(name);
        match tool {
            Some(tool) => match tool.call(args, self.ui.as_ref()).await {
                Ok(output) => output,
                Err(e) => format!("Error: {e}"),
            },
            None => format!("Error: {}", LoomError::UnknownTool(name.to_string())),
        }
    }

    /// `edit_file` proposes a diff without writing; if auto-approved (or the
    /// user approves interactively) and the edits policy is on, the
    /// orchestrator synthesizes a sibling `apply_edit` call under a distinct
    /// id so the model's approved plan is actually applied (spec §4.3, §9).
    async fn handle_edit_file(
        &self,
        conversation_id: &str,
        call: &crate::message::ToolCall,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let plan_raw = self.invoke_tool("edit_file", call.arguments.clone()).await;
        let plan: serde_json::Value = serde_json::from_str(&plan_raw).unwrap_or(serde_json::Value::Null);
        let diff = plan.get("diff").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let message = plan
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or(&plan_raw)
            .to_string();

        let policy = self.approvals.policy();
        let approved = policy.edits
            || matches!(
                self.approvals
                    .user_approved(self.ui.as_ref(), &call.id, &message, Some(&diff), cancel)
                    .await,
                Some(true)
            );

        let payload = serde_json::json!({
            "tool": "edit_file",
            "approved": approved,
            "diff": diff,
            "message": message,
        });
        self.conversations
            .add_tool_result(conversation_id, "edit_file", &call.id, payload.to_string())?;

        if approved && policy.edits {
            let synthetic_id = format!("{}:apply", call.id);
            let output = self.invoke_tool("apply_edit", call.arguments.clone()).await;
            self.conversations
                .add_tool_result(conversation_id, "apply_edit", &synthetic_id, output)?;
        }
        Ok(())
    }

    /// `user_choice` is routed as a choice prompt rather than an approval
    /// boolean (spec §4.3) and never reaches the generic registry path.
    async fn handle_user_choice(
        &self,
        conversation_id: &str,
        call: &crate::message::ToolCall,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let question = call
            .arguments
            .get("question")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let options: Vec<String> = call
            .arguments
            .get("options")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        let index = self
            .approvals
            .user_choice(self.ui.as_ref(), &call.id, question, &options, cancel)
            .await;
        let content = match index {
            Some(i) => options.get(i).cloned().unwrap_or_else(|| i.to_string()),
            None => "Operation stopped.".to_string(),
        };
        self.conversations
            .add_tool_result(conversation_id, "user_choice", &call.id, content)?;
        Ok(())
    }

    async fn drive_one_response(
        &self,
        transcript: &[Message],
        tools: &[crate::tool::ToolDefinition],
        streaming: bool,
        cancel: &CancellationToken,
    ) -> Result<(Vec<StreamEvent>, bool)> {
        if streaming {
            let lines = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok((Vec::new(), false)),
                result = self.provider.open_stream(transcript, tools) => result.map_err(LoomError::Other)?,
            };
            Ok(stream::run_streaming(lines).await)
        } else {
            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok((Vec::new(), false)),
                result = self.provider.send_once(transcript, tools) => result.map_err(LoomError::Other)?,
            };
            Ok(stream::run_non_streaming(&body))
        }
    }

    async fn emit_usage(&self, usage_line: &str) {
        let mut provider = "unknown";
        let mut model = "unknown";
        let mut in_tokens = 0u64;
        let mut out_tokens = 0u64;
        for part in usage_line.split_whitespace() {
            if let Some(v) = part.strip_prefix("provider=") {
                provider = v;
            } else if let Some(v) = part.strip_prefix("model=") {
                model = v;
            } else if let Some(v) = part.strip_prefix("in=") {
                in_tokens = v.parse().unwrap_or(0);
            } else if let Some(v) = part.strip_prefix("out=") {
                out_tokens = v.parse().unwrap_or(0);
            }
        }
        self.ui
            .emit_billing(provider, model, in_tokens, out_tokens, 0.0, 0.0, 0.0)
            .await;
    }
}

/// Generate a fresh tool-call-scoped identifier for approval/choice requests
/// that don't originate from the provider (e.g. confirmation prompts raised
/// by a tool handler mid-call).
pub fn new_action_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApprovalGateway;
    use crate::conversation::ConversationStore;
    use crate::tool::ToolDefinition;
    use crate::ui::NullUiBridge;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProvider {
        responses: Mutex<Vec<&'static str>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProviderClient for ScriptedProvider {
        async fn open_stream(
            &self,
            _transcript: &[Message],
            _tools: &[ToolDefinition],
        ) -> anyhow::Result<BoxStream<'static, anyhow::Result<String>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.responses.lock().remove(0);
            let lines: Vec<anyhow::Result<String>> =
                next.lines().map(|l| Ok(l.to_string())).collect();
            Ok(Box::pin(futures::stream::iter(lines)))
        }

        async fn send_once(&self, _transcript: &[Message], _tools: &[ToolDefinition]) -> anyhow::Result<Value> {
            unreachable!("this test only drives the streaming path")
        }
    }

    fn new_agent(responses: Vec<&'static str>) -> (Agent, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConversationStore::new(dir.path()).unwrap());
        let provider = Arc::new(ScriptedProvider {
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
        });
        let agent = Agent::new(
            store,
            ToolRegistry::new(),
            Arc::new(ApprovalGateway::new()),
            provider,
            Arc::new(NullUiBridge),
            PromptContext {
                assistant_name: "loom".into(),
                model_label: "test-model".into(),
                date: "2026-07-27".into(),
                ..Default::default()
            },
        );
        (agent, dir)
    }

    #[tokio::test]
    async fn plain_text_turn_ends_with_assistant_message() {
        let (agent, _dir) = new_agent(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"hi there\"}}]}\ndata: [DONE]",
        ]);
        agent.enqueue("hello").await.unwrap();
        let id = agent.conversations.current_id().unwrap();
        let history = agent.conversations.history(&id);
        assert!(history
            .iter()
            .any(|m| matches!(m.role, crate::message::Role::Assistant) && m.content == "hi there"));
    }

    #[tokio::test]
    async fn consecutive_empty_after_tool_use_aborts() {
        let (agent, _dir) = new_agent(vec![
            "data: [DONE]",
            "data: [DONE]",
            "data: [DONE]",
            "data: [DONE]",
            "data: [DONE]",
            "data: [DONE]",
        ]);
        let id = agent.conversations.start_conversation().unwrap();
        agent.conversations.add_user(&id, "go").unwrap();
        agent
            .conversations
            .add_assistant_tool_use(&id, "read_file", "c1")
            .unwrap();
        agent
            .conversations
            .add_tool_result(&id, "read_file", "c1", "contents")
            .unwrap();
        let result = agent.run_turn(&id, &agent.cancel.lock().clone()).await;
        assert!(result.is_err());
    }
}
