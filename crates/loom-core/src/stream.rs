//! Provider Stream Adapter (spec §4.2, component C).
//!
//! Converts an incremental provider response (or a single non-streaming
//! JSON body) into a uniform sequence of `StreamEvent`s: text/reasoning/usage
//! tokens, and at most one completed tool call per turn.

use crate::message::{Message, Role, ToolCall};
use crate::tool::ToolDefinition;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Plain text, or a sentinel-prefixed string (`[REASONING] `,
    /// `[REASONING_DONE] `, `[USAGE] ...`) per spec §4.2.
    Token(String),
    ToolCall(ToolCall),
}

/// Transport-level collaborator: turns a transcript + tool catalog into
/// either a line-oriented SSE byte stream or a single non-streaming body.
/// Concrete wire formats are out of scope beyond this contract (spec §1);
/// `HttpProviderClient` below is the one shape this system defines (§6).
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn open_stream(
        &self,
        transcript: &[Message],
        tools: &[ToolDefinition],
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<String>>>;

    async fn send_once(&self, transcript: &[Message], tools: &[ToolDefinition]) -> anyhow::Result<Value>;
}

#[derive(Default)]
struct ToolCallAccumulator {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAccumulator {
    fn complete(&self) -> bool {
        self.id.is_some() && self.name.is_some() && serde_json::from_str::<Value>(&self.arguments).is_ok()
    }

    fn into_tool_call(self) -> Option<ToolCall> {
        let id = self.id?;
        let name = self.name?;
        let arguments = serde_json::from_str(&self.arguments).ok()?;
        Some(ToolCall { id, name, arguments })
    }
}

/// Required-field validation table referenced by spec §4.2.
fn required_field(tool_name: &str) -> Option<&'static str> {
    match tool_name {
        "read_file" => Some("path"),
        "search_code" => Some("query"),
        "edit_file" | "apply_edit" => Some("path"),
        _ => None,
    }
}

fn validates(call: &ToolCall) -> bool {
    match required_field(&call.name) {
        Some(field) => call.arguments.get(field).is_some(),
        None => true,
    }
}

/// A tool call is "recent" for the fallback-suppression rule if, within the
/// last ~10 messages, both a tool-use assistant message and a tool result
/// are present (spec §4.2, §9).
pub fn has_recent_tool_activity(transcript: &[Message]) -> bool {
    let tail = &transcript[transcript.len().saturating_sub(10)..];
    let saw_tool_use = tail
        .iter()
        .any(|m| matches!(m.role, Role::Assistant) && m.tool_call_id.is_some());
    let saw_tool_result = tail.iter().any(|m| matches!(m.role, Role::Tool));
    saw_tool_use && saw_tool_result
}

/// Parse one SSE `data:` payload into the accumulator state, forwarding
/// whatever is ready as `StreamEvent`s. Returns `true` if the frame signaled
/// `finish_reason == "tool_calls"` (or an equivalent terminal condition).
fn apply_delta(
    delta: &Value,
    content: &mut String,
    reasoning_open: &mut bool,
    tool_accs: &mut HashMap<u64, ToolCallAccumulator>,
    events: &mut Vec<StreamEvent>,
) -> bool {
    let choice = delta
        .get("choices")
        .and_then(|c| c.get(0))
        .cloned()
        .unwrap_or(delta.clone());
    let d = choice.get("delta").unwrap_or(&choice);

    if let Some(text) = d.get("content").and_then(|v| v.as_str()) {
        content.push_str(text);
        events.push(StreamEvent::Token(text.to_string()));
    }

    if let Some(reasoning) = d.get("reasoning").and_then(|v| v.as_str()) {
        *reasoning_open = true;
        events.push(StreamEvent::Token(format!("[REASONING] {reasoning}")));
    } else if *reasoning_open && d.get("reasoning").is_none() && d.get("content").is_some() {
        *reasoning_open = false;
        events.push(StreamEvent::Token("[REASONING_DONE] ".to_string()));
    }

    if let Some(calls) = d.get("tool_calls").and_then(|v| v.as_array()) {
        for call in calls {
            let index = call.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            let acc = tool_accs.entry(index).or_default();
            if let Some(id) = call.get("id").and_then(|v| v.as_str()) {
                acc.id.get_or_insert_with(|| id.to_string());
            }
            if let Some(name) = call.get("function").and_then(|f| f.get("name")).and_then(|v| v.as_str()) {
                acc.name.get_or_insert_with(|| name.to_string());
            }
            if let Some(args) = call.get("function").and_then(|f| f.get("arguments")).and_then(|v| v.as_str()) {
                acc.arguments.push_str(args);
            }
        }
    }

    if let Some(usage) = delta.get("usage") {
        let provider = delta.get("provider").and_then(|v| v.as_str()).unwrap_or("unknown");
        let model = delta.get("model").and_then(|v| v.as_str()).unwrap_or("unknown");
        let in_tok = usage.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
        let out_tok = usage.get("completion_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
        events.push(StreamEvent::Token(format!(
            "[USAGE] provider={provider} model={model} in={in_tok} out={out_tok}"
        )));
    }

    choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(|r| r == "tool_calls")
        .unwrap_or(false)
}

/// Choose the lowest-indexed complete accumulator and emit exactly one
/// `ToolCall`, dropping it if validation fails (spec §4.2, §8 property 7).
fn finalize_tool_call(tool_accs: HashMap<u64, ToolCallAccumulator>) -> Option<ToolCall> {
    let mut indices: Vec<u64> = tool_accs.keys().copied().collect();
    indices.sort_unstable();
    for idx in indices {
        let acc = &tool_accs[&idx];
        if acc.complete() {
            if let Some(call) = tool_accs.into_iter().find(|(i, _)| *i == idx).map(|(_, a)| a).and_then(|a| a.into_tool_call()) {
                if validates(&call) {
                    return Some(call);
                }
            }
            return None;
        }
    }
    None
}

fn parse_sse_line(line: &str) -> Option<&str> {
    let line = line.trim_end_matches('\r');
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    line.strip_prefix("data:").map(|s| s.trim_start())
}

/// Stream-mode adapter run: consumes `lines` (one SSE frame's payload per
/// item, `[DONE]` terminating), returns accumulated events plus whether any
/// content or tool call was observed (for the retry helper).
pub async fn run_streaming(
    mut lines: BoxStream<'static, anyhow::Result<String>>,
) -> (Vec<StreamEvent>, bool) {
    let mut events = Vec::new();
    let mut content = String::new();
    let mut reasoning_open = false;
    let mut tool_accs: HashMap<u64, ToolCallAccumulator> = HashMap::new();
    let mut saw_tool_calls_finish = false;

    while let Some(item) = lines.next().await {
        let raw = match item {
            Ok(l) => l,
            Err(e) => {
                events.push(StreamEvent::Token(format!("Error: {e}")));
                break;
            }
        };
        let payload = match parse_sse_line(&raw) {
            Some(p) => p,
            None => continue,
        };
        if payload == "[DONE]" {
            break;
        }
        let delta: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(_) => continue, // malformed frame: drop and keep reading (spec §7)
        };
        if apply_delta(&delta, &mut content, &mut reasoning_open, &mut tool_accs, &mut events) {
            saw_tool_calls_finish = true;
            break;
        }
    }

    // Stream closed without an explicit tool_calls finish: accept a complete
    // accumulator anyway (spec §4.2).
    let had_tool_accumulator = !tool_accs.is_empty();
    if saw_tool_calls_finish || had_tool_accumulator {
        if let Some(call) = finalize_tool_call(tool_accs) {
            events.push(StreamEvent::ToolCall(call));
        }
    }

    let observed = !content.is_empty()
        || events.iter().any(|e| matches!(e, StreamEvent::ToolCall(_)));
    (events, observed)
}

/// Non-streaming path: a single JSON response with either a tool call or a
/// plain message. Content is emitted rune-by-rune to preserve the streaming
/// call sites downstream (spec §4.2).
pub fn run_non_streaming(body: &Value) -> (Vec<StreamEvent>, bool) {
    let mut events = Vec::new();
    let choice = body.get("choices").and_then(|c| c.get(0)).cloned().unwrap_or(body.clone());
    let message = choice.get("message").cloned().unwrap_or(choice.clone());

    if let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
        if let Some(first) = calls.first() {
            let id = first.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let name = first
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let args_str = first
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
                .unwrap_or("{}");
            if let Ok(arguments) = serde_json::from_str::<Value>(args_str) {
                let call = ToolCall { id, name, arguments };
                if validates(&call) {
                    events.push(StreamEvent::ToolCall(call));
                    return (events, true);
                }
            }
        }
        return (events, false);
    }

    let text = message.get("content").and_then(|v| v.as_str()).unwrap_or_default();
    for ch in text.chars() {
        events.push(StreamEvent::Token(ch.to_string()));
    }
    let observed = !text.is_empty();
    (events, observed)
}

/// A minimal OpenAI-compatible chat-completions client (spec §6). This is
/// the single concrete wire format this system defines; it is deliberately
/// not a multi-provider abstraction.
pub struct HttpProviderClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpProviderClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn body(&self, transcript: &[Message], tools: &[ToolDefinition], stream: bool) -> Value {
        let messages: Vec<Value> = transcript
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": role_str(m.role),
                    "content": m.content,
                    "tool_call_id": m.tool_call_id,
                    "name": m.tool_name,
                })
            })
            .collect();
        let tool_schemas: Vec<Value> = tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "tools": tool_schemas,
            "tool_choice": "auto",
            "parallel_tool_calls": false,
            "reasoning": {"effort": "medium"},
            "stream": stream,
        })
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn open_stream(
        &self,
        transcript: &[Message],
        tools: &[ToolDefinition],
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<String>>> {
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&self.body(transcript, tools, true))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("provider returned HTTP {status}: {body}");
        }
        let byte_stream = resp.bytes_stream();
        let lines = byte_stream.flat_map(|chunk| {
            let lines: Vec<anyhow::Result<String>> = match chunk {
                Ok(bytes) => String::from_utf8_lossy(&bytes)
                    .lines()
                    .map(|l| Ok(l.to_string()))
                    .collect(),
                Err(e) => vec![Err(anyhow::anyhow!(e))],
            };
            futures::stream::iter(lines)
        });
        Ok(Box::pin(lines))
    }

    async fn send_once(&self, transcript: &[Message], tools: &[ToolDefinition]) -> anyhow::Result<Value> {
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&self.body(transcript, tools, false))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("provider returned HTTP {status}: {body}");
        }
        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn lines_stream(lines: Vec<&str>) -> BoxStream<'static, anyhow::Result<String>> {
        let owned: Vec<anyhow::Result<String>> = lines.into_iter().map(|l| Ok(l.to_string())).collect();
        Box::pin(stream::iter(owned))
    }

    #[tokio::test]
    async fn plain_text_stream_emits_tokens() {
        let lines = lines_stream(vec![
            r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#,
            "data: [DONE]",
        ]);
        let (events, observed) = run_streaming(lines).await;
        assert!(observed);
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Token(t) => Some(t.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hello");
    }

    #[tokio::test]
    async fn tool_call_assembled_across_frames_in_any_order() {
        let lines = lines_stream(vec![
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"path\""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"read_file"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":":\"a.rs\"}"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        ]);
        let (events, observed) = run_streaming(lines).await;
        assert!(observed);
        let call = events.iter().find_map(|e| match e {
            StreamEvent::ToolCall(c) => Some(c.clone()),
            _ => None,
        });
        let call = call.expect("a tool call must be emitted");
        assert_eq!(call.id, "call_1");
        assert_eq!(call.name, "read_file");
        assert_eq!(call.arguments["path"], "a.rs");
    }

    #[tokio::test]
    async fn tool_call_missing_required_field_is_dropped() {
        let lines = lines_stream(vec![
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"read_file","arguments":"{}"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        ]);
        let (events, _observed) = run_streaming(lines).await;
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::ToolCall(_))));
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_not_fatal() {
        let lines = lines_stream(vec![
            "data: {not json}",
            r#"data: {"choices":[{"delta":{"content":"ok"}}]}"#,
            "data: [DONE]",
        ]);
        let (events, observed) = run_streaming(lines).await;
        assert!(observed);
        assert!(events.iter().any(|e| matches!(e, StreamEvent::Token(t) if t == "ok")));
    }

    #[tokio::test]
    async fn empty_stream_is_not_observed() {
        let lines = lines_stream(vec!["data: [DONE]"]);
        let (events, observed) = run_streaming(lines).await;
        assert!(events.is_empty());
        assert!(!observed);
    }

    #[test]
    fn non_streaming_tool_call() {
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "c1",
                        "function": {"name": "search_code", "arguments": "{\"query\":\"foo\"}"}
                    }]
                }
            }]
        });
        let (events, observed) = run_non_streaming(&body);
        assert!(observed);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn non_streaming_plain_text_emits_per_rune() {
        let body = serde_json::json!({
            "choices": [{"message": {"content": "hi"}}]
        });
        let (events, observed) = run_non_streaming(&body);
        assert!(observed);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn recent_tool_activity_detection() {
        let mut transcript = vec![Message::user("hi")];
        let mut tool_use = Message::assistant("");
        tool_use.tool_call_id = Some("c1".into());
        transcript.push(tool_use);
        transcript.push(Message::tool_result("read_file", "c1", "contents"));
        assert!(has_recent_tool_activity(&transcript));

        let plain = vec![Message::user("hi"), Message::assistant("hello")];
        assert!(!has_recent_tool_activity(&plain));
    }
}
