//! Conversation Store (spec §4.6): durable, append-only per-conversation
//! logs under `<workspace>/.loom/history/<id>.jsonl`.

use crate::error::{LoomError, Result};
use crate::message::{Message, Role};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const TITLE_MAX_CHARS: usize = 50;

/// Summary used when listing conversations (newest-first).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: Option<String>,
    pub message_count: usize,
}

#[derive(Debug, Clone)]
struct ConversationState {
    title: Option<String>,
    messages: Vec<Message>,
}

impl ConversationState {
    fn is_empty(&self) -> bool {
        !self.messages.iter().any(|m| matches!(m.role, Role::User))
    }
}

/// Sole source of truth for message order within a project. In-memory state
/// is always a prefix-equivalent slice of the on-disk log for `current`.
pub struct ConversationStore {
    dir: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    current: Option<String>,
    conversations: BTreeMap<String, ConversationState>,
}

impl ConversationStore {
    /// `dir` is `<workspace>/.loom/history`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let mut conversations = BTreeMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let messages = load_jsonl(&path)?;
            let title = derive_title(&messages);
            conversations.insert(id, ConversationState { title, messages });
        }
        Ok(Self {
            dir,
            inner: Mutex::new(Inner {
                current: None,
                conversations,
            }),
        })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.jsonl"))
    }

    /// Load the current conversation, creating one if none is selected.
    pub fn start_conversation(&self) -> Result<String> {
        let mut inner = self.inner.lock();
        if let Some(id) = inner.current.clone() {
            return Ok(id);
        }
        let id = new_conversation_id();
        inner.conversations.insert(
            id.clone(),
            ConversationState {
                title: None,
                messages: Vec::new(),
            },
        );
        inner.current = Some(id.clone());
        Ok(id)
    }

    pub fn current_id(&self) -> Option<String> {
        self.inner.lock().current.clone()
    }

    pub fn switch(&self, id: impl Into<String>) {
        let mut inner = self.inner.lock();
        let id = id.into();
        inner.conversations.entry(id.clone()).or_insert_with(|| ConversationState {
            title: None,
            messages: Vec::new(),
        });
        inner.current = Some(id);
    }

    fn append(&self, id: &str, message: Message) -> Result<()> {
        let path = self.path_for(id);
        append_jsonl(&path, &message)?;
        let mut inner = self.inner.lock();
        let state = inner
            .conversations
            .entry(id.to_string())
            .or_insert_with(|| ConversationState {
                title: None,
                messages: Vec::new(),
            });
        if state.title.is_none() && matches!(message.role, Role::User) {
            state.title = Some(truncate_title(&message.content));
        }
        state.messages.push(message);
        Ok(())
    }

    pub fn add_user(&self, id: &str, content: impl Into<String>) -> Result<()> {
        self.append(id, Message::user(content))
    }

    pub fn add_assistant(&self, id: &str, content: impl Into<String>) -> Result<()> {
        self.append(id, Message::assistant(content))
    }

    pub fn add_system(&self, id: &str, content: impl Into<String>) -> Result<()> {
        self.append(id, Message::system(content))
    }

    pub fn add_assistant_tool_use(&self, id: &str, tool_name: &str, tool_call_id: &str) -> Result<()> {
        self.append(id, Message::assistant_tool_use(tool_name, tool_call_id))
    }

    pub fn add_tool_result(
        &self,
        id: &str,
        tool_name: &str,
        tool_call_id: &str,
        content: impl Into<String>,
    ) -> Result<()> {
        self.append(id, Message::tool_result(tool_name, tool_call_id, content))
    }

    /// Replace the head system message with `text`, preserving its position
    /// as the conversation's single head entry (spec §8 property 2).
    pub fn update_system_message(&self, id: &str, text: impl Into<String>) -> Result<()> {
        let mut inner = self.inner.lock();
        let state = inner
            .conversations
            .entry(id.to_string())
            .or_insert_with(|| ConversationState {
                title: None,
                messages: Vec::new(),
            });
        if let Some(first) = state.messages.first_mut() {
            if matches!(first.role, Role::System) {
                first.content = text.into();
                drop(inner);
                return self.rewrite(id);
            }
        }
        let msg = Message::system(text);
        state.messages.insert(0, msg);
        drop(inner);
        self.rewrite(id)
    }

    fn rewrite(&self, id: &str) -> Result<()> {
        let inner = self.inner.lock();
        let state = inner.conversations.get(id).ok_or_else(|| {
            LoomError::Configuration(format!("unknown conversation {id}"))
        })?;
        let path = self.path_for(id);
        let tmp = path.with_extension("jsonl.tmp");
        {
            use std::io::Write;
            let mut f = std::fs::File::create(&tmp)?;
            for m in &state.messages {
                writeln!(f, "{}", serde_json::to_string(m)?)?;
            }
        }
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn history(&self, id: &str) -> Vec<Message> {
        self.inner
            .lock()
            .conversations
            .get(id)
            .map(|s| s.messages.clone())
            .unwrap_or_default()
    }

    pub fn title(&self, id: &str) -> Option<String> {
        self.inner.lock().conversations.get(id).and_then(|s| s.title.clone())
    }

    /// Truncate the log and append a "cleared" marker (spec §4.6).
    pub fn clear(&self, id: &str) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if let Some(state) = inner.conversations.get_mut(id) {
                state.messages.clear();
                state.title = None;
            }
        }
        let path = self.path_for(id);
        std::fs::write(&path, "")?;
        self.add_system(id, "Conversation cleared.")
    }

    /// List summaries newest-first (lexicographic-descending timestamped ids).
    pub fn list(&self) -> Vec<ConversationSummary> {
        let inner = self.inner.lock();
        let mut out: Vec<_> = inner
            .conversations
            .iter()
            .map(|(id, s)| ConversationSummary {
                id: id.clone(),
                title: s.title.clone(),
                message_count: s.messages.len(),
            })
            .collect();
        out.sort_by(|a, b| b.id.cmp(&a.id));
        out
    }

    /// Garbage-collect empty, non-current conversations (spec §4.6).
    /// A conversation is "empty" iff it has zero user messages; the
    /// currently selected conversation is preserved unconditionally.
    pub fn cleanup_empty_conversations(&self, except_id: &str) -> Result<()> {
        let to_remove: Vec<String> = {
            let inner = self.inner.lock();
            inner
                .conversations
                .iter()
                .filter(|(id, state)| id.as_str() != except_id && state.is_empty())
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in &to_remove {
            let path = self.path_for(id);
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            self.inner.lock().conversations.remove(id);
        }
        Ok(())
    }
}

fn new_conversation_id() -> String {
    chrono::Utc::now().format("%Y-%m-%d-%H%M%S%3f").to_string()
}

fn truncate_title(text: &str) -> String {
    let mut t: String = text.chars().take(TITLE_MAX_CHARS).collect();
    if text.chars().count() > TITLE_MAX_CHARS {
        t.push('\u{2026}');
    }
    t
}

fn derive_title(messages: &[Message]) -> Option<String> {
    messages
        .iter()
        .find(|m| matches!(m.role, Role::User))
        .map(|m| truncate_title(&m.content))
}

fn load_jsonl(path: &Path) -> Result<Vec<Message>> {
    let content = std::fs::read_to_string(path)?;
    let mut out = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(line)?);
    }
    Ok(out)
}

fn append_jsonl(path: &Path, message: &Message) -> Result<()> {
    use std::io::Write;
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(f, "{}", serde_json::to_string(message)?)?;
    Ok(())
}

pub type SharedConversationStore = Arc<ConversationStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_persists_exact_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path()).unwrap();
        let id = store.start_conversation().unwrap();
        store.add_system(&id, "sys").unwrap();
        store.add_user(&id, "hello").unwrap();
        store.add_assistant(&id, "hi").unwrap();

        let reloaded = ConversationStore::new(dir.path()).unwrap();
        let history = reloaded.history(&id);
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].content, "hello");
    }

    #[test]
    fn head_is_always_single_system_message() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path()).unwrap();
        let id = store.start_conversation().unwrap();
        store.update_system_message(&id, "v1").unwrap();
        store.add_user(&id, "hi").unwrap();
        store.update_system_message(&id, "v2").unwrap();

        let history = store.history(&id);
        assert_eq!(history.len(), 2);
        assert!(matches!(history[0].role, Role::System));
        assert_eq!(history[0].content, "v2");
    }

    #[test]
    fn cleanup_preserves_current_even_if_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path()).unwrap();
        let current = store.start_conversation().unwrap();
        store.switch("stale-empty");
        store.switch(current.clone());

        store.cleanup_empty_conversations(&current).unwrap();
        // stale-empty had zero user messages and is not current: removed.
        assert!(!store.list().iter().any(|c| c.id == "stale-empty"));
        // current is preserved even though it is also empty.
        assert!(store.list().iter().any(|c| c.id == current));
    }

    #[test]
    fn title_truncated_from_first_user_message() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path()).unwrap();
        let id = store.start_conversation().unwrap();
        let long = "x".repeat(80);
        store.add_user(&id, long).unwrap();
        let title = store.title(&id).unwrap();
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 1);
    }
}
