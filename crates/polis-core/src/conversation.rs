//! Per-agent conversation history.
//!
//! The manager owns one ordered turn sequence per agent: a `system` turn,
//! then alternating `user` / `assistant` / `tool` turns. An optional
//! compressor hook can rewrite a conversation in place; its contract is
//! "receives current history, returns replacement history, never raises" --
//! any error it does produce is logged and swallowed.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::warn;

use polis_llm::ChatMessage;

/// Pluggable conversation compaction strategy.
pub trait ConversationCompressor: Send + Sync {
    /// Produce a replacement history for the given one.
    fn compress(&self, turns: Vec<ChatMessage>) -> Result<Vec<ChatMessage>, String>;
}

/// Owns every agent's conversation.
pub struct ConversationManager {
    conversations: Mutex<HashMap<String, Vec<ChatMessage>>>,
    compressor: Mutex<Option<Box<dyn ConversationCompressor>>>,
}

impl ConversationManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
            compressor: Mutex::new(None),
        }
    }

    /// Install the compaction hook.
    pub fn set_compressor(&self, compressor: Box<dyn ConversationCompressor>) {
        *self.compressor.lock().expect("compressor lock poisoned") = Some(compressor);
    }

    /// Append a turn to an agent's conversation.
    pub fn append(&self, agent_id: &str, turn: ChatMessage) {
        self.conversations
            .lock()
            .expect("conversation lock poisoned")
            .entry(agent_id.to_string())
            .or_default()
            .push(turn);
    }

    /// Insert or refresh the leading `system` turn so prompt edits on the
    /// role are observed on the agent's next turn.
    pub fn ensure_system(&self, agent_id: &str, prompt: &str) {
        let mut guard = self.conversations.lock().expect("conversation lock poisoned");
        let turns = guard.entry(agent_id.to_string()).or_default();
        match turns.first_mut() {
            Some(first) if first.role == "system" => {
                first.content = prompt.into();
            }
            _ => turns.insert(0, ChatMessage::system(prompt.to_string())),
        }
    }

    /// Copy of an agent's conversation. Unknown agents yield an empty vec.
    pub fn snapshot(&self, agent_id: &str) -> Vec<ChatMessage> {
        self.conversations
            .lock()
            .expect("conversation lock poisoned")
            .get(agent_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Replace an agent's conversation wholesale (compaction).
    pub fn replace(&self, agent_id: &str, turns: Vec<ChatMessage>) {
        self.conversations
            .lock()
            .expect("conversation lock poisoned")
            .insert(agent_id.to_string(), turns);
    }

    /// Number of turns in an agent's conversation.
    pub fn len(&self, agent_id: &str) -> usize {
        self.conversations
            .lock()
            .expect("conversation lock poisoned")
            .get(agent_id)
            .map(|t| t.len())
            .unwrap_or(0)
    }

    /// Run the compaction hook over one agent's conversation. A missing
    /// compressor or missing conversation is a no-op; a failing compressor
    /// is logged and leaves the conversation untouched.
    pub fn process_auto_compression(&self, agent_id: &str) {
        let guard = self.compressor.lock().expect("compressor lock poisoned");
        let Some(compressor) = guard.as_ref() else {
            return;
        };
        let current = {
            let conversations = self.conversations.lock().expect("conversation lock poisoned");
            match conversations.get(agent_id) {
                Some(turns) => turns.clone(),
                None => return,
            }
        };
        match compressor.compress(current) {
            Ok(replacement) => self.replace(agent_id, replacement),
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "conversation compression failed, keeping history");
            }
        }
    }

    /// Snapshot every conversation for persistence.
    pub fn snapshot_all(&self) -> HashMap<String, Vec<ChatMessage>> {
        self.conversations
            .lock()
            .expect("conversation lock poisoned")
            .clone()
    }

    /// Restore conversations from a snapshot.
    pub fn restore_all(&self, conversations: HashMap<String, Vec<ChatMessage>>) {
        self.conversations
            .lock()
            .expect("conversation lock poisoned")
            .extend(conversations);
    }
}

impl Default for ConversationManager {
    fn default() -> Self {
        Self::new()
    }
}
