//! Snapshot persistence.
//!
//! On an interval and at shutdown the runtime snapshots roles, agents
//! (with their parent/child edges), conversations, the task→workspace
//! map, and pending inboxes to a JSON file in the runtime directory.
//! Restore happens at init, before any submission is accepted. A missing
//! snapshot is a fresh start; a corrupt one is a fatal boot error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use polis_llm::ChatMessage;
use polis_types::{Agent, Message, PolisError, Result, Role};

use crate::bus::MessageBus;
use crate::conversation::ConversationManager;
use crate::org::Organization;
use crate::state::RuntimeState;

/// Everything the runtime persists between boots.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// All roles.
    pub roles: Vec<Role>,
    /// All agents, including terminated records.
    pub agents: Vec<Agent>,
    /// Per-agent conversations.
    pub conversations: HashMap<String, Vec<ChatMessage>>,
    /// Task → workspace directory map.
    pub workspaces: HashMap<String, PathBuf>,
    /// Pending inbox messages per recipient.
    pub inboxes: HashMap<String, Vec<Message>>,
}

impl Snapshot {
    /// Capture the current runtime state.
    pub fn capture(
        org: &Organization,
        conversations: &ConversationManager,
        state: &RuntimeState,
        bus: &MessageBus,
    ) -> Self {
        let (roles, agents) = org.snapshot();
        Self {
            roles,
            agents,
            conversations: conversations.snapshot_all(),
            workspaces: state.snapshot_workspaces(),
            inboxes: bus.snapshot_inboxes(),
        }
    }

    /// Apply a snapshot onto freshly constructed components.
    pub fn restore(
        self,
        org: &Organization,
        conversations: &ConversationManager,
        state: &RuntimeState,
        bus: &MessageBus,
    ) {
        org.restore(self.roles, self.agents);
        conversations.restore_all(self.conversations);
        state.restore_workspaces(self.workspaces);
        bus.restore_inboxes(self.inboxes);
    }
}

/// Reads and writes the snapshot file.
pub struct Persister {
    path: PathBuf,
}

impl Persister {
    /// Snapshot file inside the runtime directory.
    pub fn new(runtime_dir: &Path) -> Self {
        Self {
            path: runtime_dir.join("snapshot.json"),
        }
    }

    /// The snapshot file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a snapshot atomically (temp file + rename).
    pub async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), "snapshot saved");
        Ok(())
    }

    /// Load the snapshot. `Ok(None)` when no snapshot exists; a snapshot
    /// that exists but fails to parse is fatal.
    pub async fn load(&self) -> Result<Option<Snapshot>> {
        let bytes = match fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PolisError::Io(e)),
        };
        let snapshot =
            serde_json::from_slice(&bytes).map_err(|e| PolisError::SnapshotCorrupt {
                reason: format!("{}: {e}", self.path.display()),
            })?;
        info!(path = %self.path.display(), "snapshot restored");
        Ok(Some(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use polis_llm::ServiceRegistry;
    use polis_types::ROOT_AGENT_ID;

    use crate::org::SpawnParams;

    fn components() -> (
        Arc<MessageBus>,
        Arc<RuntimeState>,
        Arc<Organization>,
        Arc<ConversationManager>,
    ) {
        let bus = Arc::new(MessageBus::new());
        let state = Arc::new(RuntimeState::new());
        let registry = Arc::new(ServiceRegistry::new());
        let org = Arc::new(Organization::new(bus.clone(), state.clone(), registry));
        let conversations = Arc::new(ConversationManager::new());
        (bus, state, org, conversations)
    }

    #[tokio::test]
    async fn save_load_roundtrip_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let (bus, state, org, conversations) = components();
        org.ensure_root("root prompt");
        let role = org.create_role("chef", "你做饭。", None, None).unwrap();
        let agent = org
            .spawn_agent(SpawnParams {
                role_id: role.role_id.clone(),
                parent_agent_id: ROOT_AGENT_ID.into(),
                task_brief: Some("做一桌菜".into()),
                ..Default::default()
            })
            .unwrap();
        conversations.append(&agent.agent_id, ChatMessage::user("hello"));
        state.set_workspace("task-1", dir.path().join("ws"));
        bus.send(Message::new("user", ROOT_AGENT_ID, "pending"));

        let persister = Persister::new(dir.path());
        let snapshot = Snapshot::capture(&org, &conversations, &state, &bus);
        persister.save(&snapshot).await.unwrap();

        let (bus2, state2, org2, conversations2) = components();
        let loaded = persister.load().await.unwrap().expect("snapshot exists");
        loaded.restore(&org2, &conversations2, &state2, &bus2);

        assert!(org2.find_role_by_name("chef").is_some());
        assert_eq!(org2.list_agents().len(), 2);
        let restored_agent = org2.agent(&agent.agent_id).unwrap();
        assert_eq!(restored_agent.task_brief.as_deref(), Some("做一桌菜"));
        assert_eq!(
            restored_agent.parent_agent_id.as_deref(),
            Some(ROOT_AGENT_ID)
        );
        assert_eq!(conversations2.len(&agent.agent_id), 1);
        assert_eq!(state2.workspace_for("task-1"), Some(dir.path().join("ws")));
        // Seed message for the spawned agent + the pending root message.
        assert_eq!(bus2.inbox_size(ROOT_AGENT_ID), 1);
        assert_eq!(bus2.inbox_size(&agent.agent_id), 1);
    }

    #[tokio::test]
    async fn missing_snapshot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let persister = Persister::new(dir.path());
        assert!(persister.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let persister = Persister::new(dir.path());
        tokio::fs::write(persister.path(), b"{not json").await.unwrap();

        let err = persister.load().await.unwrap_err();
        assert!(matches!(err, PolisError::SnapshotCorrupt { .. }));
    }
}
