//! Runtime state and lock manager.
//!
//! Tracks per-agent compute status, activity timestamps, the set of agents
//! with a turn in flight, interruption queues, task workspaces, per-agent
//! advisory locks, and per-agent abort tokens. The status map places no
//! constraints on transitions; the turn driver is the sole enforcer.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use polis_types::{AgentStatus, Message};

/// Observer fired on every status change, for UI streaming.
pub type StatusObserver = Box<dyn Fn(&str, AgentStatus) + Send + Sync>;

/// Shared mutable runtime state.
pub struct RuntimeState {
    statuses: Mutex<HashMap<String, AgentStatus>>,
    last_activity: Mutex<HashMap<String, DateTime<Utc>>>,
    active: Mutex<HashSet<String>>,
    interruptions: Mutex<HashMap<String, Vec<Message>>>,
    workspaces: Mutex<HashMap<String, PathBuf>>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    abort_tokens: Mutex<HashMap<String, CancellationToken>>,
    observer: Mutex<Option<StatusObserver>>,
}

impl RuntimeState {
    /// Create empty state.
    pub fn new() -> Self {
        Self {
            statuses: Mutex::new(HashMap::new()),
            last_activity: Mutex::new(HashMap::new()),
            active: Mutex::new(HashSet::new()),
            interruptions: Mutex::new(HashMap::new()),
            workspaces: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            abort_tokens: Mutex::new(HashMap::new()),
            observer: Mutex::new(None),
        }
    }

    /// Install the status observer callback.
    pub fn set_status_observer(&self, observer: StatusObserver) {
        *self.observer.lock().expect("observer lock poisoned") = Some(observer);
    }

    /// Register an agent in `idle` status with a fresh activity stamp.
    pub fn register_agent(&self, agent_id: &str) {
        self.statuses
            .lock()
            .expect("status lock poisoned")
            .insert(agent_id.to_string(), AgentStatus::Idle);
        self.last_activity
            .lock()
            .expect("activity lock poisoned")
            .insert(agent_id.to_string(), Utc::now());
    }

    /// Current status, `None` for unknown agents.
    pub fn status(&self, agent_id: &str) -> Option<AgentStatus> {
        self.statuses
            .lock()
            .expect("status lock poisoned")
            .get(agent_id)
            .copied()
    }

    /// Set the compute status and fire the observer.
    pub fn set_status(&self, agent_id: &str, status: AgentStatus) {
        self.statuses
            .lock()
            .expect("status lock poisoned")
            .insert(agent_id.to_string(), status);
        debug!(agent_id = %agent_id, status = %status, "agent status");
        if let Some(observer) = self.observer.lock().expect("observer lock poisoned").as_ref() {
            observer(agent_id, status);
        }
    }

    /// Stamp the agent's last-activity time.
    pub fn touch_activity(&self, agent_id: &str) {
        self.last_activity
            .lock()
            .expect("activity lock poisoned")
            .insert(agent_id.to_string(), Utc::now());
    }

    /// Last-activity time, `None` for unknown agents.
    pub fn last_activity(&self, agent_id: &str) -> Option<DateTime<Utc>> {
        self.last_activity
            .lock()
            .expect("activity lock poisoned")
            .get(agent_id)
            .copied()
    }

    /// Mark an agent as having a turn in flight. Returns `false` when it
    /// already was active (the caller must not start a second turn).
    pub fn mark_active(&self, agent_id: &str) -> bool {
        self.active
            .lock()
            .expect("active lock poisoned")
            .insert(agent_id.to_string())
    }

    /// Clear the in-flight mark.
    pub fn unmark_active(&self, agent_id: &str) {
        self.active
            .lock()
            .expect("active lock poisoned")
            .remove(agent_id);
    }

    /// Whether a turn is currently in flight for this agent.
    pub fn is_active(&self, agent_id: &str) -> bool {
        self.active
            .lock()
            .expect("active lock poisoned")
            .contains(agent_id)
    }

    /// Number of turns currently in flight.
    pub fn active_count(&self) -> usize {
        self.active.lock().expect("active lock poisoned").len()
    }

    /// Queue a message that arrived while the recipient was mid-turn.
    pub fn push_interruption(&self, agent_id: &str, msg: Message) {
        self.interruptions
            .lock()
            .expect("interruption lock poisoned")
            .entry(agent_id.to_string())
            .or_default()
            .push(msg);
    }

    /// Take every queued interruption for the agent, in arrival order.
    pub fn drain_interruptions(&self, agent_id: &str) -> Vec<Message> {
        self.interruptions
            .lock()
            .expect("interruption lock poisoned")
            .remove(agent_id)
            .unwrap_or_default()
    }

    /// Record the workspace directory for a task.
    pub fn set_workspace(&self, task_id: &str, path: PathBuf) {
        self.workspaces
            .lock()
            .expect("workspace lock poisoned")
            .insert(task_id.to_string(), path);
    }

    /// Workspace directory for a task.
    pub fn workspace_for(&self, task_id: &str) -> Option<PathBuf> {
        self.workspaces
            .lock()
            .expect("workspace lock poisoned")
            .get(task_id)
            .cloned()
    }

    /// Snapshot of the task→workspace map for persistence.
    pub fn snapshot_workspaces(&self) -> HashMap<String, PathBuf> {
        self.workspaces
            .lock()
            .expect("workspace lock poisoned")
            .clone()
    }

    /// Restore the task→workspace map from a snapshot.
    pub fn restore_workspaces(&self, workspaces: HashMap<String, PathBuf>) {
        self.workspaces
            .lock()
            .expect("workspace lock poisoned")
            .extend(workspaces);
    }

    /// Acquire the agent's advisory lock. The returned guard must live for
    /// the duration of the turn; dropping it on every exit path releases
    /// ownership. Different agents' locks are independent.
    pub async fn acquire_lock(&self, agent_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().expect("lock-map lock poisoned");
            locks
                .entry(agent_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// The agent's current abort token (created on first use).
    pub fn abort_token(&self, agent_id: &str) -> CancellationToken {
        self.abort_tokens
            .lock()
            .expect("abort lock poisoned")
            .entry(agent_id.to_string())
            .or_default()
            .clone()
    }

    /// Install a fresh abort token for a new turn and return it.
    pub fn reset_abort_token(&self, agent_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.abort_tokens
            .lock()
            .expect("abort lock poisoned")
            .insert(agent_id.to_string(), token.clone());
        token
    }

    /// Fire the agent's abort token, interrupting any in-flight LLM call.
    pub fn cancel_abort_token(&self, agent_id: &str) {
        if let Some(token) = self
            .abort_tokens
            .lock()
            .expect("abort lock poisoned")
            .get(agent_id)
        {
            token.cancel();
        }
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new()
    }
}
