//! Agent identity, status, and the organization-tree projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved id of the organization's root agent.
pub const ROOT_AGENT_ID: &str = "root";

/// Sender id used for messages originating from the human user.
pub const USER_SENDER_ID: &str = "user";

/// Compute status of an agent.
///
/// The state map itself places no constraints on transitions; the turn
/// driver is the sole enforcer of legal moves between these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// No turn in flight; eligible for scheduling.
    Idle,
    /// A turn is blocked on an outbound LLM call.
    WaitingLlm,
    /// A turn is executing tool calls.
    Processing,
    /// A stop was requested; the current turn is winding down.
    Stopping,
    /// The agent was stopped mid-turn and awaits a resume.
    Stopped,
    /// Termination in progress; the inbox is being drained.
    Terminating,
    /// The agent is dead. Records are kept for history lookups only.
    Terminated,
}

impl AgentStatus {
    /// True while a stop or termination has been requested but not
    /// completed. The turn driver skips remaining tool calls in this state.
    pub fn is_stop_requested(self) -> bool {
        matches!(
            self,
            AgentStatus::Stopping | AgentStatus::Stopped | AgentStatus::Terminating
        )
    }

    /// True when the message processor may pick this agent for a turn.
    pub fn is_schedulable(self) -> bool {
        matches!(
            self,
            AgentStatus::Idle | AgentStatus::WaitingLlm | AgentStatus::Processing
        )
    }

    /// True once the agent can never receive another turn.
    pub fn is_terminated(self) -> bool {
        matches!(self, AgentStatus::Terminated)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Idle => "idle",
            AgentStatus::WaitingLlm => "waiting_llm",
            AgentStatus::Processing => "processing",
            AgentStatus::Stopping => "stopping",
            AgentStatus::Stopped => "stopped",
            AgentStatus::Terminating => "terminating",
            AgentStatus::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// A long-lived entity that owns a conversation with an LLM and acts via
/// tools. Owned by the organization; destroyed only through termination,
/// which preserves the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    /// Unique agent identifier.
    pub agent_id: String,

    /// Id of the role this agent was instantiated from.
    pub role_id: String,

    /// Display name of the role at spawn time.
    pub role_name: String,

    /// Optional custom display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,

    /// Parent agent id; `None` only for the root agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_agent_id: Option<String>,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Timestamp of the agent's last completed activity.
    pub last_activity_at: DateTime<Utc>,

    /// Current compute status.
    pub status: AgentStatus,

    /// Short description of the task this agent is working on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_brief: Option<String>,
}

impl Agent {
    /// Create a fresh agent in `idle` status with current timestamps.
    pub fn new(
        agent_id: impl Into<String>,
        role_id: impl Into<String>,
        role_name: impl Into<String>,
        parent_agent_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.into(),
            role_id: role_id.into(),
            role_name: role_name.into(),
            custom_name: None,
            parent_agent_id,
            created_at: now,
            last_activity_at: now,
            status: AgentStatus::Idle,
            task_brief: None,
        }
    }

    /// True for the reserved root agent.
    pub fn is_root(&self) -> bool {
        self.agent_id == ROOT_AGENT_ID
    }
}

/// Projection of the parent/child forest for UI consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgNode {
    /// Agent id of this node.
    pub agent_id: String,
    /// Role display name.
    pub role_name: String,
    /// Current status.
    pub status: AgentStatus,
    /// Child nodes, ordered by creation.
    pub children: Vec<OrgNode>,
}
