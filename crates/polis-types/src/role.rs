//! Role templates from which agents are instantiated.

use serde::{Deserialize, Serialize};

/// A named template: system prompt, tool permissions, and an optional
/// preferred LLM service. Names are unique within the organization.
/// Renames and prompt edits are allowed; agents of the role observe
/// updates on their next turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    /// Unique role identifier.
    pub role_id: String,

    /// Display name, unique within the organization.
    pub name: String,

    /// System prompt text for agents of this role.
    pub prompt: String,

    /// Tool groups granted to agents of this role. `None` grants every
    /// non-root tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_groups: Option<Vec<String>>,

    /// Preferred LLM service id; `None` falls back to selection or the
    /// runtime default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_service_id: Option<String>,
}

impl Role {
    /// Create a role with a generated id.
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            role_id: format!("role-{}", uuid::Uuid::new_v4()),
            name: name.into(),
            prompt: prompt.into(),
            tool_groups: None,
            llm_service_id: None,
        }
    }
}
