//! Built-in tools for the polis runtime.
//!
//! Tools are packaged as named groups and registered with the tool
//! executor at runtime init:
//!
//! - `org_management` -- the root agent's surface (`find_role_by_name`,
//!   `create_role`, `spawn_agent_with_task`, `terminate_agent`)
//! - `messaging` -- `send_message`, `wait_for_message`
//! - `artifact` -- `put_artifact`, `get_artifact`
//! - `shell` -- `run_command` (denylist + timeout)
//! - `http` -- `http_request` (HTTPS only)

pub mod artifact_tools;
pub mod command_policy;
pub mod http_tool;
pub mod message_tools;
pub mod org_tools;
pub mod shell_tool;

use std::sync::Arc;

use polis_core::{ToolGroup, ORG_MANAGEMENT_GROUP};

pub use command_policy::CommandPolicy;

/// The full built-in tool surface, ready for registration.
pub fn builtin_tool_groups() -> Vec<ToolGroup> {
    vec![
        ToolGroup::new(
            ORG_MANAGEMENT_GROUP,
            vec![
                Arc::new(org_tools::FindRoleByNameTool),
                Arc::new(org_tools::CreateRoleTool),
                Arc::new(org_tools::SpawnAgentWithTaskTool),
                Arc::new(org_tools::TerminateAgentTool),
            ],
        ),
        ToolGroup::new(
            "messaging",
            vec![
                Arc::new(message_tools::SendMessageTool),
                Arc::new(message_tools::WaitForMessageTool),
            ],
        ),
        ToolGroup::new(
            "artifact",
            vec![
                Arc::new(artifact_tools::PutArtifactTool),
                Arc::new(artifact_tools::GetArtifactTool),
            ],
        ),
        ToolGroup::new(
            "shell",
            vec![Arc::new(shell_tool::RunCommandTool::new(
                CommandPolicy::default(),
            ))],
        ),
        ToolGroup::new("http", vec![Arc::new(http_tool::HttpRequestTool::new())]),
    ]
}
