//! Organization-management tools: the root agent's surface for building
//! out the organization (`find_role_by_name`, `create_role`,
//! `spawn_agent_with_task`, `terminate_agent`).

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use polis_core::{SpawnParams, Tool, ToolCtx, ToolError, ToolOutput};

/// Look up a role by its unique name.
pub struct FindRoleByNameTool;

#[async_trait]
impl Tool for FindRoleByNameTool {
    fn name(&self) -> &str {
        "find_role_by_name"
    }

    fn description(&self) -> &str {
        "按名称查找角色，返回角色信息或 found=false。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "角色名称"
                }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, ctx: &ToolCtx, args: Value) -> Result<ToolOutput, ToolError> {
        let name = args["name"].as_str().unwrap_or_default();
        match ctx.org.find_role_by_name(name) {
            Some(role) => Ok(ToolOutput::value(json!({
                "found": true,
                "roleId": role.role_id,
                "name": role.name,
                "llmServiceId": role.llm_service_id,
            }))),
            None => Ok(ToolOutput::value(json!({ "found": false }))),
        }
    }
}

/// Create a role. When no `llmServiceId` is given the service selector
/// picks one from the catalog based on the role prompt (a `None` answer
/// falls back to the runtime default).
pub struct CreateRoleTool;

#[async_trait]
impl Tool for CreateRoleTool {
    fn name(&self) -> &str {
        "create_role"
    }

    fn description(&self) -> &str {
        "创建新角色：名称、系统提示词、可选工具组与首选 LLM 服务。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "角色名称（组织内唯一）"
                },
                "prompt": {
                    "type": "string",
                    "description": "角色的系统提示词"
                },
                "toolGroups": {
                    "type": "array",
                    "description": "授予的工具组名称列表（可选）"
                },
                "llmServiceId": {
                    "type": "string",
                    "description": "首选 LLM 服务 id（可选）"
                }
            },
            "required": ["name", "prompt"]
        })
    }

    async fn execute(&self, ctx: &ToolCtx, args: Value) -> Result<ToolOutput, ToolError> {
        let name = args["name"].as_str().unwrap_or_default();
        let prompt = args["prompt"].as_str().unwrap_or_default();
        let tool_groups: Option<Vec<String>> = args
            .get("toolGroups")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            });
        let mut llm_service_id = args["llmServiceId"].as_str().map(str::to_string);

        if llm_service_id.is_none() {
            if let Some(selector) = &ctx.selector {
                if let Some(selected) = selector.select_for_prompt(prompt).await {
                    debug!(
                        role = %name,
                        service = %selected.service_id,
                        reason = %selected.reason,
                        "service selected for role"
                    );
                    llm_service_id = Some(selected.service_id);
                }
            }
        }

        let role = ctx.org.create_role(name, prompt, tool_groups, llm_service_id)?;
        Ok(ToolOutput::value(json!({
            "ok": true,
            "roleId": role.role_id,
            "name": role.name,
            "llmServiceId": role.llm_service_id,
        })))
    }
}

/// Spawn an agent from a role, seeded with a task brief.
pub struct SpawnAgentWithTaskTool;

#[async_trait]
impl Tool for SpawnAgentWithTaskTool {
    fn name(&self) -> &str {
        "spawn_agent_with_task"
    }

    fn description(&self) -> &str {
        "从角色派生一个新智能体并下达任务简报。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "roleId": {
                    "type": "string",
                    "description": "角色 id"
                },
                "taskBrief": {
                    "type": "string",
                    "description": "任务简报，作为新智能体的第一条消息"
                },
                "customName": {
                    "type": "string",
                    "description": "自定义显示名（可选）"
                }
            },
            "required": ["roleId"]
        })
    }

    async fn execute(&self, ctx: &ToolCtx, args: Value) -> Result<ToolOutput, ToolError> {
        let agent = ctx.org.spawn_agent(SpawnParams {
            role_id: args["roleId"].as_str().unwrap_or_default().to_string(),
            parent_agent_id: ctx.agent_id.clone(),
            task_brief: args["taskBrief"].as_str().map(str::to_string),
            custom_name: args["customName"].as_str().map(str::to_string),
            task_id: ctx.task_id.clone(),
        })?;
        Ok(ToolOutput::value(json!({
            "ok": true,
            "agentId": agent.agent_id,
            "roleName": agent.role_name,
        })))
    }
}

/// Terminate an agent. The record is preserved; the root agent is
/// protected.
pub struct TerminateAgentTool;

#[async_trait]
impl Tool for TerminateAgentTool {
    fn name(&self) -> &str {
        "terminate_agent"
    }

    fn description(&self) -> &str {
        "终止指定智能体。已排队的消息会被丢弃，记录保留。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agentId": {
                    "type": "string",
                    "description": "要终止的智能体 id"
                }
            },
            "required": ["agentId"]
        })
    }

    async fn execute(&self, ctx: &ToolCtx, args: Value) -> Result<ToolOutput, ToolError> {
        let agent_id = args["agentId"].as_str().unwrap_or_default();
        ctx.org.terminate_agent(agent_id)?;
        Ok(ToolOutput::value(json!({
            "ok": true,
            "agentId": agent_id,
        })))
    }
}
