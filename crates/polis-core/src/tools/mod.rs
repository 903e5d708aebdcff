//! Tool executor: the [`Tool`] trait, named tool groups, the per-agent
//! permission filter, and dispatch-by-name execution.
//!
//! Tools are registered in named groups; a tool name may appear in exactly
//! one group. Permissions:
//!
//! - the `root` agent may call only the org-management surface
//!   (`find_role_by_name`, `create_role`, `spawn_agent_with_task`,
//!   `terminate_agent`, `send_message`);
//! - any other agent gets the union of its role's `tool_groups`, or every
//!   tool outside the [`ORG_MANAGEMENT_GROUP`] when the role declares none.
//!
//! Arguments are validated against the tool's JSON-schema `parameters`
//! before the handler runs. Tool side effects (bus sends, organization
//! mutations, artifact writes) go through the shared handles in
//! [`ToolCtx`] and are visible to subsequent tool calls and later turns.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use polis_llm::{LlmError, ServiceSelector};
use polis_types::{AgentStatus, Message, PolisError, ROOT_AGENT_ID};

use crate::artifact::ArtifactStore;
use crate::bus::MessageBus;
use crate::org::Organization;
use crate::state::RuntimeState;

/// Name of the root-only tool group.
pub const ORG_MANAGEMENT_GROUP: &str = "org_management";

/// The tools the root agent may call.
pub const ROOT_TOOL_NAMES: [&str; 5] = [
    "find_role_by_name",
    "create_role",
    "spawn_agent_with_task",
    "terminate_agent",
    "send_message",
];

/// Error type for tool execution.
#[derive(Error, Debug)]
pub enum ToolError {
    /// The requested tool is not registered.
    #[error("unknown tool: {0}")]
    Unknown(String),

    /// The arguments did not match the tool's schema.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// The calling agent may not invoke this tool.
    #[error("tool not permitted: {0}")]
    NotPermitted(String),

    /// A domain failure bubbled up from the runtime.
    #[error(transparent)]
    Domain(#[from] PolisError),

    /// An LLM-layer failure bubbled up from a tool that calls the client.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// A tool-specific failure with its own stable code.
    #[error("{message}")]
    Failed {
        /// Stable snake_case code (e.g. `command_timeout`).
        code: &'static str,
        /// Human-readable description.
        message: String,
    },
}

impl ToolError {
    /// Stable snake_case code surfaced in `tool` turns and HTTP bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::Unknown(_) => "unknown_tool",
            ToolError::InvalidArgs(_) => "invalid_args",
            ToolError::NotPermitted(_) => "tool_not_permitted",
            ToolError::Domain(e) => e.code(),
            ToolError::Llm(e) => e.code(),
            ToolError::Failed { code, .. } => code,
        }
    }

    /// Structured JSON error object appended as a `tool` turn.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        })
    }
}

/// Result of a successful tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// The JSON value returned to the LLM.
    pub value: Value,
    /// When set, the turn ends after this call without another LLM round
    /// (used by `wait_for_message`).
    pub end_turn: bool,
}

impl ToolOutput {
    /// A normal result.
    pub fn value(value: Value) -> Self {
        Self {
            value,
            end_turn: false,
        }
    }

    /// A result that voluntarily ends the turn.
    pub fn end_turn(value: Value) -> Self {
        Self {
            value,
            end_turn: true,
        }
    }
}

/// Execution context handed to every tool handler.
///
/// Carries the calling agent, the current task, and the shared runtime
/// handles. This shape is fixed and minimal; tools needing anything else
/// capture it at construction.
#[derive(Clone)]
pub struct ToolCtx {
    /// The calling agent's id.
    pub agent_id: String,
    /// Task the calling agent's current message belongs to, when known.
    pub task_id: Option<String>,
    /// Message bus handle.
    pub bus: Arc<MessageBus>,
    /// Runtime state handle.
    pub state: Arc<RuntimeState>,
    /// Organization handle.
    pub org: Arc<Organization>,
    /// Artifact store handle.
    pub artifacts: Arc<ArtifactStore>,
    /// Service selector, when the runtime has one configured.
    pub selector: Option<Arc<ServiceSelector>>,
}

impl ToolCtx {
    /// Deliver a message with interruption routing: recipients mid-turn
    /// get the message queued as an interruption; terminated recipients
    /// drop it; everyone else gets normal inbox delivery.
    pub fn deliver(&self, msg: Message) -> Message {
        deliver_message(&self.state, &self.bus, msg)
    }
}

/// Shared delivery path used by tools and the runtime coordinator.
pub fn deliver_message(state: &RuntimeState, bus: &MessageBus, mut msg: Message) -> Message {
    if msg.id.is_empty() {
        msg.id = uuid::Uuid::new_v4().to_string();
    }
    match state.status(&msg.to) {
        Some(AgentStatus::Terminated) => {
            warn!(to = %msg.to, msg_id = %msg.id, "dropping message to terminated agent");
            msg
        }
        _ if state.is_active(&msg.to) => {
            debug!(to = %msg.to, msg_id = %msg.id, "recipient mid-turn, queueing interruption");
            msg.timestamp = chrono::Utc::now();
            state.push_interruption(&msg.to, msg.clone());
            msg
        }
        _ => bus.send(msg),
    }
}

/// A tool invocable by agents.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name (used in LLM function calling).
    fn name(&self) -> &str;

    /// Human-readable description for the LLM.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters(&self) -> Value;

    /// Execute with validated arguments.
    async fn execute(&self, ctx: &ToolCtx, args: Value) -> Result<ToolOutput, ToolError>;
}

/// A named collection of tools co-granted by role configuration.
pub struct ToolGroup {
    /// Group name referenced by `Role::tool_groups`.
    pub name: String,
    /// The tools in this group.
    pub tools: Vec<Arc<dyn Tool>>,
}

impl ToolGroup {
    /// Create a group.
    pub fn new(name: impl Into<String>, tools: Vec<Arc<dyn Tool>>) -> Self {
        Self {
            name: name.into(),
            tools,
        }
    }
}

/// Registry of tool groups with per-agent permission filtering.
pub struct ToolExecutor {
    org: Arc<Organization>,
    tools: HashMap<String, Arc<dyn Tool>>,
    groups: Vec<(String, Vec<String>)>,
}

impl ToolExecutor {
    /// Create an executor with no tools registered.
    pub fn new(org: Arc<Organization>) -> Self {
        Self {
            org,
            tools: HashMap::new(),
            groups: Vec::new(),
        }
    }

    /// Register a tool group. A tool name may appear in exactly one group;
    /// duplicates are rejected.
    pub fn register_group(&mut self, group: ToolGroup) -> polis_types::Result<()> {
        for tool in &group.tools {
            if self.tools.contains_key(tool.name()) {
                return Err(PolisError::ConfigInvalid {
                    reason: format!(
                        "tool '{}' registered twice (group '{}')",
                        tool.name(),
                        group.name
                    ),
                });
            }
        }
        let names: Vec<String> = group.tools.iter().map(|t| t.name().to_string()).collect();
        for tool in group.tools {
            debug!(tool = %tool.name(), group = %group.name, "registering tool");
            self.tools.insert(tool.name().to_string(), tool);
        }
        self.groups.push((group.name, names));
        Ok(())
    }

    /// Names of every registered tool, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool names in one group.
    fn group_tools(&self, group_name: &str) -> Vec<String> {
        self.groups
            .iter()
            .find(|(name, _)| name == group_name)
            .map(|(_, tools)| tools.clone())
            .unwrap_or_default()
    }

    /// The tool names an agent is permitted to call, sorted.
    pub fn allowed_tool_names(&self, agent_id: &str) -> Vec<String> {
        let mut names: Vec<String> = if agent_id == ROOT_AGENT_ID {
            ROOT_TOOL_NAMES
                .iter()
                .filter(|n| self.tools.contains_key(**n))
                .map(|n| n.to_string())
                .collect()
        } else {
            let role = self
                .org
                .agent(agent_id)
                .and_then(|agent| self.org.role(&agent.role_id));
            match role.and_then(|r| r.tool_groups) {
                Some(groups) => {
                    let mut names = Vec::new();
                    for group in groups {
                        for name in self.group_tools(&group) {
                            if !names.contains(&name) {
                                names.push(name);
                            }
                        }
                    }
                    names
                }
                None => {
                    // No declared groups: every tool outside the
                    // root-only org-management group.
                    let restricted = self.group_tools(ORG_MANAGEMENT_GROUP);
                    self.tools
                        .keys()
                        .filter(|name| !restricted.contains(name))
                        .cloned()
                        .collect()
                }
            }
        };
        names.sort();
        names
    }

    /// Whether the agent may call the named tool.
    pub fn is_tool_available_for_agent(&self, agent_id: &str, tool_name: &str) -> bool {
        self.allowed_tool_names(agent_id)
            .iter()
            .any(|n| n == tool_name)
    }

    /// OpenAI function-calling schemas for the agent's permitted tools,
    /// sorted by name for deterministic output.
    pub fn definitions_for_agent(&self, agent_id: &str) -> Vec<Value> {
        self.allowed_tool_names(agent_id)
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": tool.name(),
                        "description": tool.description(),
                        "parameters": tool.parameters(),
                    }
                })
            })
            .collect()
    }

    /// Execute one tool call for the context's agent.
    ///
    /// Lookup happens before the permission check, so `unknown_tool` wins
    /// over `tool_not_permitted` for unregistered names.
    pub async fn execute_tool_call(
        &self,
        ctx: &ToolCtx,
        name: &str,
        args: Value,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;

        if !self.is_tool_available_for_agent(&ctx.agent_id, name) {
            return Err(ToolError::NotPermitted(name.to_string()));
        }

        validate_args(&tool.parameters(), &args)?;

        debug!(agent_id = %ctx.agent_id, tool = %name, "executing tool");
        tool.execute(ctx, args).await
    }
}

/// Validate `args` against a JSON-schema `parameters` object: required
/// fields must be present and declared primitive types must match.
fn validate_args(schema: &Value, args: &Value) -> Result<(), ToolError> {
    let Some(args_obj) = args.as_object() else {
        return Err(ToolError::InvalidArgs("arguments must be an object".into()));
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !args_obj.contains_key(field) {
                return Err(ToolError::InvalidArgs(format!(
                    "missing required field: {field}"
                )));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, value) in args_obj {
            let Some(expected) = properties.get(key).and_then(|p| p.get("type")).and_then(Value::as_str)
            else {
                continue;
            };
            let ok = match expected {
                "string" => value.is_string(),
                "number" => value.is_number(),
                "integer" => value.is_i64() || value.is_u64(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !ok && !value.is_null() {
                return Err(ToolError::InvalidArgs(format!(
                    "field '{key}' must be of type {expected}"
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use polis_llm::ServiceRegistry;
    use polis_types::Role;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo back the input text"
        }
        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Text to echo" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, _ctx: &ToolCtx, args: Value) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::value(json!({ "output": args["text"] })))
        }
    }

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "A named test tool"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _ctx: &ToolCtx, _args: Value) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::value(json!({"ran": self.0})))
        }
    }

    async fn fixture() -> (ToolExecutor, ToolCtx, Arc<Organization>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(MessageBus::new());
        let state = Arc::new(RuntimeState::new());
        let registry = Arc::new(ServiceRegistry::new());
        let org = Arc::new(Organization::new(bus.clone(), state.clone(), registry));
        org.ensure_root("root");
        let artifacts = Arc::new(ArtifactStore::open(dir.path()).await.unwrap());

        let mut executor = ToolExecutor::new(org.clone());
        executor
            .register_group(ToolGroup::new(
                ORG_MANAGEMENT_GROUP,
                vec![
                    Arc::new(NamedTool("find_role_by_name")),
                    Arc::new(NamedTool("create_role")),
                    Arc::new(NamedTool("spawn_agent_with_task")),
                    Arc::new(NamedTool("terminate_agent")),
                ],
            ))
            .unwrap();
        executor
            .register_group(ToolGroup::new(
                "messaging",
                vec![Arc::new(NamedTool("send_message")), Arc::new(NamedTool("wait_for_message"))],
            ))
            .unwrap();
        executor
            .register_group(ToolGroup::new(
                "artifact",
                vec![Arc::new(NamedTool("put_artifact")), Arc::new(NamedTool("get_artifact"))],
            ))
            .unwrap();
        executor
            .register_group(ToolGroup::new("misc", vec![Arc::new(EchoTool)]))
            .unwrap();

        let ctx = ToolCtx {
            agent_id: ROOT_AGENT_ID.into(),
            task_id: None,
            bus,
            state,
            org: org.clone(),
            artifacts,
            selector: None,
        };
        (executor, ctx, org, dir)
    }

    fn spawn_with_role(org: &Organization, role: &Role) -> String {
        org.spawn_agent(crate::org::SpawnParams {
            role_id: role.role_id.clone(),
            parent_agent_id: ROOT_AGENT_ID.into(),
            ..Default::default()
        })
        .unwrap()
        .agent_id
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let (mut executor, _ctx, _org, _dir) = fixture().await;
        let err = executor
            .register_group(ToolGroup::new("dup", vec![Arc::new(EchoTool)]))
            .unwrap_err();
        assert!(err.to_string().contains("echo"));
    }

    #[tokio::test]
    async fn root_gets_exactly_the_org_surface() {
        let (executor, _ctx, _org, _dir) = fixture().await;
        let allowed = executor.allowed_tool_names(ROOT_AGENT_ID);
        assert_eq!(
            allowed,
            vec![
                "create_role",
                "find_role_by_name",
                "send_message",
                "spawn_agent_with_task",
                "terminate_agent",
            ]
        );
        assert!(executor.is_tool_available_for_agent(ROOT_AGENT_ID, "create_role"));
        assert!(!executor.is_tool_available_for_agent(ROOT_AGENT_ID, "put_artifact"));
        assert!(!executor.is_tool_available_for_agent(ROOT_AGENT_ID, "echo"));
    }

    #[tokio::test]
    async fn role_with_groups_gets_their_union() {
        let (executor, _ctx, org, _dir) = fixture().await;
        let role = org
            .create_role("archivist", "存档", Some(vec!["artifact".into()]), None)
            .unwrap();
        let agent_id = spawn_with_role(&org, &role);

        assert!(executor.is_tool_available_for_agent(&agent_id, "put_artifact"));
        assert!(executor.is_tool_available_for_agent(&agent_id, "get_artifact"));
        assert!(!executor.is_tool_available_for_agent(&agent_id, "echo"));
        assert!(!executor.is_tool_available_for_agent(&agent_id, "create_role"));
    }

    #[tokio::test]
    async fn role_without_groups_gets_all_non_root_tools() {
        let (executor, _ctx, org, _dir) = fixture().await;
        let role = org.create_role("generalist", "干活", None, None).unwrap();
        let agent_id = spawn_with_role(&org, &role);

        let allowed = executor.allowed_tool_names(&agent_id);
        assert!(allowed.contains(&"echo".to_string()));
        assert!(allowed.contains(&"send_message".to_string()));
        assert!(allowed.contains(&"put_artifact".to_string()));
        assert!(!allowed.contains(&"create_role".to_string()));
        assert!(!allowed.contains(&"terminate_agent".to_string()));
    }

    #[tokio::test]
    async fn unknown_tool_wins_over_permission() {
        let (executor, ctx, _org, _dir) = fixture().await;
        let err = executor
            .execute_tool_call(&ctx, "nonexistent", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unknown_tool");
    }

    #[tokio::test]
    async fn not_permitted_for_restricted_tool() {
        let (executor, ctx, _org, _dir) = fixture().await;
        // Root calling echo (outside its surface).
        let err = executor
            .execute_tool_call(&ctx, "echo", json!({"text": "hi"}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "tool_not_permitted");
    }

    #[tokio::test]
    async fn schema_validation_rejects_bad_args() {
        let (executor, mut ctx, org, _dir) = fixture().await;
        let role = org.create_role("generalist", "x", None, None).unwrap();
        ctx.agent_id = spawn_with_role(&org, &role);

        let err = executor
            .execute_tool_call(&ctx, "echo", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_args");
        assert!(err.to_string().contains("text"));

        let err = executor
            .execute_tool_call(&ctx, "echo", json!({"text": 42}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_args");

        let err = executor
            .execute_tool_call(&ctx, "echo", json!("not an object"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_args");
    }

    #[tokio::test]
    async fn successful_execution_returns_value() {
        let (executor, mut ctx, org, _dir) = fixture().await;
        let role = org.create_role("generalist", "x", None, None).unwrap();
        ctx.agent_id = spawn_with_role(&org, &role);

        let output = executor
            .execute_tool_call(&ctx, "echo", json!({"text": "hello"}))
            .await
            .unwrap();
        assert_eq!(output.value["output"], "hello");
        assert!(!output.end_turn);
    }

    #[tokio::test]
    async fn definitions_are_openai_shaped_and_sorted() {
        let (executor, _ctx, org, _dir) = fixture().await;
        let role = org
            .create_role("archivist", "x", Some(vec!["artifact".into()]), None)
            .unwrap();
        let agent_id = spawn_with_role(&org, &role);

        let defs = executor.definitions_for_agent(&agent_id);
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0]["type"], "function");
        assert_eq!(defs[0]["function"]["name"], "get_artifact");
        assert_eq!(defs[1]["function"]["name"], "put_artifact");
    }

    #[tokio::test]
    async fn deliver_routes_by_recipient_state() {
        let (_executor, ctx, org, _dir) = fixture().await;
        let role = org.create_role("r", "x", None, None).unwrap();
        let busy = spawn_with_role(&org, &role);
        let idle = spawn_with_role(&org, &role);
        let dead = spawn_with_role(&org, &role);
        org.terminate_agent(&dead).unwrap();

        ctx.state.mark_active(&busy);

        ctx.deliver(Message::new("root", busy.clone(), "interrupt"));
        ctx.deliver(Message::new("root", idle.clone(), "normal"));
        ctx.deliver(Message::new("root", dead.clone(), "dropped"));

        assert_eq!(ctx.bus.inbox_size(&busy), 0);
        assert_eq!(ctx.state.drain_interruptions(&busy).len(), 1);
        assert_eq!(ctx.bus.inbox_size(&idle), 1);
        assert_eq!(ctx.bus.inbox_size(&dead), 0);
    }

    #[test]
    fn validate_args_accepts_matching_types() {
        let schema = json!({
            "type": "object",
            "properties": {
                "s": {"type": "string"},
                "n": {"type": "number"},
                "i": {"type": "integer"},
                "b": {"type": "boolean"},
                "a": {"type": "array"},
                "o": {"type": "object"}
            },
            "required": ["s"]
        });
        let args = json!({"s": "x", "n": 1.5, "i": 3, "b": true, "a": [], "o": {}});
        assert!(validate_args(&schema, &args).is_ok());

        // Extra undeclared fields are tolerated.
        let args = json!({"s": "x", "extra": "anything"});
        assert!(validate_args(&schema, &args).is_ok());
    }

    #[test]
    fn error_json_shape() {
        let err = ToolError::Unknown("mystery".into());
        let v = err.to_json();
        assert_eq!(v["error"]["code"], "unknown_tool");
        assert!(v["error"]["message"].as_str().unwrap().contains("mystery"));
    }
}
