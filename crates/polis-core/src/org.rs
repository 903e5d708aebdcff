//! The organization: role catalog, agent registry, and the parent/child
//! forest.
//!
//! Agents are stored by id and refer to each other by id only, so the
//! graph cannot form reference cycles. Mutations take a coarse write lock;
//! reads may observe an in-progress spawn but never a torn parent pointer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, warn};
use uuid::Uuid;

use polis_llm::ServiceRegistry;
use polis_types::{
    Agent, AgentStatus, Direction, Message, Modality, OrgNode, PolisError, Result, Role,
    ROOT_AGENT_ID,
};

use crate::bus::MessageBus;
use crate::state::RuntimeState;

/// Hook invoked with the agent id just before an agent is marked
/// terminated.
pub type ShutdownHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Parameters for [`Organization::spawn_agent`].
#[derive(Debug, Default, Clone)]
pub struct SpawnParams {
    /// Role to instantiate.
    pub role_id: String,
    /// Parent agent id.
    pub parent_agent_id: String,
    /// Optional task description; when present a seed message is sent.
    pub task_brief: Option<String>,
    /// Optional custom display name.
    pub custom_name: Option<String>,
    /// Task the new agent works on.
    pub task_id: Option<String>,
}

/// Role catalog and agent registry.
pub struct Organization {
    bus: Arc<MessageBus>,
    state: Arc<RuntimeState>,
    registry: Arc<ServiceRegistry>,
    default_service: Mutex<Option<String>>,
    roles: RwLock<HashMap<String, Role>>,
    agents: RwLock<HashMap<String, Agent>>,
    shutdown_hook: Mutex<Option<ShutdownHook>>,
}

impl Organization {
    /// Create an empty organization.
    pub fn new(bus: Arc<MessageBus>, state: Arc<RuntimeState>, registry: Arc<ServiceRegistry>) -> Self {
        Self {
            bus,
            state,
            registry,
            default_service: Mutex::new(None),
            roles: RwLock::new(HashMap::new()),
            agents: RwLock::new(HashMap::new()),
            shutdown_hook: Mutex::new(None),
        }
    }

    /// Set the fallback LLM service id.
    pub fn set_default_service(&self, service_id: Option<String>) {
        *self.default_service.lock().expect("default service lock poisoned") = service_id;
    }

    /// The fallback LLM service id.
    pub fn default_service(&self) -> Option<String> {
        self.default_service
            .lock()
            .expect("default service lock poisoned")
            .clone()
    }

    /// Install a hook run during agent termination.
    pub fn set_shutdown_hook(&self, hook: ShutdownHook) {
        *self.shutdown_hook.lock().expect("hook lock poisoned") = Some(hook);
    }

    /// Create the root agent (and its role) if absent. Idempotent.
    pub fn ensure_root(&self, prompt: &str) {
        if self.agents.read().expect("agents lock poisoned").contains_key(ROOT_AGENT_ID) {
            return;
        }
        let role = self
            .find_role_by_name("root")
            .unwrap_or_else(|| {
                let role = Role::new("root", prompt);
                self.roles
                    .write()
                    .expect("roles lock poisoned")
                    .insert(role.role_id.clone(), role.clone());
                role
            });

        let agent = Agent::new(ROOT_AGENT_ID, role.role_id.clone(), role.name.clone(), None);
        self.state.register_agent(ROOT_AGENT_ID);
        self.agents
            .write()
            .expect("agents lock poisoned")
            .insert(agent.agent_id.clone(), agent);
        info!("root agent created");
    }

    // ── Roles ────────────────────────────────────────────────────────

    /// Create a role. Names are unique within the organization.
    pub fn create_role(
        &self,
        name: &str,
        prompt: &str,
        tool_groups: Option<Vec<String>>,
        llm_service_id: Option<String>,
    ) -> Result<Role> {
        let mut roles = self.roles.write().expect("roles lock poisoned");
        if roles.values().any(|r| r.name == name) {
            return Err(PolisError::RoleNameConflict(name.to_string()));
        }
        let mut role = Role::new(name, prompt);
        role.tool_groups = tool_groups;
        role.llm_service_id = llm_service_id;
        roles.insert(role.role_id.clone(), role.clone());
        debug!(role_id = %role.role_id, name = %name, "role created");
        Ok(role)
    }

    /// Rename a role and/or edit its prompt. Agents observe the update on
    /// their next turn.
    pub fn update_role(
        &self,
        role_id: &str,
        name: Option<&str>,
        prompt: Option<&str>,
    ) -> Result<Role> {
        let mut roles = self.roles.write().expect("roles lock poisoned");
        if let Some(new_name) = name {
            if roles
                .values()
                .any(|r| r.name == new_name && r.role_id != role_id)
            {
                return Err(PolisError::RoleNameConflict(new_name.to_string()));
            }
        }
        let role = roles
            .get_mut(role_id)
            .ok_or_else(|| PolisError::RoleNotFound(role_id.to_string()))?;
        if let Some(new_name) = name {
            role.name = new_name.to_string();
        }
        if let Some(new_prompt) = prompt {
            role.prompt = new_prompt.to_string();
        }
        Ok(role.clone())
    }

    /// Look up a role by id.
    pub fn role(&self, role_id: &str) -> Option<Role> {
        self.roles
            .read()
            .expect("roles lock poisoned")
            .get(role_id)
            .cloned()
    }

    /// Look up a role by its unique name.
    pub fn find_role_by_name(&self, name: &str) -> Option<Role> {
        self.roles
            .read()
            .expect("roles lock poisoned")
            .values()
            .find(|r| r.name == name)
            .cloned()
    }

    /// All roles, sorted by name.
    pub fn list_roles(&self) -> Vec<Role> {
        let mut roles: Vec<Role> = self
            .roles
            .read()
            .expect("roles lock poisoned")
            .values()
            .cloned()
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        roles
    }

    // ── Agents ───────────────────────────────────────────────────────

    /// Spawn an agent from a role under a live parent.
    ///
    /// Registers the agent with runtime state and, when `task_brief` is
    /// given, seeds a message from the parent summarizing the task so the
    /// new agent's first turn has something to work on.
    pub fn spawn_agent(&self, params: SpawnParams) -> Result<Agent> {
        let role = self
            .role(&params.role_id)
            .ok_or_else(|| PolisError::RoleNotFound(params.role_id.clone()))?;

        {
            let agents = self.agents.read().expect("agents lock poisoned");
            let parent = agents
                .get(&params.parent_agent_id)
                .ok_or_else(|| PolisError::AgentNotFound(params.parent_agent_id.clone()))?;
            let parent_status = self
                .state
                .status(&parent.agent_id)
                .unwrap_or(parent.status);
            if parent_status.is_terminated() {
                return Err(PolisError::ParentTerminated(params.parent_agent_id.clone()));
            }
        }

        let agent_id = format!("agent-{}", Uuid::new_v4());
        let mut agent = Agent::new(
            agent_id.clone(),
            role.role_id.clone(),
            role.name.clone(),
            Some(params.parent_agent_id.clone()),
        );
        agent.custom_name = params.custom_name;
        agent.task_brief = params.task_brief.clone();

        self.state.register_agent(&agent_id);
        self.agents
            .write()
            .expect("agents lock poisoned")
            .insert(agent_id.clone(), agent.clone());

        if let Some(brief) = params.task_brief {
            let mut seed = Message::new(params.parent_agent_id.clone(), agent_id.clone(), brief);
            if let Some(task_id) = params.task_id {
                seed = seed.with_task(task_id);
            }
            self.bus.send(seed);
        }

        info!(agent_id = %agent_id, role = %role.name, parent = %params.parent_agent_id, "agent spawned");
        Ok(agent)
    }

    /// Terminate an agent: mark `terminating`, drop its pending inbox and
    /// interruptions, run the shutdown hook, then mark `terminated`. The
    /// record is preserved for history lookups. Terminating root is
    /// refused.
    pub fn terminate_agent(&self, agent_id: &str) -> Result<()> {
        if agent_id == ROOT_AGENT_ID {
            return Err(PolisError::RootTermination);
        }
        if !self
            .agents
            .read()
            .expect("agents lock poisoned")
            .contains_key(agent_id)
        {
            return Err(PolisError::AgentNotFound(agent_id.to_string()));
        }

        self.state.set_status(agent_id, AgentStatus::Terminating);
        self.state.cancel_abort_token(agent_id);

        let dropped = self.bus.drain(agent_id).len() + self.state.drain_interruptions(agent_id).len();
        if dropped > 0 {
            warn!(agent_id = %agent_id, dropped, "dropped pending messages during termination");
        }

        if let Some(hook) = self
            .shutdown_hook
            .lock()
            .expect("hook lock poisoned")
            .clone()
        {
            hook(agent_id);
        }

        self.state.set_status(agent_id, AgentStatus::Terminated);
        if let Some(agent) = self
            .agents
            .write()
            .expect("agents lock poisoned")
            .get_mut(agent_id)
        {
            agent.status = AgentStatus::Terminated;
            agent.last_activity_at = chrono::Utc::now();
        }
        info!(agent_id = %agent_id, "agent terminated");
        Ok(())
    }

    /// Look up an agent, merging the live status from runtime state.
    pub fn agent(&self, agent_id: &str) -> Option<Agent> {
        let mut agent = self
            .agents
            .read()
            .expect("agents lock poisoned")
            .get(agent_id)
            .cloned()?;
        if let Some(status) = self.state.status(agent_id) {
            agent.status = status;
        }
        Some(agent)
    }

    /// All agents with live status, sorted by creation time.
    pub fn list_agents(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self
            .agents
            .read()
            .expect("agents lock poisoned")
            .values()
            .cloned()
            .collect();
        for agent in &mut agents {
            if let Some(status) = self.state.status(&agent.agent_id) {
                agent.status = status;
            }
        }
        agents.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        agents
    }

    /// Stamp an agent's record after a completed turn.
    pub fn touch(&self, agent_id: &str) {
        self.state.touch_activity(agent_id);
        if let Some(agent) = self
            .agents
            .write()
            .expect("agents lock poisoned")
            .get_mut(agent_id)
        {
            agent.last_activity_at = chrono::Utc::now();
        }
    }

    /// Projection of the parent/child forest.
    pub fn org_tree(&self) -> Vec<OrgNode> {
        let agents = self.list_agents();
        let mut children_of: HashMap<String, Vec<&Agent>> = HashMap::new();
        let mut roots: Vec<&Agent> = Vec::new();
        for agent in &agents {
            match &agent.parent_agent_id {
                Some(parent) => children_of.entry(parent.clone()).or_default().push(agent),
                None => roots.push(agent),
            }
        }

        fn build(agent: &Agent, children_of: &HashMap<String, Vec<&Agent>>) -> OrgNode {
            OrgNode {
                agent_id: agent.agent_id.clone(),
                role_name: agent.role_name.clone(),
                status: agent.status,
                children: children_of
                    .get(&agent.agent_id)
                    .map(|kids| kids.iter().map(|k| build(k, children_of)).collect())
                    .unwrap_or_default(),
            }
        }

        roots.iter().map(|r| build(r, &children_of)).collect()
    }

    /// Resolve the LLM service an agent of `role` talks to: the role's
    /// preferred service, else the runtime default, else the first catalog
    /// entry. Unknown ids are skipped.
    pub fn resolve_service_for_role(&self, role: &Role) -> Option<String> {
        if let Some(id) = &role.llm_service_id {
            if self.registry.get(id).is_some() {
                return Some(id.clone());
            }
        }
        if let Some(id) = self.default_service() {
            if self.registry.get(&id).is_some() {
                return Some(id);
            }
        }
        self.registry.list().first().map(|s| s.id.clone())
    }

    /// Live agents whose resolved service accepts `modality` as input.
    pub fn find_capable_agents(&self, modality: Modality) -> Vec<String> {
        self.list_agents()
            .into_iter()
            .filter(|a| !a.status.is_terminated())
            .filter(|a| {
                self.role(&a.role_id)
                    .and_then(|role| self.resolve_service_for_role(&role))
                    .map(|svc| self.registry.has_capability(&svc, modality, Direction::Input))
                    .unwrap_or(false)
            })
            .map(|a| a.agent_id)
            .collect()
    }

    /// Snapshot roles and agents for persistence.
    pub fn snapshot(&self) -> (Vec<Role>, Vec<Agent>) {
        (
            self.roles
                .read()
                .expect("roles lock poisoned")
                .values()
                .cloned()
                .collect(),
            self.agents
                .read()
                .expect("agents lock poisoned")
                .values()
                .cloned()
                .collect(),
        )
    }

    /// Restore roles and agents from a snapshot, re-registering live
    /// agents with runtime state.
    pub fn restore(&self, roles: Vec<Role>, agents: Vec<Agent>) {
        {
            let mut guard = self.roles.write().expect("roles lock poisoned");
            for role in roles {
                guard.insert(role.role_id.clone(), role);
            }
        }
        let mut guard = self.agents.write().expect("agents lock poisoned");
        for agent in agents {
            if agent.status.is_terminated() {
                self.state.set_status(&agent.agent_id, AgentStatus::Terminated);
            } else {
                self.state.register_agent(&agent.agent_id);
            }
            guard.insert(agent.agent_id.clone(), agent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn org() -> Organization {
        let bus = Arc::new(MessageBus::new());
        let state = Arc::new(RuntimeState::new());
        let registry = Arc::new(ServiceRegistry::new());
        let org = Organization::new(bus, state, registry);
        org.ensure_root("你是组织的根智能体。");
        org
    }

    fn org_with_registry(entries: serde_json::Value) -> Organization {
        let bus = Arc::new(MessageBus::new());
        let state = Arc::new(RuntimeState::new());
        let registry = Arc::new(ServiceRegistry::from_services(
            polis_llm::registry::parse_catalog_entries(&entries),
        ));
        let org = Organization::new(bus, state, registry);
        org.ensure_root("root prompt");
        org
    }

    #[test]
    fn ensure_root_is_idempotent() {
        let org = org();
        org.ensure_root("again");
        assert_eq!(org.list_agents().len(), 1);
        assert!(org.agent(ROOT_AGENT_ID).unwrap().is_root());
    }

    #[test]
    fn create_role_enforces_unique_names() {
        let org = org();
        org.create_role("chef", "You cook.", None, None).unwrap();
        let err = org.create_role("chef", "Another.", None, None).unwrap_err();
        assert_eq!(err.code(), "role_name_conflict");
    }

    #[test]
    fn update_role_edits_and_renames() {
        let org = org();
        let role = org.create_role("chef", "You cook.", None, None).unwrap();
        let updated = org
            .update_role(&role.role_id, Some("head-chef"), Some("You lead the kitchen."))
            .unwrap();
        assert_eq!(updated.name, "head-chef");
        assert!(org.find_role_by_name("chef").is_none());
        assert!(org.find_role_by_name("head-chef").is_some());
    }

    #[test]
    fn update_role_rejects_name_collision() {
        let org = org();
        org.create_role("chef", "a", None, None).unwrap();
        let waiter = org.create_role("waiter", "b", None, None).unwrap();
        let err = org
            .update_role(&waiter.role_id, Some("chef"), None)
            .unwrap_err();
        assert_eq!(err.code(), "role_name_conflict");
    }

    #[test]
    fn spawn_requires_existing_role_and_parent() {
        let org = org();
        let err = org
            .spawn_agent(SpawnParams {
                role_id: "missing".into(),
                parent_agent_id: ROOT_AGENT_ID.into(),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code(), "role_not_found");

        let role = org.create_role("chef", "You cook.", None, None).unwrap();
        let err = org
            .spawn_agent(SpawnParams {
                role_id: role.role_id.clone(),
                parent_agent_id: "ghost".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code(), "agent_not_found");
    }

    #[test]
    fn spawn_with_brief_seeds_message() {
        let bus = Arc::new(MessageBus::new());
        let state = Arc::new(RuntimeState::new());
        let registry = Arc::new(ServiceRegistry::new());
        let org = Organization::new(bus.clone(), state, registry);
        org.ensure_root("root");

        let role = org.create_role("chef", "You cook.", None, None).unwrap();
        let agent = org
            .spawn_agent(SpawnParams {
                role_id: role.role_id,
                parent_agent_id: ROOT_AGENT_ID.into(),
                task_brief: Some("开一家饭店".into()),
                task_id: Some("task-1".into()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(bus.inbox_size(&agent.agent_id), 1);
        let seed = bus.pop(&agent.agent_id).unwrap();
        assert_eq!(seed.from, ROOT_AGENT_ID);
        assert_eq!(seed.payload.text(), "开一家饭店");
        assert_eq!(seed.task_id.as_deref(), Some("task-1"));
    }

    #[test]
    fn spawn_under_terminated_parent_is_refused() {
        let org = org();
        let role = org.create_role("chef", "You cook.", None, None).unwrap();
        let parent = org
            .spawn_agent(SpawnParams {
                role_id: role.role_id.clone(),
                parent_agent_id: ROOT_AGENT_ID.into(),
                ..Default::default()
            })
            .unwrap();
        org.terminate_agent(&parent.agent_id).unwrap();

        let err = org
            .spawn_agent(SpawnParams {
                role_id: role.role_id,
                parent_agent_id: parent.agent_id,
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code(), "parent_terminated");
    }

    #[test]
    fn terminate_preserves_record_and_drops_inbox() {
        let bus = Arc::new(MessageBus::new());
        let state = Arc::new(RuntimeState::new());
        let registry = Arc::new(ServiceRegistry::new());
        let org = Organization::new(bus.clone(), state.clone(), registry);
        org.ensure_root("root");

        let role = org.create_role("chef", "You cook.", None, None).unwrap();
        let agent = org
            .spawn_agent(SpawnParams {
                role_id: role.role_id,
                parent_agent_id: ROOT_AGENT_ID.into(),
                ..Default::default()
            })
            .unwrap();

        bus.send(Message::new("x", agent.agent_id.clone(), "pending"));
        org.terminate_agent(&agent.agent_id).unwrap();

        assert_eq!(bus.inbox_size(&agent.agent_id), 0);
        let record = org.agent(&agent.agent_id).unwrap();
        assert_eq!(record.status, AgentStatus::Terminated);
        assert_eq!(state.status(&agent.agent_id), Some(AgentStatus::Terminated));
    }

    #[test]
    fn terminate_root_refused() {
        let org = org();
        let err = org.terminate_agent(ROOT_AGENT_ID).unwrap_err();
        assert_eq!(err.code(), "root_termination_refused");
    }

    #[test]
    fn shutdown_hook_runs_before_terminated() {
        let org = org();
        let role = org.create_role("chef", "x", None, None).unwrap();
        let agent = org
            .spawn_agent(SpawnParams {
                role_id: role.role_id,
                parent_agent_id: ROOT_AGENT_ID.into(),
                ..Default::default()
            })
            .unwrap();

        let seen = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
        let seen2 = seen.clone();
        org.set_shutdown_hook(Arc::new(move |id| {
            seen2.lock().unwrap().push(id.to_string());
        }));

        org.terminate_agent(&agent.agent_id).unwrap();
        assert_eq!(seen.lock().unwrap().as_slice(), &[agent.agent_id]);
    }

    #[test]
    fn org_tree_builds_forest() {
        let org = org();
        let role = org.create_role("chef", "x", None, None).unwrap();
        let a = org
            .spawn_agent(SpawnParams {
                role_id: role.role_id.clone(),
                parent_agent_id: ROOT_AGENT_ID.into(),
                ..Default::default()
            })
            .unwrap();
        let _b = org
            .spawn_agent(SpawnParams {
                role_id: role.role_id,
                parent_agent_id: a.agent_id.clone(),
                ..Default::default()
            })
            .unwrap();

        let tree = org.org_tree();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].agent_id, ROOT_AGENT_ID);
        assert_eq!(tree[0].children.len(), 1);
        assert_eq!(tree[0].children[0].agent_id, a.agent_id);
        assert_eq!(tree[0].children[0].children.len(), 1);
    }

    #[test]
    fn find_capable_agents_by_input_modality() {
        let org = org_with_registry(json!([
            {
                "id": "vision",
                "name": "Vision",
                "baseURL": "https://v/v1",
                "model": "m",
                "capabilities": {"input": ["text", "image"], "output": ["text"]}
            },
            {
                "id": "plain",
                "name": "Plain",
                "baseURL": "https://p/v1",
                "model": "m"
            }
        ]));
        org.set_default_service(Some("plain".into()));

        let vision_role = org
            .create_role("artist", "You see.", None, Some("vision".into()))
            .unwrap();
        let plain_role = org.create_role("writer", "You write.", None, None).unwrap();

        let artist = org
            .spawn_agent(SpawnParams {
                role_id: vision_role.role_id,
                parent_agent_id: ROOT_AGENT_ID.into(),
                ..Default::default()
            })
            .unwrap();
        let _writer = org
            .spawn_agent(SpawnParams {
                role_id: plain_role.role_id,
                parent_agent_id: ROOT_AGENT_ID.into(),
                ..Default::default()
            })
            .unwrap();

        let capable = org.find_capable_agents(Modality::Image);
        assert_eq!(capable, vec![artist.agent_id]);
    }

    #[test]
    fn snapshot_restore_roundtrip() {
        let org1 = org();
        let role = org1.create_role("chef", "You cook.", None, None).unwrap();
        org1.spawn_agent(SpawnParams {
            role_id: role.role_id,
            parent_agent_id: ROOT_AGENT_ID.into(),
            ..Default::default()
        })
        .unwrap();

        let (roles, agents) = org1.snapshot();

        let bus = Arc::new(MessageBus::new());
        let state = Arc::new(RuntimeState::new());
        let registry = Arc::new(ServiceRegistry::new());
        let org2 = Organization::new(bus, state, registry);
        org2.restore(roles, agents);

        assert_eq!(org2.list_agents().len(), 2);
        assert!(org2.find_role_by_name("chef").is_some());
    }
}
