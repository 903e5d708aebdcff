//! Runtime coordinator: lifecycle, delivery tick, and task submission.
//!
//! [`AgentRuntime::init`] loads configuration, constructs every component,
//! restores persisted state, creates the `root` agent, and registers the
//! built-in tool groups. [`AgentRuntime::start`] spawns the scheduler tick
//! and the persistence interval; [`AgentRuntime::shutdown`] ceases
//! scheduling, aborts in-flight LLM calls, and persists.

use std::sync::Arc;
use std::time::Duration;

use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use polis_llm::{
    ChatTransport, HttpChatTransport, LlmClient, RetryConfig, ServiceRegistry, ServiceSelector,
};
use polis_types::{
    AgentStatus, Message, PolisError, Result, RuntimeConfig, ROOT_AGENT_ID, USER_SENDER_ID,
};
use uuid::Uuid;

use crate::artifact::ArtifactStore;
use crate::bus::MessageBus;
use crate::conversation::ConversationManager;
use crate::org::Organization;
use crate::persist::{Persister, Snapshot};
use crate::processor::MessageProcessor;
use crate::router::ContentRouter;
use crate::state::RuntimeState;
use crate::tools::{deliver_message, ToolExecutor, ToolGroup};
use crate::turn::TurnDriver;

/// Default system prompt for the root agent.
const ROOT_PROMPT: &str = "你是组织的根智能体。收到用户需求后，用 create_role 设计所需角色，\
用 spawn_agent_with_task 派生负责执行的智能体，并用 send_message 协调它们完成任务。";

/// Scheduler tick interval.
const TICK_INTERVAL: Duration = Duration::from_millis(25);

/// Result of a user task submission.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Allocated task id.
    pub task_id: String,
    /// Id of the seed message sent to the root agent.
    pub root_message_id: String,
}

/// The assembled runtime.
pub struct AgentRuntime {
    config: RuntimeConfig,
    bus: Arc<MessageBus>,
    state: Arc<RuntimeState>,
    org: Arc<Organization>,
    conversations: Arc<ConversationManager>,
    artifacts: Arc<ArtifactStore>,
    registry: Arc<ServiceRegistry>,
    llm: Arc<LlmClient>,
    selector: Arc<ServiceSelector>,
    processor: Arc<MessageProcessor>,
    persister: Persister,
    shutdown_token: CancellationToken,
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntime").finish_non_exhaustive()
    }
}

impl AgentRuntime {
    /// Construct the runtime with the production HTTP transport.
    pub async fn init(config: RuntimeConfig, tool_groups: Vec<ToolGroup>) -> Result<Arc<Self>> {
        Self::init_with_transport(config, Arc::new(HttpChatTransport::new()), tool_groups).await
    }

    /// Construct the runtime over an explicit transport (tests inject
    /// mocks here).
    pub async fn init_with_transport(
        config: RuntimeConfig,
        transport: Arc<dyn ChatTransport>,
        tool_groups: Vec<ToolGroup>,
    ) -> Result<Arc<Self>> {
        fs::create_dir_all(&config.runtime_dir).await?;
        fs::create_dir_all(&config.artifacts_dir).await?;

        let registry = Arc::new(ServiceRegistry::load(
            &config.runtime_dir.join("llm-services.local.json"),
            &config.runtime_dir.join("llm-services.json"),
        ));
        let llm = Arc::new(LlmClient::new(
            registry.clone(),
            transport,
            config.max_concurrent_llm_requests,
            RetryConfig::default(),
        ));
        let selector = Arc::new(ServiceSelector::new(
            llm.clone(),
            registry.clone(),
            config.default_llm_service.clone(),
        ));

        let bus = Arc::new(MessageBus::new());
        let state = Arc::new(RuntimeState::new());
        let org = Arc::new(Organization::new(bus.clone(), state.clone(), registry.clone()));
        let conversations = Arc::new(ConversationManager::new());
        let artifacts = Arc::new(ArtifactStore::open(config.artifacts_dir.clone()).await?);
        let router = Arc::new(ContentRouter::new(
            registry.clone(),
            artifacts.clone(),
            org.clone(),
        ));

        let mut executor = ToolExecutor::new(org.clone());
        for group in tool_groups {
            executor.register_group(group)?;
        }
        let executor = Arc::new(executor);

        // Restore persisted state before accepting submissions.
        let persister = Persister::new(&config.runtime_dir);
        if let Some(snapshot) = persister.load().await? {
            snapshot.restore(&org, &conversations, &state, &bus);
        }

        org.ensure_root(ROOT_PROMPT);
        org.set_default_service(config.default_llm_service.clone());

        let driver = Arc::new(TurnDriver::new(
            bus.clone(),
            state.clone(),
            org.clone(),
            conversations.clone(),
            executor,
            llm.clone(),
            router,
            artifacts.clone(),
            Some(selector.clone()),
        ));
        let processor = Arc::new(MessageProcessor::new(
            bus.clone(),
            state.clone(),
            org.clone(),
            conversations.clone(),
            driver,
        ));

        info!(
            max_concurrent = config.max_concurrent_llm_requests,
            services = registry.len(),
            "runtime initialized"
        );

        Ok(Arc::new(Self {
            config,
            bus,
            state,
            org,
            conversations,
            artifacts,
            registry,
            llm,
            selector,
            processor,
            persister,
            shutdown_token: CancellationToken::new(),
        }))
    }

    /// Spawn the scheduler tick and the persistence interval. Both stop
    /// when [`Self::shutdown`] fires the token.
    pub fn start(self: &Arc<Self>) {
        let runtime = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(TICK_INTERVAL);
            loop {
                tokio::select! {
                    _ = runtime.shutdown_token.cancelled() => break,
                    _ = tick.tick() => {
                        let cap = runtime.config.max_concurrent_llm_requests as usize;
                        while runtime.processor.schedule_one(cap) {}
                    }
                }
            }
        });

        let runtime = self.clone();
        tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(Duration::from_secs(runtime.config.persist_interval_secs.max(1)));
            tick.tick().await; // skip the immediate first tick
            loop {
                tokio::select! {
                    _ = runtime.shutdown_token.cancelled() => break,
                    _ = tick.tick() => {
                        if let Err(e) = runtime.persist_now().await {
                            warn!(error = %e, "interval snapshot failed");
                        }
                    }
                }
            }
        });
    }

    /// Submit a user requirement: allocate a task id and workspace, and
    /// seed the root agent.
    pub async fn submit_requirement(&self, text: &str) -> Result<Submission> {
        let task_id = format!("task-{}", Uuid::new_v4());
        let workspace = self.config.runtime_dir.join("tasks").join(&task_id);
        fs::create_dir_all(&workspace).await?;
        self.state.set_workspace(&task_id, workspace);

        let msg = Message::new(USER_SENDER_ID, ROOT_AGENT_ID, text.to_string())
            .with_task(task_id.clone());
        let sent = self.deliver(msg);

        info!(task_id = %task_id, "requirement submitted");
        Ok(Submission {
            task_id,
            root_message_id: sent.id,
        })
    }

    /// Deliver a message with interruption routing.
    pub fn deliver(&self, msg: Message) -> Message {
        deliver_message(&self.state, &self.bus, msg)
    }

    /// Stop an agent's in-flight LLM call: status `stopping`, abort
    /// signal fired, remaining tool calls skipped. Terminal status is
    /// `stopped`.
    pub fn abort_agent_llm_call(&self, agent_id: &str) -> Result<()> {
        if self.org.agent(agent_id).is_none() {
            return Err(PolisError::AgentNotFound(agent_id.to_string()));
        }
        self.state.set_status(agent_id, AgentStatus::Stopping);
        self.state.cancel_abort_token(agent_id);
        // Not mid-turn: nothing will run the driver's epilogue, so settle
        // the terminal status here.
        if !self.state.is_active(agent_id) {
            self.state.set_status(agent_id, AgentStatus::Stopped);
        }
        Ok(())
    }

    /// Return a stopped agent to `idle` so deferred messages deliver.
    pub fn resume_agent(&self, agent_id: &str) -> Result<()> {
        match self.state.status(agent_id) {
            None => Err(PolisError::AgentNotFound(agent_id.to_string())),
            Some(AgentStatus::Stopped) | Some(AgentStatus::Stopping) => {
                self.state.set_status(agent_id, AgentStatus::Idle);
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }

    /// Terminate an agent; stronger than abort — the agent becomes
    /// ineligible for any future scheduling.
    pub fn terminate_agent(&self, agent_id: &str) -> Result<()> {
        self.state.cancel_abort_token(agent_id);
        self.org.terminate_agent(agent_id)
    }

    /// Snapshot now.
    pub async fn persist_now(&self) -> Result<()> {
        let snapshot = Snapshot::capture(&self.org, &self.conversations, &self.state, &self.bus);
        self.persister.save(&snapshot).await
    }

    /// Cease scheduling, abort in-flight calls, persist state.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_token.cancel();
        for agent in self.org.list_agents() {
            if self.state.is_active(&agent.agent_id) {
                self.state.cancel_abort_token(&agent.agent_id);
            }
        }
        self.persist_now().await?;
        info!("runtime shut down");
        Ok(())
    }

    // ── Accessors for the HTTP surface and CLI ───────────────────────

    /// Runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Message bus handle.
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Runtime state handle.
    pub fn state(&self) -> &Arc<RuntimeState> {
        &self.state
    }

    /// Organization handle.
    pub fn org(&self) -> &Arc<Organization> {
        &self.org
    }

    /// Conversation manager handle.
    pub fn conversations(&self) -> &Arc<ConversationManager> {
        &self.conversations
    }

    /// Artifact store handle.
    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    /// Service catalog handle.
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// LLM client handle.
    pub fn llm(&self) -> &Arc<LlmClient> {
        &self.llm
    }

    /// Service selector handle.
    pub fn selector(&self) -> &Arc<ServiceSelector> {
        &self.selector
    }

    /// Message processor handle.
    pub fn processor(&self) -> &Arc<MessageProcessor> {
        &self.processor
    }
}
