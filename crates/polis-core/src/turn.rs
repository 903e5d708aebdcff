//! Agent turn driver: one turn = inbox flush, LLM call, tool loop.
//!
//! A turn consumes the agent's queued messages into its conversation,
//! asks the LLM client for a response, executes returned tool calls one
//! at a time, and loops until the model stops requesting tools, the agent
//! suspends via `wait_for_message`, or a stop/termination lands.
//!
//! Status discipline: `waiting_llm` while the request is outbound,
//! `processing` while tool calls run. The agent's abort token interrupts
//! the outbound request; the pre/post-tool-call status checks skip the
//! remainder of a multi-call response once a stop is requested. A failing
//! tool call becomes an error `tool` turn and does not end the turn; an
//! LLM failure after retries ends the turn with the inbox left intact.

use std::sync::Arc;

use tracing::{debug, warn};

use polis_llm::{ChatMessage, ChatOptions, LlmClient, LlmError, ServiceSelector};
use polis_types::AgentStatus;

use crate::artifact::ArtifactStore;
use crate::bus::MessageBus;
use crate::conversation::ConversationManager;
use crate::formatter::SenderInfo;
use crate::org::Organization;
use crate::router::ContentRouter;
use crate::state::RuntimeState;
use crate::tools::{ToolCtx, ToolError, ToolExecutor};

/// Safety cap on flush→LLM→tools rounds within a single turn.
const MAX_TURN_ROUNDS: usize = 32;

/// Drives individual agent turns.
pub struct TurnDriver {
    bus: Arc<MessageBus>,
    state: Arc<RuntimeState>,
    org: Arc<Organization>,
    conversations: Arc<ConversationManager>,
    executor: Arc<ToolExecutor>,
    llm: Arc<LlmClient>,
    router: Arc<ContentRouter>,
    artifacts: Arc<ArtifactStore>,
    selector: Option<Arc<ServiceSelector>>,
}

impl TurnDriver {
    /// Wire a driver over the shared runtime components.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<MessageBus>,
        state: Arc<RuntimeState>,
        org: Arc<Organization>,
        conversations: Arc<ConversationManager>,
        executor: Arc<ToolExecutor>,
        llm: Arc<LlmClient>,
        router: Arc<ContentRouter>,
        artifacts: Arc<ArtifactStore>,
        selector: Option<Arc<ServiceSelector>>,
    ) -> Self {
        Self {
            bus,
            state,
            org,
            conversations,
            executor,
            llm,
            router,
            artifacts,
            selector,
        }
    }

    fn stop_requested(&self, agent_id: &str) -> bool {
        self.state
            .status(agent_id)
            .map(AgentStatus::is_stop_requested)
            .unwrap_or(false)
    }

    /// Run one turn for `agent_id`.
    ///
    /// Holds the agent's advisory lock for the whole turn (per-agent
    /// serialization) and installs a fresh abort token, so a stop issued
    /// for a previous turn cannot leak into this one.
    pub async fn run_turn(&self, agent_id: &str) {
        let _guard = self.state.acquire_lock(agent_id).await;
        let token = self.state.reset_abort_token(agent_id);

        let Some(agent) = self.org.agent(agent_id) else {
            warn!(agent_id = %agent_id, "turn scheduled for unknown agent");
            return;
        };
        if agent.status.is_terminated() {
            return;
        }

        let role = self.org.role(&agent.role_id);
        if let Some(role) = &role {
            self.conversations.ensure_system(agent_id, &role.prompt);
        }
        let service_id = role.as_ref().and_then(|r| self.org.resolve_service_for_role(r));

        let mut task_id: Option<String> = None;
        let mut rounds = 0usize;

        loop {
            rounds += 1;
            if rounds > MAX_TURN_ROUNDS {
                warn!(agent_id = %agent_id, "turn hit round cap, ending");
                break;
            }

            // 1. Inbox flush.
            for msg in self.bus.drain(agent_id) {
                if msg.task_id.is_some() {
                    task_id = msg.task_id.clone();
                }
                let sender = self.org.agent(&msg.from).map(|a| SenderInfo {
                    role_name: Some(a.role_name),
                });
                let content = self
                    .router
                    .route_content(&msg, sender.as_ref(), service_id.as_deref())
                    .await;
                self.conversations.append(agent_id, ChatMessage::user(content));
            }

            if self.stop_requested(agent_id) {
                break;
            }

            // 2. LLM call.
            let Some(service_id_ref) = service_id.as_deref() else {
                warn!(agent_id = %agent_id, "no llm service resolvable, ending turn");
                break;
            };
            self.state.set_status(agent_id, AgentStatus::WaitingLlm);

            let mut opts = ChatOptions::new(
                service_id_ref.to_string(),
                self.conversations.snapshot(agent_id),
            );
            opts.tools = self.executor.definitions_for_agent(agent_id);
            opts.signal = Some(token.clone());

            let outcome = match self.llm.chat(opts).await {
                Ok(outcome) => outcome,
                Err(LlmError::Aborted) => {
                    debug!(agent_id = %agent_id, "llm call aborted");
                    break;
                }
                Err(e) => {
                    warn!(agent_id = %agent_id, error = %e, "llm call failed, ending turn");
                    break;
                }
            };

            // Stop landed while the request was outbound: the response is
            // discarded and nothing more is appended.
            if self.stop_requested(agent_id) {
                break;
            }

            // 3. Tool loop.
            if outcome.tool_calls.is_empty() {
                self.conversations.append(
                    agent_id,
                    ChatMessage::assistant(outcome.content.unwrap_or_default()),
                );
                break;
            }

            self.conversations.append(
                agent_id,
                ChatMessage::assistant_tool_calls(
                    outcome.content.unwrap_or_default(),
                    outcome.tool_calls.clone(),
                ),
            );

            let ctx = ToolCtx {
                agent_id: agent_id.to_string(),
                task_id: task_id.clone(),
                bus: self.bus.clone(),
                state: self.state.clone(),
                org: self.org.clone(),
                artifacts: self.artifacts.clone(),
                selector: self.selector.clone(),
            };

            let mut ended = false;
            for call in &outcome.tool_calls {
                if self.stop_requested(agent_id) {
                    ended = true;
                    break;
                }
                self.state.set_status(agent_id, AgentStatus::Processing);

                let result = match call.parsed_arguments() {
                    Ok(args) => {
                        self.executor
                            .execute_tool_call(&ctx, &call.function.name, args)
                            .await
                    }
                    Err(e) => Err(ToolError::InvalidArgs(format!(
                        "arguments are not valid JSON: {e}"
                    ))),
                };

                let (value, end_turn) = match result {
                    Ok(output) => (output.value, output.end_turn),
                    Err(e) => {
                        warn!(
                            agent_id = %agent_id,
                            tool = %call.function.name,
                            code = e.code(),
                            error = %e,
                            "tool call failed"
                        );
                        (e.to_json(), false)
                    }
                };
                self.conversations.append(
                    agent_id,
                    ChatMessage::tool_result(call.id.clone(), value.to_string()),
                );

                if end_turn {
                    debug!(agent_id = %agent_id, tool = %call.function.name, "turn suspended by tool");
                    ended = true;
                    break;
                }
                if self.stop_requested(agent_id) {
                    ended = true;
                    break;
                }
            }

            // 4. Interruption drain: messages that arrived mid-turn move
            // to the inbox so the next round's flush picks them up after
            // the tool results already appended.
            for msg in self.state.drain_interruptions(agent_id) {
                self.bus.requeue(agent_id, msg);
            }

            if ended {
                break;
            }
        }

        // 5. Termination bookkeeping.
        for msg in self.state.drain_interruptions(agent_id) {
            self.bus.requeue(agent_id, msg);
        }
        let final_status = match self.state.status(agent_id) {
            Some(AgentStatus::Stopping) | Some(AgentStatus::Stopped) => AgentStatus::Stopped,
            Some(AgentStatus::Terminating) => AgentStatus::Terminating,
            Some(AgentStatus::Terminated) => AgentStatus::Terminated,
            _ => AgentStatus::Idle,
        };
        self.state.set_status(agent_id, final_status);
        self.org.touch(agent_id);
        self.conversations.process_auto_compression(agent_id);
    }
}
