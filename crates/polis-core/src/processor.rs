//! Message processor: picks eligible agents and starts their turns.
//!
//! An agent is eligible when its inbox is non-empty, its status is
//! schedulable (not stopped/stopping/terminating/terminated), and it has
//! no turn already in flight. Selection is least-recently-active first.
//! The number of concurrently running turns never exceeds the configured
//! cap.

use std::sync::Arc;

use tracing::debug;

use polis_llm::ChatMessage;

use crate::bus::MessageBus;
use crate::conversation::ConversationManager;
use crate::formatter::{format_incoming, SenderInfo};
use crate::org::Organization;
use crate::state::RuntimeState;
use crate::turn::TurnDriver;

/// Default cap for [`MessageProcessor::drain_agent_queue`].
pub const DEFAULT_DRAIN_CAP: usize = 100;

/// Drives message delivery by scheduling agent turns.
pub struct MessageProcessor {
    bus: Arc<MessageBus>,
    state: Arc<RuntimeState>,
    org: Arc<Organization>,
    conversations: Arc<ConversationManager>,
    driver: Arc<TurnDriver>,
}

impl MessageProcessor {
    /// Wire a processor over the shared components.
    pub fn new(
        bus: Arc<MessageBus>,
        state: Arc<RuntimeState>,
        org: Arc<Organization>,
        conversations: Arc<ConversationManager>,
        driver: Arc<TurnDriver>,
    ) -> Self {
        Self {
            bus,
            state,
            org,
            conversations,
            driver,
        }
    }

    /// The next eligible agent: least-recently-active with a non-empty
    /// inbox, a schedulable status, and no turn in flight.
    fn pick_next(&self) -> Option<String> {
        self.org
            .list_agents()
            .into_iter()
            .filter(|a| self.bus.inbox_size(&a.agent_id) > 0)
            .filter(|a| a.status.is_schedulable())
            .filter(|a| !self.state.is_active(&a.agent_id))
            .min_by_key(|a| {
                self.state
                    .last_activity(&a.agent_id)
                    .unwrap_or(a.last_activity_at)
            })
            .map(|a| a.agent_id)
    }

    /// Schedule at most one turn, spawning it onto the runtime.
    ///
    /// Returns `false` when the concurrency cap is reached or nothing is
    /// eligible. The spawned turn unmarks the agent when it completes.
    pub fn schedule_one(&self, max_concurrent: usize) -> bool {
        if self.state.active_count() >= max_concurrent {
            return false;
        }
        let Some(agent_id) = self.pick_next() else {
            return false;
        };
        if !self.state.mark_active(&agent_id) {
            return false;
        }

        debug!(agent_id = %agent_id, "scheduling turn");
        let driver = self.driver.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            driver.run_turn(&agent_id).await;
            state.unmark_active(&agent_id);
        });
        true
    }

    /// Deterministically drain: run eligible turns inline, one at a time,
    /// until nothing is eligible. Used by tests and synchronous callers.
    pub async fn deliver_one_round(&self) {
        loop {
            let Some(agent_id) = self.pick_next() else {
                break;
            };
            if !self.state.mark_active(&agent_id) {
                break;
            }
            self.driver.run_turn(&agent_id).await;
            self.state.unmark_active(&agent_id);
        }
    }

    /// Serially consume up to `max_messages` queued messages for one
    /// agent, appending each to its conversation as a formatted `user`
    /// turn without any LLM round. Returns the number processed. Used
    /// during termination and by test fixtures.
    pub fn drain_agent_queue(&self, agent_id: &str, max_messages: usize) -> usize {
        let mut processed = 0;
        while processed < max_messages {
            let Some(msg) = self.bus.pop(agent_id) else {
                break;
            };
            let sender = self.org.agent(&msg.from).map(|a| SenderInfo {
                role_name: Some(a.role_name),
            });
            let text = format_incoming(&msg, sender.as_ref());
            self.conversations.append(agent_id, ChatMessage::user(text));
            processed += 1;
        }
        if processed > 0 {
            debug!(agent_id = %agent_id, processed, "drained agent queue");
        }
        processed
    }

    /// [`Self::drain_agent_queue`] with the default cap of 100.
    pub fn drain_agent_queue_default(&self, agent_id: &str) -> usize {
        self.drain_agent_queue(agent_id, DEFAULT_DRAIN_CAP)
    }
}
