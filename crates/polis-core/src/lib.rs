//! Core engine for the polis multi-agent orchestration runtime.
//!
//! The engine is layered leaves-first: the artifact store and message bus
//! at the bottom; the organization, runtime state, and conversation
//! manager above them; then the capability router, tool executor, message
//! processor, and the agent turn driver; and finally [`runtime::AgentRuntime`],
//! which wires everything together and owns the scheduler tick and
//! persistence loop.

pub mod artifact;
pub mod bus;
pub mod conversation;
pub mod formatter;
pub mod org;
pub mod persist;
pub mod processor;
pub mod router;
pub mod runtime;
pub mod state;
pub mod tools;
pub mod turn;

pub use artifact::{ArtifactMeta, ArtifactStore};
pub use bus::MessageBus;
pub use conversation::{ConversationCompressor, ConversationManager};
pub use formatter::{format_incoming, SenderInfo};
pub use org::{Organization, SpawnParams};
pub use persist::{Persister, Snapshot};
pub use processor::MessageProcessor;
pub use router::ContentRouter;
pub use runtime::{AgentRuntime, Submission};
pub use state::RuntimeState;
pub use tools::{
    deliver_message, Tool, ToolCtx, ToolError, ToolExecutor, ToolGroup, ToolOutput,
    ORG_MANAGEMENT_GROUP,
};
pub use turn::TurnDriver;
