//! LLM layer for polis: chat-completion client, service registry, and
//! capability-driven service selection.
//!
//! The wire types follow the OpenAI chat-completion format, the de facto
//! contract spoken by most hosted backends. [`LlmClient`] adds the pieces
//! the runtime needs on top of a raw transport: a global concurrency gate,
//! bounded exponential-backoff retry, and abort via cancellation token.

pub mod client;
pub mod error;
pub mod registry;
pub mod retry;
pub mod selector;
pub mod transport;
pub mod types;

pub use client::{ChatOptions, ChatOutcome, LlmClient};
pub use error::{LlmError, Result};
pub use registry::ServiceRegistry;
pub use retry::RetryConfig;
pub use selector::{SelectedService, ServiceSelector};
pub use transport::{ChatTransport, HttpChatTransport};
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, Choice, ContentPart, FunctionCall, ImageUrl,
    MessageContent, ToolCall, Usage,
};
