//! Core types for the polis multi-agent orchestration runtime.
//!
//! This crate is the bottom of the workspace: it defines the shared data
//! model (agents, roles, messages, service descriptors), the top-level
//! [`PolisError`] type, and runtime configuration. It has no dependency on
//! any other polis crate.

pub mod agent;
pub mod config;
pub mod error;
pub mod message;
pub mod role;
pub mod service;

pub use agent::{Agent, AgentStatus, OrgNode, ROOT_AGENT_ID, USER_SENDER_ID};
pub use config::RuntimeConfig;
pub use error::{PolisError, Result};
pub use message::{Attachment, AttachmentKind, Message, MessagePayload, RichPayload};
pub use role::Role;
pub use service::{Direction, LlmServiceDesc, Modality, ServiceCapabilities};
