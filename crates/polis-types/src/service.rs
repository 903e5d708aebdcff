//! LLM service descriptors and capability declarations.
//!
//! A service entry describes one backend model endpoint: where to reach
//! it, which model to request, and which input/output modalities it
//! understands. Entries missing a `capabilities` block default to
//! text-in / text-out.

use serde::{Deserialize, Serialize};

/// A declared input or output modality of an LLM service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Plain text.
    Text,
    /// Image content.
    Image,
    /// Arbitrary file content.
    File,
    /// Forward-compatibility for modalities this build does not know.
    #[serde(other)]
    Unknown,
}

/// Direction of a capability query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// What the model accepts.
    Input,
    /// What the model produces.
    Output,
}

/// Input/output modality sets for a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCapabilities {
    /// Accepted input modalities.
    #[serde(default = "default_text_only")]
    pub input: Vec<Modality>,
    /// Produced output modalities.
    #[serde(default = "default_text_only")]
    pub output: Vec<Modality>,
}

fn default_text_only() -> Vec<Modality> {
    vec![Modality::Text]
}

impl Default for ServiceCapabilities {
    fn default() -> Self {
        Self {
            input: default_text_only(),
            output: default_text_only(),
        }
    }
}

impl ServiceCapabilities {
    /// Whether the given modality is declared for the given direction.
    pub fn supports(&self, modality: Modality, direction: Direction) -> bool {
        match direction {
            Direction::Input => self.input.contains(&modality),
            Direction::Output => self.output.contains(&modality),
        }
    }
}

/// One entry in the LLM service catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmServiceDesc {
    /// Unique service identifier.
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// Base URL of the chat-completion endpoint (without the
    /// `/chat/completions` suffix).
    #[serde(rename = "baseURL")]
    pub base_url: String,

    /// Model identifier sent in requests.
    pub model: String,

    /// API key for bearer authentication.
    #[serde(default)]
    pub api_key: String,

    /// Free-form capability tags used by the service selector's catalog
    /// description.
    #[serde(default)]
    pub capability_tags: Vec<String>,

    /// Description shown to the selector meta-LLM.
    #[serde(default)]
    pub description: String,

    /// Per-service concurrency override; `None` uses the global gate only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_requests: Option<u32>,

    /// Declared modalities; absent means text-in / text-out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<ServiceCapabilities>,
}

impl LlmServiceDesc {
    /// Effective capabilities, applying the text-only default.
    pub fn effective_capabilities(&self) -> ServiceCapabilities {
        self.capabilities.clone().unwrap_or_default()
    }
}
