//! Role → service selection via a meta-LLM over the catalog.
//!
//! Given a role's system prompt, the selector asks an LLM to pick the
//! best-suited service from the catalog description and parses a
//! `{serviceId, reason}` answer. Every failure mode degrades to `None`
//! (caller falls back to the default service); the selector never errors.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::client::{ChatOptions, LlmClient};
use crate::registry::ServiceRegistry;
use crate::types::ChatMessage;

/// Result of a successful selection.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedService {
    /// Catalog id of the chosen service.
    pub service_id: String,
    /// The model's stated reason.
    pub reason: String,
}

/// Expected JSON answer from the meta-LLM.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectorAnswer {
    service_id: Option<String>,
    #[serde(default)]
    reason: String,
}

/// Picks an LLM service for a role by querying a meta-LLM over the catalog.
pub struct ServiceSelector {
    client: Arc<LlmClient>,
    registry: Arc<ServiceRegistry>,
    /// Service used for the meta call; falls back to the first catalog
    /// entry when unset or unknown.
    selector_service_id: Option<String>,
}

impl ServiceSelector {
    /// Create a selector over the given client and catalog.
    pub fn new(
        client: Arc<LlmClient>,
        registry: Arc<ServiceRegistry>,
        selector_service_id: Option<String>,
    ) -> Self {
        Self {
            client,
            registry,
            selector_service_id,
        }
    }

    /// Select a service for `role_prompt`.
    ///
    /// An empty registry returns `None` without making any LLM call. An
    /// unknown or null id in the answer, a parse failure, or a transport
    /// error all yield `None` with the reason logged.
    pub async fn select_for_prompt(&self, role_prompt: &str) -> Option<SelectedService> {
        if self.registry.is_empty() {
            debug!("service catalog is empty, skipping selection");
            return None;
        }

        let meta_service = self
            .selector_service_id
            .as_deref()
            .filter(|id| self.registry.get(id).is_some())
            .map(str::to_string)
            .or_else(|| self.registry.list().first().map(|s| s.id.clone()))?;

        let system = format!(
            "你是一个 LLM 服务选择器。根据角色提示词，从下列服务目录中选择最合适的服务。\n\
             服务目录：\n{}\n\
             只输出 JSON：{{\"serviceId\": \"<id>\", \"reason\": \"<原因>\"}}。\
             若没有合适的服务，serviceId 为 null。",
            self.registry.catalog_description()
        );

        let opts = ChatOptions::new(
            meta_service,
            vec![
                ChatMessage::system(system),
                ChatMessage::user(role_prompt.to_string()),
            ],
        );

        let outcome = match self.client.chat(opts).await {
            Ok(o) => o,
            Err(e) => {
                warn!(error = %e, "service selection call failed, falling back to default");
                return None;
            }
        };

        let content = outcome.content.unwrap_or_default();
        let answer: SelectorAnswer = match serde_json::from_str(strip_code_fences(&content)) {
            Ok(a) => a,
            Err(e) => {
                warn!(error = %e, raw = %content, "unparseable selector answer");
                return None;
            }
        };

        let service_id = answer.service_id?;
        if self.registry.get(&service_id).is_none() {
            warn!(service_id = %service_id, "selector returned unknown service id");
            return None;
        }

        debug!(service_id = %service_id, reason = %answer.reason, "service selected");
        Some(SelectedService {
            service_id,
            reason: answer.reason,
        })
    }
}

/// Strip a ```json fenced block if the model wrapped its answer in one.
fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
