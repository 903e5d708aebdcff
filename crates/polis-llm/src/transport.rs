//! Chat transport: the seam between the client and the network.
//!
//! [`ChatTransport`] is the single async method the rest of the runtime
//! depends on; [`HttpChatTransport`] is the production implementation that
//! speaks the OpenAI chat-completion wire format over HTTPS. Tests swap in
//! mock transports.

use async_trait::async_trait;
use tracing::{debug, warn};

use polis_types::LlmServiceDesc;

use crate::error::{LlmError, Result};
use crate::types::{ChatRequest, ChatResponse};

/// One chat-completion round trip against a concrete service.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Issue the request to the service's endpoint and parse the response.
    async fn complete(
        &self,
        service: &LlmServiceDesc,
        request: &ChatRequest,
    ) -> Result<ChatResponse>;
}

/// Production transport over reqwest.
pub struct HttpChatTransport {
    http: reqwest::Client,
}

impl HttpChatTransport {
    /// Create a transport with a fresh HTTP client.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    fn completions_url(service: &LlmServiceDesc) -> String {
        let base = service.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }
}

impl Default for HttpChatTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn complete(
        &self,
        service: &LlmServiceDesc,
        request: &ChatRequest,
    ) -> Result<ChatResponse> {
        if service.base_url.is_empty() {
            return Err(LlmError::NotConfigured(format!(
                "service '{}' has no baseURL",
                service.id
            )));
        }
        let url = Self::completions_url(service);

        debug!(
            service = %service.id,
            model = %request.model,
            messages = request.messages.len(),
            "sending chat completion request"
        );

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", service.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 429 {
                let retry_ms = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .map(|secs| secs * 1000)
                    .unwrap_or(1000);
                warn!(service = %service.id, retry_after_ms = retry_ms, "rate limited");
                return Err(LlmError::RateLimited {
                    retry_after_ms: retry_ms,
                });
            }

            let body = response.text().await.unwrap_or_default();

            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(LlmError::AuthFailed(body));
            }
            if status.as_u16() == 404 {
                return Err(LlmError::ModelNotFound(format!(
                    "model '{}': {body}",
                    request.model
                )));
            }
            return Err(LlmError::RequestFailed(format!("HTTP {status}: {body}")));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("failed to parse response: {e}")))?;

        debug!(
            service = %service.id,
            choices = chat_response.choices.len(),
            "chat completion response received"
        );

        Ok(chat_response)
    }
}
