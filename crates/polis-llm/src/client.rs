//! Chat-completion client with concurrency gating, retry, and abort.
//!
//! [`LlmClient`] is the only path through which the runtime talks to LLM
//! backends. It enforces the global in-flight request cap (the single
//! bounded resource of the runtime), applies bounded exponential-backoff
//! retry to transient failures, and honors a cancellation token at every
//! suspension point so a stop request interrupts the outbound call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use polis_types::LlmServiceDesc;

use crate::error::{LlmError, Result};
use crate::registry::ServiceRegistry;
use crate::retry::{compute_delay, RetryConfig};
use crate::transport::ChatTransport;
use crate::types::{ChatMessage, ChatRequest, ToolCall, Usage};

/// Inputs for one chat call.
pub struct ChatOptions {
    /// Catalog id of the target service.
    pub service_id: String,
    /// Conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Tool schemas in OpenAI function format.
    pub tools: Vec<serde_json::Value>,
    /// Sampling temperature override.
    pub temperature: Option<f64>,
    /// Abort signal; `None` means the call cannot be interrupted.
    pub signal: Option<CancellationToken>,
}

impl ChatOptions {
    /// Minimal options: service + messages.
    pub fn new(service_id: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            service_id: service_id.into(),
            messages,
            tools: Vec::new(),
            temperature: None,
            signal: None,
        }
    }
}

/// Result of one chat call.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// Request id carried through structured logs.
    pub request_id: String,
    /// Assistant text, `None` when the response was tool calls only.
    pub content: Option<String>,
    /// Tool calls requested by the model, in order.
    pub tool_calls: Vec<ToolCall>,
    /// Token usage, when reported.
    pub usage: Option<Usage>,
}

/// The runtime's chat-completion client.
pub struct LlmClient {
    registry: Arc<ServiceRegistry>,
    transport: Arc<dyn ChatTransport>,
    gate: Arc<Semaphore>,
    service_gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    retry: RetryConfig,
}

impl LlmClient {
    /// Create a client over `transport` with a global in-flight cap.
    pub fn new(
        registry: Arc<ServiceRegistry>,
        transport: Arc<dyn ChatTransport>,
        max_concurrent_requests: u32,
        retry: RetryConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            gate: Arc::new(Semaphore::new(max_concurrent_requests.max(1) as usize)),
            service_gates: Mutex::new(HashMap::new()),
            retry,
        }
    }

    /// The service catalog this client resolves against.
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Per-service semaphore for entries declaring their own cap.
    fn service_gate(&self, service: &LlmServiceDesc) -> Option<Arc<Semaphore>> {
        let cap = service.max_concurrent_requests?;
        let mut gates = self.service_gates.lock().expect("service gate lock poisoned");
        Some(
            gates
                .entry(service.id.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(cap.max(1) as usize)))
                .clone(),
        )
    }

    /// Issue one chat completion.
    ///
    /// Waits on the global gate (and the per-service gate when declared),
    /// then runs the transport with retry. The cancellation signal aborts
    /// at any suspension point: gate wait, in-flight request, or backoff
    /// sleep. An aborted call returns [`LlmError::Aborted`] and any
    /// response that races in afterwards is discarded with the future.
    pub async fn chat(&self, opts: ChatOptions) -> Result<ChatOutcome> {
        let service = self
            .registry
            .get(&opts.service_id)
            .ok_or_else(|| LlmError::ServiceNotFound(opts.service_id.clone()))?;

        let request_id = Uuid::new_v4().to_string();
        let signal = opts.signal.clone().unwrap_or_default();

        let _global_permit = tokio::select! {
            biased;
            _ = signal.cancelled() => return Err(LlmError::Aborted),
            permit = self.gate.clone().acquire_owned() => {
                permit.map_err(|_| LlmError::RequestFailed("request gate closed".into()))?
            }
        };

        let _service_permit = match self.service_gate(&service) {
            Some(gate) => Some(tokio::select! {
                biased;
                _ = signal.cancelled() => return Err(LlmError::Aborted),
                permit = gate.acquire_owned() => {
                    permit.map_err(|_| LlmError::RequestFailed("service gate closed".into()))?
                }
            }),
            None => None,
        };

        let mut request = ChatRequest::new(service.model.clone(), opts.messages);
        request.tools = opts.tools;
        request.temperature = opts.temperature;

        debug!(
            request_id = %request_id,
            service = %service.id,
            model = %service.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "llm request"
        );

        let mut attempts = 0u32;
        loop {
            attempts += 1;

            let result = tokio::select! {
                biased;
                _ = signal.cancelled() => return Err(LlmError::Aborted),
                result = self.transport.complete(&service, &request) => result,
            };

            match result {
                Ok(response) => {
                    let choice = response.choices.into_iter().next().ok_or_else(|| {
                        LlmError::InvalidResponse("response contained no choices".into())
                    })?;
                    let text = choice.message.content.text();
                    let outcome = ChatOutcome {
                        request_id: request_id.clone(),
                        content: if text.is_empty() { None } else { Some(text) },
                        tool_calls: choice.message.tool_calls.unwrap_or_default(),
                        usage: response.usage,
                    };
                    debug!(
                        request_id = %request_id,
                        service = %service.id,
                        tool_calls = outcome.tool_calls.len(),
                        "llm response"
                    );
                    return Ok(outcome);
                }
                Err(err) => {
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    if attempts > self.retry.max_retries {
                        return Err(LlmError::RetryExhausted {
                            attempts,
                            last: err.to_string(),
                        });
                    }

                    // Rate limiting may carry a suggested delay; honor the
                    // larger of suggestion and computed backoff.
                    let delay = if let LlmError::RateLimited { retry_after_ms } = &err {
                        compute_delay(&self.retry, attempts - 1)
                            .max(std::time::Duration::from_millis(*retry_after_ms))
                    } else {
                        compute_delay(&self.retry, attempts - 1)
                    };

                    warn!(
                        request_id = %request_id,
                        service = %service.id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying llm request after transient error"
                    );

                    tokio::select! {
                        biased;
                        _ = signal.cancelled() => return Err(LlmError::Aborted),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::types::{ChatResponse, Choice, FunctionCall, MessageContent};

    fn service(id: &str) -> LlmServiceDesc {
        LlmServiceDesc {
            id: id.into(),
            name: id.into(),
            base_url: "https://example.com/v1".into(),
            model: "test-model".into(),
            api_key: "k".into(),
            capability_tags: vec![],
            description: String::new(),
            max_concurrent_requests: None,
            capabilities: None,
        }
    }

    fn registry_with(services: Vec<LlmServiceDesc>) -> Arc<ServiceRegistry> {
        Arc::new(ServiceRegistry::from_services(services))
    }

    fn text_response(text: &str) -> ChatResponse {
        ChatResponse {
            id: "resp-1".into(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::assistant(text),
                finish_reason: Some("stop".into()),
            }],
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "test-model".into(),
        }
    }

    /// Transport returning a fixed response after an optional delay,
    /// tracking the peak number of concurrent calls.
    struct GaugeTransport {
        delay: Duration,
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl GaugeTransport {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatTransport for GaugeTransport {
        async fn complete(
            &self,
            _service: &LlmServiceDesc,
            _request: &ChatRequest,
        ) -> Result<ChatResponse> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(text_response("ok"))
        }
    }

    /// Transport failing `failures` times before succeeding.
    struct FlakyTransport {
        failures: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakyTransport {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatTransport for FlakyTransport {
        async fn complete(
            &self,
            _service: &LlmServiceDesc,
            _request: &ChatRequest,
        ) -> Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(LlmError::RequestFailed("HTTP 503: unavailable".into()));
            }
            Ok(text_response("recovered"))
        }
    }

    #[tokio::test]
    async fn unknown_service_fails_without_transport_call() {
        let client = LlmClient::new(
            registry_with(vec![]),
            Arc::new(GaugeTransport::new(Duration::ZERO)),
            3,
            RetryConfig::fast(),
        );
        let err = client
            .chat(ChatOptions::new("missing", vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ServiceNotFound(_)));
    }

    #[tokio::test]
    async fn returns_content_and_usage() {
        let client = LlmClient::new(
            registry_with(vec![service("svc")]),
            Arc::new(GaugeTransport::new(Duration::ZERO)),
            3,
            RetryConfig::fast(),
        );
        let outcome = client
            .chat(ChatOptions::new("svc", vec![ChatMessage::user("hi")]))
            .await
            .unwrap();
        assert_eq!(outcome.content.as_deref(), Some("ok"));
        assert!(outcome.tool_calls.is_empty());
        assert_eq!(outcome.usage.unwrap().total_tokens, 15);
        assert!(!outcome.request_id.is_empty());
    }

    #[tokio::test]
    async fn global_gate_bounds_concurrency() {
        let transport = Arc::new(GaugeTransport::new(Duration::from_millis(30)));
        let client = Arc::new(LlmClient::new(
            registry_with(vec![service("svc")]),
            transport.clone(),
            2,
            RetryConfig::fast(),
        ));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client
                    .chat(ChatOptions::new("svc", vec![ChatMessage::user("go")]))
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert!(
            transport.peak.load(Ordering::SeqCst) <= 2,
            "peak concurrency {} exceeded the gate",
            transport.peak.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn per_service_gate_applies() {
        let mut svc = service("svc");
        svc.max_concurrent_requests = Some(1);
        let transport = Arc::new(GaugeTransport::new(Duration::from_millis(20)));
        let client = Arc::new(LlmClient::new(
            registry_with(vec![svc]),
            transport.clone(),
            8,
            RetryConfig::fast(),
        ));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client
                    .chat(ChatOptions::new("svc", vec![ChatMessage::user("go")]))
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(transport.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let transport = Arc::new(FlakyTransport::new(2));
        let client = LlmClient::new(
            registry_with(vec![service("svc")]),
            transport.clone(),
            3,
            RetryConfig::fast(),
        );
        let outcome = client
            .chat(ChatOptions::new("svc", vec![ChatMessage::user("hi")]))
            .await
            .unwrap();
        assert_eq!(outcome.content.as_deref(), Some("recovered"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_exhaust_with_stable_code() {
        let transport = Arc::new(FlakyTransport::new(100));
        let client = LlmClient::new(
            registry_with(vec![service("svc")]),
            transport.clone(),
            3,
            RetryConfig::fast(),
        );
        let err = client
            .chat(ChatOptions::new("svc", vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RetryExhausted { attempts: 4, .. }));
        assert_eq!(err.code(), "llm_retry_exhausted");
        // First try + max_retries.
        assert_eq!(transport.calls.load(Ordering::SeqCst), 4);
    }

    struct AuthFailTransport;

    #[async_trait]
    impl ChatTransport for AuthFailTransport {
        async fn complete(
            &self,
            _service: &LlmServiceDesc,
            _request: &ChatRequest,
        ) -> Result<ChatResponse> {
            Err(LlmError::AuthFailed("bad key".into()))
        }
    }

    #[tokio::test]
    async fn non_retryable_errors_propagate_immediately() {
        let client = LlmClient::new(
            registry_with(vec![service("svc")]),
            Arc::new(AuthFailTransport),
            3,
            RetryConfig::fast(),
        );
        let err = client
            .chat(ChatOptions::new("svc", vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::AuthFailed(_)));
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_call() {
        let transport = Arc::new(GaugeTransport::new(Duration::from_secs(30)));
        let client = Arc::new(LlmClient::new(
            registry_with(vec![service("svc")]),
            transport,
            3,
            RetryConfig::fast(),
        ));

        let token = CancellationToken::new();
        let mut opts = ChatOptions::new("svc", vec![ChatMessage::user("hi")]);
        opts.signal = Some(token.clone());

        let handle = {
            let client = client.clone();
            tokio::spawn(async move { client.chat(opts).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        let err = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("abort should resolve promptly")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, LlmError::Aborted));
        assert_eq!(err.code(), "llm_aborted");
    }

    #[tokio::test]
    async fn tool_call_response_maps_to_outcome() {
        struct ToolCallTransport;

        #[async_trait]
        impl ChatTransport for ToolCallTransport {
            async fn complete(
                &self,
                _service: &LlmServiceDesc,
                _request: &ChatRequest,
            ) -> Result<ChatResponse> {
                Ok(ChatResponse {
                    id: "r".into(),
                    choices: vec![Choice {
                        index: 0,
                        message: ChatMessage {
                            role: "assistant".into(),
                            content: MessageContent::empty(),
                            tool_call_id: None,
                            tool_calls: Some(vec![ToolCall {
                                id: "call-1".into(),
                                call_type: "function".into(),
                                function: FunctionCall {
                                    name: "send_message".into(),
                                    arguments: "{}".into(),
                                },
                            }]),
                        },
                        finish_reason: Some("tool_calls".into()),
                    }],
                    usage: None,
                    model: "m".into(),
                })
            }
        }

        let client = LlmClient::new(
            registry_with(vec![service("svc")]),
            Arc::new(ToolCallTransport),
            3,
            RetryConfig::fast(),
        );
        let outcome = client
            .chat(ChatOptions::new("svc", vec![ChatMessage::user("hi")]))
            .await
            .unwrap();
        assert!(outcome.content.is_none());
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.tool_calls[0].function.name, "send_message");
    }
}
