//! Error types for the LLM layer.

use thiserror::Error;

/// Errors from service lookup, transport, and the retry/abort machinery.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LlmError {
    /// The requested service id is not in the catalog.
    #[error("llm service not found: {0}")]
    ServiceNotFound(String),

    /// The service entry is unusable (missing key, bad URL).
    #[error("llm service not configured: {0}")]
    NotConfigured(String),

    /// The call was aborted via its cancellation signal.
    #[error("llm call aborted")]
    Aborted,

    /// All retry attempts were consumed.
    #[error("llm retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        /// Total attempts made (including the first).
        attempts: u32,
        /// Message of the last failure.
        last: String,
    },

    /// The provider is throttling requests.
    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested wait before retrying.
        retry_after_ms: u64,
    },

    /// The request exceeded its deadline.
    #[error("llm request timed out")]
    Timeout,

    /// Authentication was rejected.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The requested model does not exist at the endpoint.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The endpoint returned a non-success status.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// The response body did not match the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Transport-level HTTP failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Stable snake_case code for tool results and HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            LlmError::Aborted => "llm_aborted",
            LlmError::RetryExhausted { .. } => "llm_retry_exhausted",
            LlmError::InvalidResponse(_) | LlmError::Json(_) => "parse_error",
            _ => "llm_unavailable",
        }
    }

    /// Whether a retry may succeed: rate limits, timeouts, network
    /// failures, and 5xx responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } | LlmError::Timeout | LlmError::Http(_) => true,
            LlmError::RequestFailed(msg) => {
                msg.starts_with("HTTP 500")
                    || msg.starts_with("HTTP 502")
                    || msg.starts_with("HTTP 503")
                    || msg.starts_with("HTTP 504")
            }
            _ => false,
        }
    }
}

/// A convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LlmError>;
