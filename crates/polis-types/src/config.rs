//! Runtime configuration.
//!
//! Configuration is read from a JSON file. Invalid values for individual
//! fields are logged at `warn` and replaced with defaults; only an
//! unreadable file at boot is fatal.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{PolisError, Result};

/// Default cap on concurrently in-flight LLM requests.
pub const DEFAULT_MAX_CONCURRENT_LLM_REQUESTS: u32 = 3;

/// Default interval between persistence snapshots.
pub const DEFAULT_PERSIST_INTERVAL_SECS: u64 = 60;

/// Validated runtime configuration.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeConfig {
    /// Global cap on in-flight LLM requests (positive integer, default 3).
    pub max_concurrent_llm_requests: u32,

    /// Directory for artifact content and sidecar metadata.
    pub artifacts_dir: PathBuf,

    /// Directory for runtime state (snapshots, catalogs, templates).
    pub runtime_dir: PathBuf,

    /// Directory for prompt files.
    pub prompts_dir: PathBuf,

    /// Id of the default LLM service used when selection yields nothing.
    pub default_llm_service: Option<String>,

    /// Seconds between persistence snapshots.
    pub persist_interval_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_llm_requests: DEFAULT_MAX_CONCURRENT_LLM_REQUESTS,
            artifacts_dir: PathBuf::from("data/artifacts"),
            runtime_dir: PathBuf::from("data/runtime"),
            prompts_dir: PathBuf::from("data/prompts"),
            default_llm_service: None,
            persist_interval_secs: DEFAULT_PERSIST_INTERVAL_SECS,
        }
    }
}

/// Raw file shape before validation. Loose types so that one bad field
/// never rejects the whole file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    #[serde(default)]
    max_concurrent_llm_requests: Option<Value>,
    #[serde(default)]
    artifacts_dir: Option<String>,
    #[serde(default)]
    runtime_dir: Option<String>,
    #[serde(default)]
    prompts_dir: Option<String>,
    #[serde(default)]
    default_llm_service: Option<String>,
    #[serde(default)]
    persist_interval_secs: Option<u64>,
}

impl RuntimeConfig {
    /// Parse a configuration from a JSON value, applying per-field
    /// validation with warn-and-default fallback.
    pub fn from_value(value: Value) -> Result<Self> {
        let raw: RawConfig =
            serde_json::from_value(value).map_err(|e| PolisError::ConfigInvalid {
                reason: e.to_string(),
            })?;
        let defaults = RuntimeConfig::default();

        Ok(Self {
            max_concurrent_llm_requests: validate_max_concurrent(
                raw.max_concurrent_llm_requests.as_ref(),
            ),
            artifacts_dir: raw
                .artifacts_dir
                .map(PathBuf::from)
                .unwrap_or(defaults.artifacts_dir),
            runtime_dir: raw
                .runtime_dir
                .map(PathBuf::from)
                .unwrap_or(defaults.runtime_dir),
            prompts_dir: raw
                .prompts_dir
                .map(PathBuf::from)
                .unwrap_or(defaults.prompts_dir),
            default_llm_service: raw.default_llm_service,
            persist_interval_secs: raw
                .persist_interval_secs
                .unwrap_or(defaults.persist_interval_secs),
        })
    }

    /// Load a configuration file. A missing file yields the defaults; an
    /// unreadable or non-JSON file is a fatal boot error.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let value: Value =
                    serde_json::from_str(&contents).map_err(|e| PolisError::ConfigInvalid {
                        reason: format!("{}: {e}", path.display()),
                    })?;
                Self::from_value(value)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(PolisError::Io(e)),
        }
    }
}

/// Validate `maxConcurrentLlmRequests`: absent or JSON null fall back to
/// the default silently; any non-positive-integer value falls back with a
/// warning; positive integers pass through.
fn validate_max_concurrent(value: Option<&Value>) -> u32 {
    match value {
        None | Some(Value::Null) => DEFAULT_MAX_CONCURRENT_LLM_REQUESTS,
        Some(v) => match v.as_u64() {
            Some(n) if n >= 1 && n <= u32::MAX as u64 => n as u32,
            _ => {
                warn!(
                    value = %v,
                    default = DEFAULT_MAX_CONCURRENT_LLM_REQUESTS,
                    "invalid maxConcurrentLlmRequests, falling back to default"
                );
                DEFAULT_MAX_CONCURRENT_LLM_REQUESTS
            }
        },
    }
}
