//! Error types for the polis runtime.
//!
//! [`PolisError`] is the top-level error type shared across crates. Every
//! variant that can cross a tool or HTTP boundary carries a stable
//! snake_case code via [`PolisError::code`]; user-facing surfaces pair the
//! code with a short Chinese explanation and never leak stack traces.

use thiserror::Error;

/// Top-level error type for the polis runtime.
///
/// Variants are grouped into domain failures (agent/role/artifact lookups,
/// invariant violations) and infrastructure failures (I/O, serialization,
/// configuration). Domain failures map 1:1 onto the stable error codes
/// exposed to tool callers and HTTP clients.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PolisError {
    // ── Domain ───────────────────────────────────────────────────────

    /// The referenced agent does not exist in the organization.
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    /// The referenced role does not exist.
    #[error("role not found: {0}")]
    RoleNotFound(String),

    /// A role with this name already exists.
    #[error("role name conflict: {0}")]
    RoleNameConflict(String),

    /// The requested parent agent has been terminated.
    #[error("parent agent terminated: {0}")]
    ParentTerminated(String),

    /// Terminating the root agent is refused.
    #[error("refusing to terminate the root agent")]
    RootTermination,

    /// The referenced artifact does not exist in the store.
    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    /// Writing an artifact (content or sidecar) failed.
    #[error("artifact write failed: {reason}")]
    ArtifactWrite {
        /// What went wrong during the write.
        reason: String,
    },

    /// A wait operation elapsed without a matching message.
    #[error("wait timed out after {waited_ms}ms")]
    WaitTimeout {
        /// How long the waiter blocked before giving up.
        waited_ms: u64,
    },

    // ── Infrastructure ───────────────────────────────────────────────

    /// Configuration is malformed or semantically invalid.
    #[error("invalid config: {reason}")]
    ConfigInvalid {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// A persisted snapshot could not be restored at boot.
    #[error("snapshot corrupt: {reason}")]
    SnapshotCorrupt {
        /// Why the snapshot failed to parse or validate.
        reason: String,
    },

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PolisError {
    /// Stable snake_case code for tool results and HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            PolisError::AgentNotFound(_) => "agent_not_found",
            PolisError::RoleNotFound(_) => "role_not_found",
            PolisError::RoleNameConflict(_) => "role_name_conflict",
            PolisError::ParentTerminated(_) => "parent_terminated",
            PolisError::RootTermination => "root_termination_refused",
            PolisError::ArtifactNotFound(_) => "artifact_not_found",
            PolisError::ArtifactWrite { .. } => "artifact_write_failed",
            PolisError::WaitTimeout { .. } => "wait_timeout",
            PolisError::ConfigInvalid { .. } => "invalid_config",
            PolisError::SnapshotCorrupt { .. } => "snapshot_corrupt",
            PolisError::Io(_) => "io_error",
            PolisError::Json(_) => "parse_error",
        }
    }
}

/// A convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, PolisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let err = PolisError::AgentNotFound("agent-7".into());
        assert_eq!(err.to_string(), "agent not found: agent-7");

        let err = PolisError::RoleNameConflict("chef".into());
        assert_eq!(err.to_string(), "role name conflict: chef");

        let err = PolisError::RootTermination;
        assert_eq!(err.to_string(), "refusing to terminate the root agent");
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            PolisError::AgentNotFound("x".into()).code(),
            "agent_not_found"
        );
        assert_eq!(PolisError::RoleNotFound("x".into()).code(), "role_not_found");
        assert_eq!(
            PolisError::ParentTerminated("x".into()).code(),
            "parent_terminated"
        );
        assert_eq!(
            PolisError::ArtifactNotFound("x".into()).code(),
            "artifact_not_found"
        );
        assert_eq!(
            PolisError::ArtifactWrite {
                reason: "disk full".into()
            }
            .code(),
            "artifact_write_failed"
        );
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: PolisError = io_err.into();
        assert!(matches!(err, PolisError::Io(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{{bad}}").unwrap_err();
        let err: PolisError = json_err.into();
        assert_eq!(err.code(), "parse_error");
    }

    #[test]
    fn result_alias_works() {
        fn ok_fn() -> Result<u32> {
            Ok(7)
        }
        fn err_fn() -> Result<u32> {
            Err(PolisError::RootTermination)
        }
        assert_eq!(ok_fn().unwrap(), 7);
        assert!(err_fn().is_err());
    }
}
