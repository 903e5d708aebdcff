//! HTTP API surface for the polis runtime.
//!
//! JSON over HTTP (HTTPS-capable behind a terminating proxy): messaging,
//! agent listing and abort, artifact upload/download, LLM configuration
//! and service-catalog CRUD, org-template CRUD, and the UI command
//! long-poll bridge.

pub mod error;
pub mod handlers;
pub mod templates;
pub mod ui_bridge;

pub use error::{zh_explanation, ApiError};
pub use handlers::{api_routes, serve, ApiState};
pub use templates::{OrgTemplate, OrgTemplateStore};
pub use ui_bridge::{UiCommand, UiCommandBridge};
