//! HTTP request handlers for the REST API.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use polis_core::artifact::mime_for_extension;
use polis_core::AgentRuntime;
use polis_types::{
    Attachment, Message, MessagePayload, RichPayload, ROOT_AGENT_ID, USER_SENDER_ID,
};

use crate::error::ApiError;
use crate::templates::OrgTemplateStore;
use crate::ui_bridge::UiCommandBridge;

/// Upload size limit: 10 MB, enforced server-side (and mirrored in the UI).
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Longest allowed UI long-poll.
const MAX_POLL_MS: u64 = 60_000;

/// Shared state for every handler.
#[derive(Clone)]
pub struct ApiState {
    /// The runtime.
    pub runtime: Arc<AgentRuntime>,
    /// UI command bridge.
    pub ui: Arc<UiCommandBridge>,
    /// Org template store.
    pub templates: Arc<OrgTemplateStore>,
}

/// Build all API routes.
pub fn api_routes() -> Router<ApiState> {
    Router::new()
        .route("/api/send", post(send_message))
        .route("/api/agents", get(list_agents))
        .route("/api/agents/{id}/abort", post(abort_agent))
        .route("/api/artifacts", post(upload_artifact))
        .route("/api/artifacts/{id}", get(download_artifact))
        .route("/api/config/llm", get(get_llm_config).post(set_llm_config))
        .route(
            "/api/config/llm-services",
            get(list_llm_services).post(create_llm_service),
        )
        .route(
            "/api/config/llm-services/{id}",
            axum::routing::put(update_llm_service).delete(delete_llm_service),
        )
        .route(
            "/api/org-templates",
            get(list_templates).post(create_template),
        )
        .route(
            "/api/org-templates/{id}",
            get(get_template).put(update_template).delete(delete_template),
        )
        .route("/api/ui-commands/poll", get(poll_ui_command))
        .route("/api/ui-commands/result", post(post_ui_result))
        .route("/api/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 2 * 1024 * 1024))
}

/// Serve the API on `addr` until the task is dropped.
pub async fn serve(state: ApiState, addr: std::net::SocketAddr) -> std::io::Result<()> {
    let app = api_routes()
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "api listening");
    axum::serve(listener, app).await
}

// ── Messaging ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendBody {
    to: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    attachments: Option<Vec<Attachment>>,
    #[serde(default)]
    task_id: Option<String>,
}

/// `POST /api/send` — send a message to an agent as the user.
///
/// Requires `message` or non-empty `attachments`. Attachment payloads are
/// preserved verbatim; an empty attachments array is normalized to a
/// plain-text payload.
async fn send_message(
    State(state): State<ApiState>,
    Json(body): Json<SendBody>,
) -> Result<Json<Value>, ApiError> {
    let text = body.message.unwrap_or_default();
    let attachments = body.attachments.unwrap_or_default();

    if text.is_empty() && attachments.is_empty() {
        return Err(ApiError::bad_request("missing_text"));
    }

    let payload = if attachments.is_empty() {
        MessagePayload::Text(text)
    } else {
        MessagePayload::Rich(RichPayload { text, attachments })
    };

    let mut msg = Message::new(USER_SENDER_ID, body.to, payload);
    if let Some(task_id) = body.task_id {
        msg = msg.with_task(task_id);
    }
    let sent = state.runtime.deliver(msg);

    Ok(Json(json!({ "ok": true, "messageId": sent.id })))
}

// ── Agents ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AgentsQuery {
    #[serde(default)]
    org: Option<String>,
}

/// `GET /api/agents?org={id|all|home}` — list agents. `home` returns only
/// `root` and `user`.
async fn list_agents(
    State(state): State<ApiState>,
    Query(query): Query<AgentsQuery>,
) -> Json<Value> {
    let agents = match query.org.as_deref() {
        Some("home") => {
            let mut list = Vec::new();
            if let Some(root) = state.runtime.org().agent(ROOT_AGENT_ID) {
                list.push(serde_json::to_value(root).unwrap_or_default());
            }
            list.push(json!({
                "agentId": USER_SENDER_ID,
                "roleName": "user",
                "status": "idle",
            }));
            list
        }
        _ => state
            .runtime
            .org()
            .list_agents()
            .into_iter()
            .map(|a| serde_json::to_value(a).unwrap_or_default())
            .collect(),
    };
    Json(json!({ "agents": agents }))
}

/// `POST /api/agents/{id}/abort` — stop an agent's LLM call.
async fn abort_agent(
    State(state): State<ApiState>,
    Path(agent_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.runtime.abort_agent_llm_call(&agent_id)?;
    Ok(Json(json!({ "ok": true })))
}

// ── Artifacts ────────────────────────────────────────────────────────

/// `GET /api/artifacts/{id}` — stream raw content with the recorded MIME.
async fn download_artifact(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let (content, meta) = state.runtime.artifacts().get(&id).await?;
    let mime = mime_for_extension(&meta.extension);
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, mime)],
        content,
    )
        .into_response())
}

/// `POST /api/artifacts` — upload a binary (≤ 10 MB).
async fn upload_artifact(
    State(state): State<ApiState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut uploaded: Option<(Vec<u8>, String, String)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::bad_request("parse_error"))?
    {
        if field.file_name().is_none() && field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload.bin").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|_| ApiError::from_code("file_too_large"))?;
        uploaded = Some((bytes.to_vec(), filename, content_type));
        break;
    }

    let Some((bytes, filename, content_type)) = uploaded else {
        return Err(ApiError::bad_request("parse_error"));
    };
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(ApiError::from_code("file_too_large"));
    }

    let reference = state
        .runtime
        .artifacts()
        .put(&bytes, &content_type, Some(json!({ "filename": filename })))
        .await
        .map_err(|e| {
            warn!(error = %e, "artifact upload failed");
            ApiError::from_code("upload_failed")
        })?;
    let meta = state
        .runtime
        .artifacts()
        .get_meta(&reference)
        .await
        .map_err(|_| ApiError::from_code("upload_failed"))?;

    Ok(Json(json!({
        "ok": true,
        "artifactRef": reference,
        "metadata": meta,
    })))
}

// ── LLM configuration ────────────────────────────────────────────────

fn llm_config_path(state: &ApiState) -> std::path::PathBuf {
    state.runtime.config().runtime_dir.join("llm-config.json")
}

/// `GET /api/config/llm` — the default LLM configuration document.
async fn get_llm_config(State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    match tokio::fs::read(llm_config_path(&state)).await {
        Ok(bytes) => {
            let value: Value =
                serde_json::from_slice(&bytes).map_err(|_| ApiError::from_code("parse_error"))?;
            Ok(Json(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Json(json!({}))),
        Err(_) => Err(ApiError::from_code("io_error")),
    }
}

/// `POST /api/config/llm` — replace the default LLM configuration.
async fn set_llm_config(
    State(state): State<ApiState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    if !body.is_object() {
        return Err(ApiError::bad_request("parse_error"));
    }
    let bytes = serde_json::to_vec_pretty(&body).map_err(|_| ApiError::from_code("parse_error"))?;
    tokio::fs::write(llm_config_path(&state), bytes)
        .await
        .map_err(|_| ApiError::from_code("io_error"))?;
    Ok(Json(json!({ "ok": true })))
}

// ── LLM service catalog CRUD ─────────────────────────────────────────

fn services_path(state: &ApiState) -> std::path::PathBuf {
    state
        .runtime
        .config()
        .runtime_dir
        .join("llm-services.local.json")
}

async fn flush_services(state: &ApiState) -> Result<(), ApiError> {
    let services = state.runtime.registry().list();
    let bytes =
        serde_json::to_vec_pretty(&services).map_err(|_| ApiError::from_code("parse_error"))?;
    tokio::fs::write(services_path(state), bytes)
        .await
        .map_err(|_| ApiError::from_code("io_error"))?;
    Ok(())
}

/// `GET /api/config/llm-services` — the current catalog.
async fn list_llm_services(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({ "services": state.runtime.registry().list() }))
}

/// `POST /api/config/llm-services` — add a catalog entry.
async fn create_llm_service(
    State(state): State<ApiState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let service: polis_types::LlmServiceDesc =
        serde_json::from_value(body).map_err(|_| ApiError::bad_request("parse_error"))?;

    let mut services = state.runtime.registry().list();
    if services.iter().any(|s| s.id == service.id) {
        return Err(ApiError::from_code("service_id_conflict"));
    }
    services.push(service.clone());
    state.runtime.registry().replace_all(services);
    flush_services(&state).await?;
    Ok(Json(json!({ "ok": true, "id": service.id })))
}

/// `PUT /api/config/llm-services/{id}` — replace a catalog entry.
async fn update_llm_service(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let service: polis_types::LlmServiceDesc =
        serde_json::from_value(body).map_err(|_| ApiError::bad_request("parse_error"))?;

    let mut services = state.runtime.registry().list();
    let Some(slot) = services.iter_mut().find(|s| s.id == id) else {
        return Err(ApiError::not_found("not_found"));
    };
    *slot = service;
    state.runtime.registry().replace_all(services);
    flush_services(&state).await?;
    Ok(Json(json!({ "ok": true })))
}

/// `DELETE /api/config/llm-services/{id}` — remove a catalog entry.
async fn delete_llm_service(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let mut services = state.runtime.registry().list();
    let before = services.len();
    services.retain(|s| s.id != id);
    if services.len() == before {
        return Err(ApiError::not_found("not_found"));
    }
    state.runtime.registry().replace_all(services);
    flush_services(&state).await?;
    Ok(Json(json!({ "ok": true })))
}

// ── Org templates ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TemplateBody {
    name: Option<String>,
    #[serde(default)]
    body: Option<Value>,
}

async fn list_templates(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({ "templates": state.templates.list() }))
}

async fn create_template(
    State(state): State<ApiState>,
    Json(body): Json<TemplateBody>,
) -> Result<Json<Value>, ApiError> {
    let name = body.name.ok_or_else(|| ApiError::bad_request("parse_error"))?;
    let template = state
        .templates
        .create(&name, body.body.unwrap_or_else(|| json!({})))
        .map_err(|_| ApiError::from_code("io_error"))?;
    Ok(Json(json!({ "ok": true, "template": template })))
}

async fn get_template(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.templates.get(&id) {
        Some(template) => Ok(Json(json!({ "template": template }))),
        None => Err(ApiError::not_found("not_found")),
    }
}

async fn update_template(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<TemplateBody>,
) -> Result<Json<Value>, ApiError> {
    let updated = state
        .templates
        .update(&id, body.name.as_deref(), body.body)
        .map_err(|_| ApiError::from_code("io_error"))?;
    if !updated {
        return Err(ApiError::not_found("not_found"));
    }
    Ok(Json(json!({ "ok": true })))
}

async fn delete_template(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state
        .templates
        .delete(&id)
        .map_err(|_| ApiError::from_code("io_error"))?;
    if !deleted {
        return Err(ApiError::not_found("not_found"));
    }
    Ok(Json(json!({ "ok": true })))
}

// ── UI command bridge ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PollQuery {
    client_id: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

/// `GET /api/ui-commands/poll?clientId&timeoutMs` — long-poll for a
/// queued UI command.
async fn poll_ui_command(
    State(state): State<ApiState>,
    Query(query): Query<PollQuery>,
) -> Result<Json<Value>, ApiError> {
    let timeout = Duration::from_millis(query.timeout_ms.unwrap_or(30_000).min(MAX_POLL_MS));
    match state.ui.poll(&query.client_id, timeout).await {
        Some(cmd) => Ok(Json(json!({
            "command": cmd.command,
            "commandId": cmd.command_id,
        }))),
        None => Err(ApiError::from_code("ui_timeout")),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UiResultBody {
    command_id: String,
    #[serde(default)]
    result: Value,
}

/// `POST /api/ui-commands/result` — resolve a pending UI command.
async fn post_ui_result(
    State(state): State<ApiState>,
    Json(body): Json<UiResultBody>,
) -> Json<Value> {
    let resolved = state.ui.resolve(&body.command_id, body.result);
    Json(json!({ "ok": resolved }))
}

// ── Health ───────────────────────────────────────────────────────────

static START_TIME: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();

/// Basic health status, version, and uptime.
async fn health() -> Json<Value> {
    let start = START_TIME.get_or_init(std::time::Instant::now);
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": start.elapsed().as_secs(),
    }))
}
