//! HTTP error responses.
//!
//! Every error body carries the stable snake_case code plus a short
//! Chinese explanation. Stack traces and internal details never reach
//! clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Short Chinese explanation for a stable error code.
pub fn zh_explanation(code: &str) -> &'static str {
    match code {
        "missing_text" => "消息内容与附件不能同时为空",
        "unknown_tool" => "未知工具",
        "invalid_args" => "参数不合法",
        "tool_not_permitted" => "当前智能体无权调用该工具",
        "agent_not_found" => "找不到该智能体",
        "role_not_found" => "找不到该角色",
        "role_name_conflict" => "角色名称已存在",
        "parent_terminated" => "父智能体已终止",
        "root_termination_refused" => "不允许终止根智能体",
        "artifact_not_found" => "找不到该制品",
        "artifact_write_failed" => "制品写入失败",
        "only_https_allowed" => "仅允许 HTTPS 请求",
        "invalid_url" => "URL 不合法",
        "invalid_method" => "HTTP 方法不支持",
        "command_blocked" => "命令被安全策略拦截",
        "command_timeout" => "命令执行超时",
        "command_failed" => "命令执行失败",
        "llm_unavailable" => "LLM 服务不可用",
        "llm_aborted" => "LLM 调用已中止",
        "llm_retry_exhausted" => "LLM 重试次数已用尽",
        "file_too_large" => "文件超过大小限制",
        "parse_error" => "解析失败",
        "upload_failed" => "上传失败",
        "ui_timeout" => "UI 指令等待超时",
        "not_found" => "资源不存在",
        "service_id_conflict" => "服务 id 已存在",
        _ => "操作失败",
    }
}

/// An API error: status code + stable error code.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status to return.
    pub status: StatusCode,
    /// Stable snake_case code.
    pub code: &'static str,
}

impl ApiError {
    /// A 400 with the given code.
    pub fn bad_request(code: &'static str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
        }
    }

    /// A 404 with the given code.
    pub fn not_found(code: &'static str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code,
        }
    }

    /// Map a runtime error onto status + code.
    pub fn from_code(code: &'static str) -> Self {
        let status = match code {
            "agent_not_found" | "role_not_found" | "artifact_not_found" | "not_found" => {
                StatusCode::NOT_FOUND
            }
            "role_name_conflict" | "service_id_conflict" => StatusCode::CONFLICT,
            "file_too_large" => StatusCode::PAYLOAD_TOO_LARGE,
            "ui_timeout" => StatusCode::REQUEST_TIMEOUT,
            "missing_text" | "invalid_args" | "parse_error" | "invalid_url" | "invalid_method"
            | "only_https_allowed" | "parent_terminated" | "root_termination_refused" => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, code }
    }
}

impl From<polis_types::PolisError> for ApiError {
    fn from(err: polis_types::PolisError) -> Self {
        Self::from_code(err.code())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.code,
            "message": zh_explanation(self.code),
        }));
        (self.status, body).into_response()
    }
}
