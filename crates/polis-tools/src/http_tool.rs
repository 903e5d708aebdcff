//! Outbound HTTP tool, HTTPS only.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use polis_core::{Tool, ToolCtx, ToolError, ToolOutput};

/// Maximum response body bytes returned to the LLM.
const MAX_BODY_BYTES: usize = 65_536;

/// Allowed HTTP methods.
const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "HEAD", "PATCH"];

/// Perform an outbound HTTPS request.
pub struct HttpRequestTool {
    http: reqwest::Client,
}

impl HttpRequestTool {
    /// Create the tool with a fresh HTTP client.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "发起 HTTPS 请求并返回状态码与响应体（仅允许 https://）。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "目标 URL，必须以 https:// 开头"
                },
                "method": {
                    "type": "string",
                    "description": "HTTP 方法（默认 GET）"
                },
                "body": {
                    "type": "string",
                    "description": "请求体（可选）"
                },
                "headers": {
                    "type": "object",
                    "description": "附加请求头（可选）"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, ctx: &ToolCtx, args: Value) -> Result<ToolOutput, ToolError> {
        let raw_url = args["url"].as_str().unwrap_or_default();
        let url = Url::parse(raw_url).map_err(|e| ToolError::Failed {
            code: "invalid_url",
            message: format!("无效的 URL: {e}"),
        })?;
        if url.scheme() != "https" {
            return Err(ToolError::Failed {
                code: "only_https_allowed",
                message: "仅允许 https:// 请求".into(),
            });
        }

        let method = args["method"]
            .as_str()
            .unwrap_or("GET")
            .to_ascii_uppercase();
        if !ALLOWED_METHODS.contains(&method.as_str()) {
            return Err(ToolError::Failed {
                code: "invalid_method",
                message: format!("不支持的 HTTP 方法: {method}"),
            });
        }

        debug!(agent_id = %ctx.agent_id, method = %method, url = %url, "http_request");

        let method = reqwest::Method::from_bytes(method.as_bytes()).map_err(|_| {
            ToolError::Failed {
                code: "invalid_method",
                message: format!("不支持的 HTTP 方法: {method}"),
            }
        })?;
        let mut request = self.http.request(method, url.clone());
        if let Some(headers) = args["headers"].as_object() {
            for (k, v) in headers {
                if let Some(v) = v.as_str() {
                    request = request.header(k.as_str(), v);
                }
            }
        }
        if let Some(body) = args["body"].as_str() {
            request = request.body(body.to_string());
        }

        let response = request.send().await.map_err(|e| {
            warn!(url = %url, error = %e, "http request failed");
            ToolError::Failed {
                code: "request_failed",
                message: format!("请求失败: {e}"),
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let truncated = body.len() > MAX_BODY_BYTES;
        let body = if truncated {
            body[..MAX_BODY_BYTES].to_string()
        } else {
            body
        };

        Ok(ToolOutput::value(json!({
            "status": status,
            "body": body,
            "truncated": truncated,
        })))
    }
}
