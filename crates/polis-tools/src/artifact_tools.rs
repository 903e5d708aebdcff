//! Artifact tools: `put_artifact` and `get_artifact`.
//!
//! Text content goes in and out directly; binary content is not exposed
//! through this surface (the HTTP API streams raw bytes instead).

use async_trait::async_trait;
use serde_json::{json, Value};

use polis_core::{Tool, ToolCtx, ToolError, ToolOutput};

/// Store content in the artifact store and return its reference.
pub struct PutArtifactTool;

#[async_trait]
impl Tool for PutArtifactTool {
    fn name(&self) -> &str {
        "put_artifact"
    }

    fn description(&self) -> &str {
        "将内容存入制品库，返回 artifact:{id} 引用。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "要存储的文本内容"
                },
                "type": {
                    "type": "string",
                    "description": "内容类型，如 text/plain、application/json"
                },
                "meta": {
                    "type": "object",
                    "description": "附加元数据（可选）"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, ctx: &ToolCtx, args: Value) -> Result<ToolOutput, ToolError> {
        let content = args["content"].as_str().unwrap_or_default();
        let artifact_type = args["type"].as_str().unwrap_or("text/plain");
        let meta = args.get("meta").filter(|m| m.is_object()).cloned();

        let reference = ctx
            .artifacts
            .put(content.as_bytes(), artifact_type, meta)
            .await?;
        Ok(ToolOutput::value(json!({
            "ok": true,
            "artifactRef": reference,
        })))
    }
}

/// Fetch stored content by reference.
pub struct GetArtifactTool;

#[async_trait]
impl Tool for GetArtifactTool {
    fn name(&self) -> &str {
        "get_artifact"
    }

    fn description(&self) -> &str {
        "按 artifact:{id} 引用读取制品内容与元数据。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "artifactRef": {
                    "type": "string",
                    "description": "artifact:{id} 引用"
                }
            },
            "required": ["artifactRef"]
        })
    }

    async fn execute(&self, ctx: &ToolCtx, args: Value) -> Result<ToolOutput, ToolError> {
        let reference = args["artifactRef"].as_str().unwrap_or_default();
        let (content, meta) = ctx.artifacts.get(reference).await?;
        Ok(ToolOutput::value(json!({
            "ok": true,
            "content": String::from_utf8_lossy(&content),
            "type": meta.artifact_type,
            "createdAt": meta.created_at,
            "meta": meta.meta,
        })))
    }
}
