//! Messaging tools: `send_message` and `wait_for_message`.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use polis_core::{Tool, ToolCtx, ToolError, ToolOutput};
use polis_types::{Attachment, Message, MessagePayload, RichPayload};

/// Send a message to another agent (or to `user`).
///
/// The payload is either plain text or text plus attachments referencing
/// stored artifacts. Delivery goes through the runtime's interruption-
/// aware path, so a recipient mid-turn sees the message on its next turn.
pub struct SendMessageTool;

#[async_trait]
impl Tool for SendMessageTool {
    fn name(&self) -> &str {
        "send_message"
    }

    fn description(&self) -> &str {
        "向指定智能体（或 user）发送消息。payload 为纯文本，attachments 可引用 artifact。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "to": {
                    "type": "string",
                    "description": "接收方智能体 id，或 user"
                },
                "payload": {
                    "type": "string",
                    "description": "消息正文"
                },
                "attachments": {
                    "type": "array",
                    "description": "可选附件列表：{type, artifactRef, filename}"
                },
                "taskId": {
                    "type": "string",
                    "description": "所属任务 id（可选）"
                }
            },
            "required": ["to", "payload"]
        })
    }

    async fn execute(&self, ctx: &ToolCtx, args: Value) -> Result<ToolOutput, ToolError> {
        let to = args["to"].as_str().unwrap_or_default().to_string();
        let text = args["payload"].as_str().unwrap_or_default().to_string();

        let attachments: Vec<Attachment> = match args.get("attachments") {
            Some(Value::Array(items)) if !items.is_empty() => {
                serde_json::from_value(Value::Array(items.clone()))
                    .map_err(|e| ToolError::InvalidArgs(format!("attachments: {e}")))?
            }
            _ => Vec::new(),
        };

        let payload = if attachments.is_empty() {
            MessagePayload::Text(text)
        } else {
            MessagePayload::Rich(RichPayload { text, attachments })
        };

        let mut msg = Message::new(ctx.agent_id.clone(), to, payload);
        let task_id = args["taskId"]
            .as_str()
            .map(str::to_string)
            .or_else(|| ctx.task_id.clone());
        if let Some(task_id) = task_id {
            msg = msg.with_task(task_id);
        }

        let sent = ctx.deliver(msg);
        debug!(from = %ctx.agent_id, to = %sent.to, msg_id = %sent.id, "send_message");
        Ok(ToolOutput::value(json!({
            "ok": true,
            "messageId": sent.id,
        })))
    }
}

/// Voluntarily end the turn and wait for the next inbound message.
///
/// The tool itself performs no waiting: it marks the turn as suspended,
/// so the agent goes idle and the processor wakes it when a message
/// arrives.
pub struct WaitForMessageTool;

#[async_trait]
impl Tool for WaitForMessageTool {
    fn name(&self) -> &str {
        "wait_for_message"
    }

    fn description(&self) -> &str {
        "结束本轮并等待下一条消息。没有新消息前不再占用模型调用。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, ctx: &ToolCtx, _args: Value) -> Result<ToolOutput, ToolError> {
        debug!(agent_id = %ctx.agent_id, "wait_for_message: suspending turn");
        Ok(ToolOutput::end_turn(json!({
            "ok": true,
            "waiting": true,
        })))
    }
}
