//! Message formatter: renders an inbound message into the single string
//! appended to the recipient's conversation as a `user` turn.
//!
//! User-originated messages are framed `【来自用户的消息】` with an
//! optional `【附件列表】` block and no reply hint. Messages from other
//! agents are framed with the sender's role and id and end with a
//! `send_message` reply hint. Missing sender information degrades to
//! `unknown`.

use polis_types::{AttachmentKind, Message, USER_SENDER_ID};

/// What the formatter knows about the sender.
#[derive(Debug, Clone, Default)]
pub struct SenderInfo {
    /// The sender's role display name.
    pub role_name: Option<String>,
}

/// Render one attachment line: `[图片] photo.jpg (artifact:...)`.
fn attachment_line(kind: AttachmentKind, filename: &str, artifact_ref: &str) -> String {
    let label = match kind {
        AttachmentKind::Image => "[图片]",
        AttachmentKind::File => "[文件]",
    };
    format!("{label} {filename} ({artifact_ref})")
}

/// Format an inbound message for the recipient's conversation.
pub fn format_incoming(msg: &Message, sender: Option<&SenderInfo>) -> String {
    let text = msg.payload.text();
    let attachments = msg.payload.attachments();

    let mut out = String::new();

    let from = if msg.from.is_empty() {
        "unknown"
    } else {
        msg.from.as_str()
    };

    if from == USER_SENDER_ID {
        out.push_str("【来自用户的消息】\n");
        out.push_str(&text);
        if !attachments.is_empty() {
            out.push_str("\n【附件列表】");
            for att in attachments {
                out.push('\n');
                out.push_str(&attachment_line(att.kind, &att.filename, &att.artifact_ref));
            }
        }
        return out;
    }

    let role_name = sender
        .and_then(|s| s.role_name.as_deref())
        .unwrap_or("unknown");

    out.push_str(&format!("【来自 {role_name}（{from}）的消息】\n"));
    out.push_str(&text);
    if !attachments.is_empty() {
        out.push_str("\n【附件列表】");
        for att in attachments {
            out.push('\n');
            out.push_str(&attachment_line(att.kind, &att.filename, &att.artifact_ref));
        }
    }
    out.push_str(&format!(
        "\n如需回复，请使用 send_message(to='{from}', ...)"
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use polis_types::{Attachment, MessagePayload, RichPayload};
    use serde_json::json;

    fn sender(role: &str) -> SenderInfo {
        SenderInfo {
            role_name: Some(role.to_string()),
        }
    }

    #[test]
    fn user_message_has_no_reply_hint() {
        let msg = Message::new("user", "agent-1", "菜单有什么？");
        let out = format_incoming(&msg, None);
        assert!(out.starts_with("【来自用户的消息】"));
        assert!(out.contains("菜单有什么？"));
        assert!(!out.contains("send_message"));
    }

    #[test]
    fn agent_message_has_header_and_reply_hint() {
        let msg = Message::new("agent-7", "agent-1", "请汇报进度");
        let out = format_incoming(&msg, Some(&sender("经理")));
        assert!(out.contains("【来自 经理（agent-7）的消息】"));
        assert!(out.contains("请汇报进度"));
        assert!(out.contains("如需回复，请使用 send_message(to='agent-7', ...)"));
    }

    #[test]
    fn missing_role_degrades_to_unknown() {
        let msg = Message::new("agent-7", "agent-1", "hi");
        let out = format_incoming(&msg, None);
        assert!(out.contains("【来自 unknown（agent-7）的消息】"));
    }

    #[test]
    fn missing_from_degrades_to_unknown() {
        let mut msg = Message::new("", "agent-1", "hi");
        msg.from = String::new();
        let out = format_incoming(&msg, None);
        assert!(out.contains("（unknown）"));
        assert!(out.contains("send_message(to='unknown'"));
    }

    #[test]
    fn attachments_are_listed() {
        let payload = MessagePayload::Rich(RichPayload {
            text: "请看附件".into(),
            attachments: vec![
                Attachment {
                    kind: AttachmentKind::Image,
                    artifact_ref: "artifact:img-001".into(),
                    filename: "photo.jpg".into(),
                },
                Attachment {
                    kind: AttachmentKind::File,
                    artifact_ref: "artifact:doc-002".into(),
                    filename: "报告.pdf".into(),
                },
            ],
        });
        let mut msg = Message::new("user", "agent-1", "");
        msg.payload = payload;

        let out = format_incoming(&msg, None);
        assert!(out.contains("【附件列表】"));
        assert!(out.contains("[图片] photo.jpg (artifact:img-001)"));
        assert!(out.contains("[文件] 报告.pdf (artifact:doc-002)"));
    }

    #[test]
    fn arbitrary_object_payload_is_serialized() {
        let mut msg = Message::new("agent-2", "agent-1", "");
        msg.payload = MessagePayload::Other(json!({"kind": "status", "done": 3}));
        let out = format_incoming(&msg, Some(&sender("worker")));
        assert!(out.contains("\"kind\""));
        assert!(out.contains("status"));
    }

    #[test]
    fn formatter_shape_property() {
        // For any sender != user: header, text, and reply hint all appear.
        for (sender_id, role, text) in [
            ("agent-1", "厨师", "上菜了"),
            ("agent-xyz", "waiter", "table 9"),
            ("a", "b", "c"),
        ] {
            let msg = Message::new(sender_id, "someone", text);
            let out = format_incoming(&msg, Some(&sender(role)));
            assert!(out.contains(&format!("【来自 {role}（{sender_id}）的消息】")));
            assert!(out.contains(text));
            assert!(out.contains(&format!("如需回复，请使用 send_message(to='{sender_id}', ...)")));
        }
    }
}
