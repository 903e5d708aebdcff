//! Inter-agent message types.
//!
//! A [`Message`] is immutable once sent. Its payload is either plain text
//! or text plus attachments referencing stored artifacts. Arbitrary JSON
//! payloads from external callers are preserved verbatim and rendered by
//! the message formatter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kind of an attachment: an image or an opaque file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    /// Image content (renderable by image-capable models).
    Image,
    /// Arbitrary file content.
    File,
}

/// An attachment slot within a rich payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// `image` or `file`.
    #[serde(rename = "type")]
    pub kind: AttachmentKind,

    /// Artifact reference in the form `artifact:{uuid}`.
    pub artifact_ref: String,

    /// Original filename for display.
    pub filename: String,
}

/// Text plus attachments.
///
/// `text` is mandatory on the wire so that arbitrary objects without a
/// `text` key fall through to [`MessagePayload::Other`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RichPayload {
    /// The textual part of the payload.
    pub text: String,

    /// Attachment slots, possibly empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

/// Message payload: a plain string, text + attachments, or an arbitrary
/// JSON value preserved from an external caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessagePayload {
    /// Plain text.
    Text(String),
    /// Text with attachments.
    Rich(RichPayload),
    /// Anything else; rendered by JSON-serializing.
    Other(Value),
}

impl MessagePayload {
    /// Extract the best-effort textual content of the payload.
    ///
    /// Strings are used directly; rich payloads yield their text; other
    /// objects yield `text` or `content` fields when present, otherwise
    /// the JSON serialization.
    pub fn text(&self) -> String {
        match self {
            MessagePayload::Text(s) => s.clone(),
            MessagePayload::Rich(rich) => rich.text.clone(),
            MessagePayload::Other(value) => value
                .get("text")
                .or_else(|| value.get("content"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string()),
        }
    }

    /// Attachments carried by the payload, empty for plain text.
    pub fn attachments(&self) -> &[Attachment] {
        match self {
            MessagePayload::Rich(rich) => &rich.attachments,
            _ => &[],
        }
    }
}

impl From<&str> for MessagePayload {
    fn from(s: &str) -> Self {
        MessagePayload::Text(s.to_string())
    }
}

impl From<String> for MessagePayload {
    fn from(s: String) -> Self {
        MessagePayload::Text(s)
    }
}

/// A message routed through the bus. Immutable; either delivered (consumed
/// by the processor into the recipient's conversation) or interrupting
/// (queued while the recipient is mid-turn).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message identifier.
    pub id: String,

    /// Sender agent id, or `user` for the human user.
    pub from: String,

    /// Recipient agent id.
    pub to: String,

    /// Task this message belongs to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    /// Submission timestamp, stamped by the bus.
    pub timestamp: DateTime<Utc>,

    /// The payload.
    pub payload: MessagePayload,
}

impl Message {
    /// Create a message with a fresh id and the current timestamp.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        payload: impl Into<MessagePayload>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            task_id: None,
            timestamp: Utc::now(),
            payload: payload.into(),
        }
    }

    /// Attach a task id.
    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_text_payload_roundtrip() {
        let msg = Message::new("user", "root", "hello");
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.payload, MessagePayload::Text("hello".into()));
        assert_eq!(back.payload.text(), "hello");
    }

    #[test]
    fn rich_payload_deserializes_from_object() {
        let value = json!({
            "text": "see attached",
            "attachments": [
                {"type": "image", "artifactRef": "artifact:img-001", "filename": "photo.jpg"}
            ]
        });
        let payload: MessagePayload = serde_json::from_value(value).unwrap();
        let atts = payload.attachments();
        assert_eq!(atts.len(), 1);
        assert_eq!(atts[0].kind, AttachmentKind::Image);
        assert_eq!(atts[0].artifact_ref, "artifact:img-001");
        assert_eq!(atts[0].filename, "photo.jpg");
    }

    #[test]
    fn attachment_wire_shape_preserved() {
        let att = Attachment {
            kind: AttachmentKind::Image,
            artifact_ref: "artifact:img-001".into(),
            filename: "photo.jpg".into(),
        };
        let json = serde_json::to_value(&att).unwrap();
        assert_eq!(
            json,
            json!({"type": "image", "artifactRef": "artifact:img-001", "filename": "photo.jpg"})
        );
    }

    #[test]
    fn other_payload_extracts_text_or_content() {
        let p: MessagePayload = serde_json::from_value(json!({"content": "inner"})).unwrap();
        assert_eq!(p.text(), "inner");

        let p: MessagePayload = serde_json::from_value(json!({"kind": "ping", "n": 3})).unwrap();
        // No text/content field: fall back to JSON serialization.
        assert!(p.text().contains("ping"));
    }

    #[test]
    fn object_with_text_field_is_rich() {
        // An object carrying `text` matches the Rich variant (attachments
        // default to empty), keeping its textual extraction stable.
        let p: MessagePayload = serde_json::from_value(json!({"text": "hi"})).unwrap();
        assert_eq!(p.text(), "hi");
        assert!(p.attachments().is_empty());
    }

    #[test]
    fn with_task_sets_task_id() {
        let msg = Message::new("a", "b", "x").with_task("task-1");
        assert_eq!(msg.task_id.as_deref(), Some("task-1"));
    }

    #[test]
    fn message_ids_are_unique() {
        let a = Message::new("a", "b", "x");
        let b = Message::new("a", "b", "x");
        assert_ne!(a.id, b.id);
    }
}
