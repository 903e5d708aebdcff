//! Capability router and content adapter.
//!
//! Rewrites an inbound message into the content shape the target LLM
//! service can accept. Attachments whose modality the target declares as
//! an input capability pass through -- images become the ordered
//! multimodal array (leading text part, then one `image_url` data-URL part
//! per image). Attachments the target cannot accept are replaced by a
//! structured text block that names the artifact and suggests agents whose
//! service does possess the capability.

use std::sync::Arc;

use base64::Engine;
use tracing::warn;

use polis_llm::{ContentPart, ImageUrl, MessageContent, ServiceRegistry};
use polis_types::{AttachmentKind, Direction, Message, Modality};

use crate::artifact::{mime_for_extension, ArtifactStore};
use crate::formatter::SenderInfo;
use crate::org::Organization;

/// Builds per-recipient LLM content from bus messages.
pub struct ContentRouter {
    registry: Arc<ServiceRegistry>,
    artifacts: Arc<ArtifactStore>,
    org: Arc<Organization>,
}

impl ContentRouter {
    /// Create a router over the catalog, artifact store, and organization.
    pub fn new(
        registry: Arc<ServiceRegistry>,
        artifacts: Arc<ArtifactStore>,
        org: Arc<Organization>,
    ) -> Self {
        Self {
            registry,
            artifacts,
            org,
        }
    }

    /// Route one message for a recipient whose resolved service is
    /// `target_service_id`. Text-only payloads pass through unchanged
    /// (beyond formatting).
    pub async fn route_content(
        &self,
        msg: &Message,
        sender: Option<&SenderInfo>,
        target_service_id: Option<&str>,
    ) -> MessageContent {
        let base = crate::formatter::format_incoming(msg, sender);
        let attachments = msg.payload.attachments();
        if attachments.is_empty() {
            return MessageContent::Text(base);
        }

        let mut text_block = base;
        let mut image_parts: Vec<ContentPart> = Vec::new();

        for att in attachments {
            let modality = match att.kind {
                AttachmentKind::Image => Modality::Image,
                AttachmentKind::File => Modality::File,
            };
            let supported = target_service_id
                .map(|id| self.registry.has_capability(id, modality, Direction::Input))
                .unwrap_or(false);

            if supported {
                match att.kind {
                    AttachmentKind::Image => match self.artifacts.get(&att.artifact_ref).await {
                        Ok((content, meta)) => {
                            let mime = mime_for_extension(&meta.extension);
                            let encoded =
                                base64::engine::general_purpose::STANDARD.encode(&content);
                            image_parts.push(ContentPart::ImageUrl {
                                image_url: ImageUrl {
                                    url: format!("data:{mime};base64,{encoded}"),
                                },
                            });
                        }
                        Err(e) => {
                            warn!(
                                artifact_ref = %att.artifact_ref,
                                error = %e,
                                "image attachment fetch failed"
                            );
                            text_block.push_str(&format!(
                                "\n（图片 {} 读取失败，无法展示）",
                                att.filename
                            ));
                        }
                    },
                    // File input the target accepts: the formatter's
                    // attachment listing already names it; nothing to add.
                    AttachmentKind::File => {}
                }
            } else {
                text_block.push('\n');
                text_block.push_str(&self.degraded_block(att, modality).await);
            }
        }

        if image_parts.is_empty() {
            MessageContent::Text(text_block)
        } else {
            let mut parts = Vec::with_capacity(1 + image_parts.len());
            parts.push(ContentPart::Text { text: text_block });
            parts.extend(image_parts);
            MessageContent::Parts(parts)
        }
    }

    /// Structured replacement block for an attachment the target cannot
    /// accept: reference, filename, type, size when known, and a capable-
    /// agent suggestion.
    async fn degraded_block(&self, att: &polis_types::Attachment, modality: Modality) -> String {
        let kind = match att.kind {
            AttachmentKind::Image => "image",
            AttachmentKind::File => "file",
        };
        let size_line = match self.artifacts.get(&att.artifact_ref).await {
            Ok((content, _)) => format!("size: {} 字节\n", content.len()),
            Err(_) => String::new(),
        };
        let capable = self.org.find_capable_agents(modality);
        let suggestion = if capable.is_empty() {
            "当前没有具备该输入能力的智能体。".to_string()
        } else {
            format!(
                "可将该附件转发给具备 {kind} 输入能力的智能体：{}",
                capable.join(", ")
            )
        };
        format!(
            "【附件（当前模型不支持 {kind} 输入）】\nartifactRef: {}\nfilename: {}\ntype: {kind}\n{size_line}{suggestion}",
            att.artifact_ref, att.filename
        )
    }
}
