//! Content-addressed artifact store with sidecar metadata.
//!
//! Content bytes live in `{id}{extension}` and are never interpreted;
//! metadata lives in a sibling `{id}.meta` JSON file. Writes go through a
//! temp file and an atomic rename. Listing skips `.meta` sidecars.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use polis_types::{PolisError, Result};

/// Prefix of external artifact references.
const REF_PREFIX: &str = "artifact:";

/// Sidecar metadata for one stored artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMeta {
    /// Artifact id (a uuid).
    pub id: String,

    /// Declared content type (e.g. `image/png`, `text/plain`).
    #[serde(rename = "type")]
    pub artifact_type: String,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// File extension of the content file, dot included.
    pub extension: String,

    /// Message this artifact was attached to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    /// Free-form caller metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Blob storage rooted at one directory.
///
/// Safe under concurrent writers: every `put` allocates a fresh uuid, so
/// two writers never touch the same files.
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// The store's root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Allocate a fresh artifact id.
    pub fn generate_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Store `content` under a fresh id and return its `artifact:{id}` ref.
    pub async fn put(
        &self,
        content: &[u8],
        artifact_type: &str,
        meta: Option<Value>,
    ) -> Result<String> {
        let id = self.generate_id();
        let extension = extension_for(artifact_type);
        let record = ArtifactMeta {
            id: id.clone(),
            artifact_type: artifact_type.to_string(),
            created_at: Utc::now(),
            extension: extension.to_string(),
            message_id: None,
            meta,
        };

        self.write_atomic(&format!("{id}{extension}"), content)
            .await?;
        let meta_bytes = serde_json::to_vec_pretty(&record).map_err(|e| {
            PolisError::ArtifactWrite {
                reason: format!("failed to encode metadata: {e}"),
            }
        })?;
        self.write_atomic(&format!("{id}.meta"), &meta_bytes).await?;

        debug!(id = %id, artifact_type = %artifact_type, bytes = content.len(), "artifact stored");
        Ok(format!("{REF_PREFIX}{id}"))
    }

    /// Fetch content and metadata by `artifact:{id}` ref or bare id.
    pub async fn get(&self, reference: &str) -> Result<(Vec<u8>, ArtifactMeta)> {
        let id = strip_ref(reference);
        let meta = self.get_meta(id).await?;
        let content_path = self.dir.join(format!("{id}{}", meta.extension));
        let content = fs::read(&content_path)
            .await
            .map_err(|_| PolisError::ArtifactNotFound(reference.to_string()))?;
        Ok((content, meta))
    }

    /// Fetch metadata only.
    pub async fn get_meta(&self, reference: &str) -> Result<ArtifactMeta> {
        let id = strip_ref(reference);
        let meta_path = self.dir.join(format!("{id}.meta"));
        let bytes = fs::read(&meta_path)
            .await
            .map_err(|_| PolisError::ArtifactNotFound(reference.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| PolisError::ArtifactWrite {
            reason: format!("corrupt metadata for {id}: {e}"),
        })
    }

    /// Store image bytes and return the content filename (`{id}{ext}`).
    pub async fn save_image(&self, bytes: &[u8], meta: Option<Value>) -> Result<String> {
        let reference = self.put(bytes, "image/png", meta).await?;
        let id = strip_ref(&reference);
        Ok(format!("{id}.png"))
    }

    /// List stored artifact ids. `.meta` sidecars and stray temp files are
    /// never returned.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".meta") || name.ends_with(".tmp") {
                continue;
            }
            let stem = name.split('.').next().unwrap_or(&name).to_string();
            ids.push(stem);
        }
        ids.sort();
        Ok(ids)
    }

    async fn write_atomic(&self, filename: &str, content: &[u8]) -> Result<()> {
        let tmp = self.dir.join(format!("{filename}.tmp"));
        let target = self.dir.join(filename);
        fs::write(&tmp, content)
            .await
            .map_err(|e| PolisError::ArtifactWrite {
                reason: format!("{}: {e}", tmp.display()),
            })?;
        fs::rename(&tmp, &target)
            .await
            .map_err(|e| PolisError::ArtifactWrite {
                reason: format!("{}: {e}", target.display()),
            })?;
        Ok(())
    }
}

/// Strip the `artifact:` prefix, tolerating bare ids.
fn strip_ref(reference: &str) -> &str {
    reference.strip_prefix(REF_PREFIX).unwrap_or(reference)
}

/// Map a content type to a file extension. Unknown types get `.bin`.
fn extension_for(artifact_type: &str) -> &'static str {
    match artifact_type {
        "image/png" => ".png",
        "image/jpeg" | "image/jpg" => ".jpg",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "text/plain" => ".txt",
        "text/markdown" => ".md",
        "application/json" => ".json",
        _ => ".bin",
    }
}

/// MIME type for a stored artifact, derived from its recorded extension.
pub fn mime_for_extension(extension: &str) -> &'static str {
    match extension.trim_start_matches('.') {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (ArtifactStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let (store, _dir) = store().await;
        let reference = store
            .put(b"hello world", "text/plain", Some(serde_json::json!({"k": "v"})))
            .await
            .unwrap();
        assert!(reference.starts_with("artifact:"));

        let (content, meta) = store.get(&reference).await.unwrap();
        assert_eq!(content, b"hello world");
        assert_eq!(meta.artifact_type, "text/plain");
        assert_eq!(meta.extension, ".txt");
        assert_eq!(meta.meta.unwrap()["k"], "v");
    }

    #[tokio::test]
    async fn get_accepts_bare_id() {
        let (store, _dir) = store().await;
        let reference = store.put(b"x", "text/plain", None).await.unwrap();
        let bare = reference.strip_prefix("artifact:").unwrap();
        assert!(store.get(bare).await.is_ok());
    }

    #[tokio::test]
    async fn identical_content_gets_distinct_refs() {
        let (store, _dir) = store().await;
        let a = store.put(b"same", "text/plain", None).await.unwrap();
        let b = store.put(b"same", "text/plain", None).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn missing_artifact_is_not_found() {
        let (store, _dir) = store().await;
        let err = store.get("artifact:nope").await.unwrap_err();
        assert_eq!(err.code(), "artifact_not_found");
    }

    #[tokio::test]
    async fn list_skips_meta_sidecars() {
        let (store, _dir) = store().await;
        store.put(b"a", "text/plain", None).await.unwrap();
        store.put(b"b", "image/png", None).await.unwrap();

        let ids = store.list().await.unwrap();
        assert_eq!(ids.len(), 2);
        for id in &ids {
            assert!(!id.ends_with(".meta"));
            assert!(!id.contains('.'));
        }
    }

    #[tokio::test]
    async fn save_image_returns_content_filename() {
        let (store, _dir) = store().await;
        let filename = store.save_image(&[0x89, 0x50, 0x4e, 0x47], None).await.unwrap();
        assert!(filename.ends_with(".png"));

        let id = filename.strip_suffix(".png").unwrap();
        let (content, meta) = store.get(id).await.unwrap();
        assert_eq!(content, vec![0x89, 0x50, 0x4e, 0x47]);
        assert_eq!(meta.artifact_type, "image/png");
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(ArtifactStore::open(dir.path()).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .put(format!("content-{i}").as_bytes(), "text/plain", None)
                    .await
                    .unwrap()
            }));
        }

        let mut refs = Vec::new();
        for h in handles {
            refs.push(h.await.unwrap());
        }
        refs.sort();
        refs.dedup();
        assert_eq!(refs.len(), 16);
    }

    #[test]
    fn mime_mapping() {
        assert_eq!(mime_for_extension(".jpg"), "image/jpeg");
        assert_eq!(mime_for_extension("png"), "image/png");
        assert_eq!(mime_for_extension(".weird"), "application/octet-stream");
    }
}
