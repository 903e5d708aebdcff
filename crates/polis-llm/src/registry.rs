//! LLM service catalog.
//!
//! The registry loads a JSON array of service entries from a local file,
//! falling back to a default file when the local one is absent. The local
//! variant shadows the default entirely; the two are never merged. Invalid
//! entries are dropped with a warning, never fatally.

use std::path::Path;
use std::sync::RwLock;

use serde_json::Value;
use tracing::warn;

use polis_types::{Direction, LlmServiceDesc, Modality, ServiceCapabilities};

/// Catalog of configured LLM services with capability queries.
///
/// Interior mutability allows the HTTP configuration surface to replace
/// the catalog at runtime without tearing down the client.
pub struct ServiceRegistry {
    services: RwLock<Vec<LlmServiceDesc>>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            services: RwLock::new(Vec::new()),
        }
    }

    /// Create a registry from already-validated entries.
    pub fn from_services(services: Vec<LlmServiceDesc>) -> Self {
        Self {
            services: RwLock::new(services),
        }
    }

    /// Load the catalog: `local_path` if it exists, else `default_path`,
    /// else empty. Unparseable files and invalid entries are skipped with
    /// a warning.
    pub fn load(local_path: &Path, default_path: &Path) -> Self {
        let services = if local_path.exists() {
            parse_catalog_file(local_path)
        } else {
            parse_catalog_file(default_path)
        };
        Self::from_services(services)
    }

    /// Replace the whole catalog (configuration CRUD surface).
    pub fn replace_all(&self, services: Vec<LlmServiceDesc>) {
        let mut guard = self.services.write().expect("registry lock poisoned");
        *guard = services;
    }

    /// Look up a service by id.
    pub fn get(&self, id: &str) -> Option<LlmServiceDesc> {
        let guard = self.services.read().expect("registry lock poisoned");
        guard.iter().find(|s| s.id == id).cloned()
    }

    /// All services, in catalog order.
    pub fn list(&self) -> Vec<LlmServiceDesc> {
        self.services
            .read()
            .expect("registry lock poisoned")
            .clone()
    }

    /// Number of catalog entries.
    pub fn len(&self) -> usize {
        self.services.read().expect("registry lock poisoned").len()
    }

    /// True when the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Effective capabilities of a service, or `None` for unknown ids.
    pub fn capabilities_of(&self, id: &str) -> Option<ServiceCapabilities> {
        self.get(id).map(|s| s.effective_capabilities())
    }

    /// Whether the service declares `modality` for `direction`. Unknown
    /// ids answer `false`.
    pub fn has_capability(&self, id: &str, modality: Modality, direction: Direction) -> bool {
        self.capabilities_of(id)
            .map(|caps| caps.supports(modality, direction))
            .unwrap_or(false)
    }

    /// Services declaring `modality` for `direction`, in catalog order.
    pub fn services_by_capability(
        &self,
        modality: Modality,
        direction: Direction,
    ) -> Vec<LlmServiceDesc> {
        self.services
            .read()
            .expect("registry lock poisoned")
            .iter()
            .filter(|s| s.effective_capabilities().supports(modality, direction))
            .cloned()
            .collect()
    }

    /// Human-readable catalog description for the selector meta-LLM.
    pub fn catalog_description(&self) -> String {
        let guard = self.services.read().expect("registry lock poisoned");
        guard
            .iter()
            .map(|s| {
                format!(
                    "- id: {} | name: {} | model: {} | tags: [{}] | {}",
                    s.id,
                    s.name,
                    s.model,
                    s.capability_tags.join(", "),
                    s.description
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a catalog file into validated entries. Any failure yields an
/// empty list (with a warning); a partially-bad file keeps its good rows.
fn parse_catalog_file(path: &Path) -> Vec<LlmServiceDesc> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            if path.exists() {
                warn!(path = %path.display(), error = %e, "failed to read llm services file");
            }
            return Vec::new();
        }
    };
    let value: Value = match serde_json::from_str(&contents) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "llm services file is not valid JSON");
            return Vec::new();
        }
    };
    parse_catalog_entries(&value)
}

/// Validate catalog entries one by one, dropping malformed rows.
pub fn parse_catalog_entries(value: &Value) -> Vec<LlmServiceDesc> {
    let Some(entries) = value.as_array() else {
        warn!("llm services catalog is not an array, ignoring");
        return Vec::new();
    };

    let mut services = Vec::new();
    for (idx, entry) in entries.iter().enumerate() {
        match serde_json::from_value::<LlmServiceDesc>(entry.clone()) {
            Ok(svc) => services.push(svc),
            Err(e) => {
                warn!(index = idx, error = %e, "skipping invalid llm service entry");
            }
        }
    }
    services
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn catalog_value() -> Value {
        json!([
            {
                "id": "text-only",
                "name": "Text Only",
                "baseURL": "https://a.example.com/v1",
                "model": "model-a",
                "apiKey": "key-a"
            },
            {
                "id": "vision",
                "name": "Vision",
                "baseURL": "https://b.example.com/v1",
                "model": "model-b",
                "apiKey": "key-b",
                "capabilities": {"input": ["text", "image"], "output": ["text"]}
            },
            {
                "id": 42,
                "name": "broken entry"
            }
        ])
    }

    #[test]
    fn invalid_entries_are_skipped() {
        let services = parse_catalog_entries(&catalog_value());
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].id, "text-only");
        assert_eq!(services[1].id, "vision");
    }

    #[test]
    fn non_array_catalog_is_empty() {
        assert!(parse_catalog_entries(&json!({"not": "an array"})).is_empty());
    }

    #[test]
    fn capability_queries() {
        let reg = ServiceRegistry::from_services(parse_catalog_entries(&catalog_value()));
        assert!(reg.has_capability("vision", Modality::Image, Direction::Input));
        assert!(!reg.has_capability("text-only", Modality::Image, Direction::Input));
        assert!(reg.has_capability("text-only", Modality::Text, Direction::Input));
        assert!(!reg.has_capability("missing", Modality::Text, Direction::Input));

        let image_capable = reg.services_by_capability(Modality::Image, Direction::Input);
        assert_eq!(image_capable.len(), 1);
        assert_eq!(image_capable[0].id, "vision");
    }

    #[test]
    fn local_file_shadows_default() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("llm-services.local.json");
        let default = dir.path().join("llm-services.json");

        let mut f = std::fs::File::create(&default).unwrap();
        write!(
            f,
            "{}",
            json!([{"id": "from-default", "name": "D", "baseURL": "https://d/v1", "model": "m"}])
        )
        .unwrap();

        let mut f = std::fs::File::create(&local).unwrap();
        write!(
            f,
            "{}",
            json!([{"id": "from-local", "name": "L", "baseURL": "https://l/v1", "model": "m"}])
        )
        .unwrap();

        let reg = ServiceRegistry::load(&local, &default);
        assert_eq!(reg.len(), 1);
        assert!(reg.get("from-local").is_some());
        assert!(reg.get("from-default").is_none());
    }

    #[test]
    fn falls_back_to_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("llm-services.local.json");
        let default = dir.path().join("llm-services.json");

        let mut f = std::fs::File::create(&default).unwrap();
        write!(
            f,
            "{}",
            json!([{"id": "from-default", "name": "D", "baseURL": "https://d/v1", "model": "m"}])
        )
        .unwrap();

        let reg = ServiceRegistry::load(&local, &default);
        assert!(reg.get("from-default").is_some());
    }

    #[test]
    fn missing_both_files_is_empty_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let reg = ServiceRegistry::load(
            &dir.path().join("nope.local.json"),
            &dir.path().join("nope.json"),
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn replace_all_swaps_catalog() {
        let reg = ServiceRegistry::from_services(parse_catalog_entries(&catalog_value()));
        assert_eq!(reg.len(), 2);
        reg.replace_all(Vec::new());
        assert!(reg.is_empty());
    }

    #[test]
    fn catalog_description_mentions_every_service() {
        let reg = ServiceRegistry::from_services(parse_catalog_entries(&catalog_value()));
        let desc = reg.catalog_description();
        assert!(desc.contains("text-only"));
        assert!(desc.contains("vision"));
    }
}
