//! Organization template store.
//!
//! Templates are saved organization blueprints (roles + spawn layout)
//! that the UI can apply to bootstrap a task. They persist as a single
//! JSON file in the runtime directory.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use polis_types::{PolisError, Result};

/// One stored organization template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgTemplate {
    /// Template id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-form template body (roles, layout, prompts).
    pub body: Value,
}

/// File-backed template CRUD.
pub struct OrgTemplateStore {
    path: PathBuf,
    templates: Mutex<HashMap<String, OrgTemplate>>,
}

impl OrgTemplateStore {
    /// Open the store, loading any existing file.
    pub fn open(runtime_dir: &std::path::Path) -> Result<Self> {
        let path = runtime_dir.join("org-templates.json");
        let templates = match std::fs::read(&path) {
            Ok(bytes) => {
                let list: Vec<OrgTemplate> = serde_json::from_slice(&bytes)?;
                list.into_iter().map(|t| (t.id.clone(), t)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(PolisError::Io(e)),
        };
        Ok(Self {
            path,
            templates: Mutex::new(templates),
        })
    }

    fn flush(&self, templates: &HashMap<String, OrgTemplate>) -> Result<()> {
        let mut list: Vec<&OrgTemplate> = templates.values().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        let bytes = serde_json::to_vec_pretty(&list)?;
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }

    /// All templates, sorted by name.
    pub fn list(&self) -> Vec<OrgTemplate> {
        let templates = self.templates.lock().expect("template lock poisoned");
        let mut list: Vec<OrgTemplate> = templates.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Look up one template.
    pub fn get(&self, id: &str) -> Option<OrgTemplate> {
        self.templates
            .lock()
            .expect("template lock poisoned")
            .get(id)
            .cloned()
    }

    /// Create a template with a generated id.
    pub fn create(&self, name: &str, body: Value) -> Result<OrgTemplate> {
        let template = OrgTemplate {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            body,
        };
        let mut templates = self.templates.lock().expect("template lock poisoned");
        templates.insert(template.id.clone(), template.clone());
        self.flush(&templates)?;
        Ok(template)
    }

    /// Update a template. `false` when the id is unknown.
    pub fn update(&self, id: &str, name: Option<&str>, body: Option<Value>) -> Result<bool> {
        let mut templates = self.templates.lock().expect("template lock poisoned");
        let Some(template) = templates.get_mut(id) else {
            return Ok(false);
        };
        if let Some(name) = name {
            template.name = name.to_string();
        }
        if let Some(body) = body {
            template.body = body;
        }
        self.flush(&templates)?;
        Ok(true)
    }

    /// Delete a template. `false` when the id is unknown.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut templates = self.templates.lock().expect("template lock poisoned");
        let removed = templates.remove(id).is_some();
        if removed {
            self.flush(&templates)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn crud_roundtrip_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = OrgTemplateStore::open(dir.path()).unwrap();

        let t = store
            .create("饭店模拟", json!({"roles": ["厨师", "服务员"]}))
            .unwrap();
        assert_eq!(store.list().len(), 1);
        assert_eq!(store.get(&t.id).unwrap().name, "饭店模拟");

        assert!(store.update(&t.id, Some("餐厅模拟"), None).unwrap());
        assert_eq!(store.get(&t.id).unwrap().name, "餐厅模拟");

        // Reopen from disk: edits survived.
        let reopened = OrgTemplateStore::open(dir.path()).unwrap();
        assert_eq!(reopened.list().len(), 1);
        assert_eq!(reopened.list()[0].name, "餐厅模拟");

        assert!(store.delete(&t.id).unwrap());
        assert!(store.get(&t.id).is_none());
        assert!(!store.delete(&t.id).unwrap());
    }

    #[test]
    fn unknown_updates_are_false() {
        let dir = tempfile::tempdir().unwrap();
        let store = OrgTemplateStore::open(dir.path()).unwrap();
        assert!(!store.update("ghost", Some("x"), None).unwrap());
    }
}
