//! Persisted source configuration.
//!
//! The config store owns the full set of source configs per plugin as one
//! YAML document (`catalogs[].sources[]`) and exposes transactional replace
//! semantics with snapshot/rollback. Three interchangeable backends: a file
//! on disk (atomic temp-file + rename writes), a cluster config object
//! (optimistic concurrency with retry), and a purely in-memory store for
//! `mode = none`.

use catalog_core::error::CoreError;
use catalog_core::source::SourceConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod cluster;
pub mod file;
pub mod memory;

pub use cluster::ClusterConfigStore;
pub use file::FileConfigStore;
pub use memory::MemoryConfigStore;

use crate::config::{ConfigStoreMode, Settings};

fn default_api_version() -> String {
    "catalog.dev/v1alpha1".to_string()
}

fn default_kind() -> String {
    "CatalogSourceList".to_string()
}

/// One plugin's section in the document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSection {
    pub name: String,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// The full `sources.yaml` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    #[serde(default = "default_api_version", rename = "apiVersion")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub catalogs: Vec<CatalogSection>,
}

impl Default for SourceDocument {
    fn default() -> Self {
        SourceDocument {
            api_version: default_api_version(),
            kind: default_kind(),
            catalogs: Vec::new(),
        }
    }
}

impl SourceDocument {
    pub fn parse(raw: &str) -> Result<SourceDocument, CoreError> {
        serde_yaml::from_str(raw).map_err(|e| CoreError::invalid(format!("sources document: {e}")))
    }

    pub fn render(&self) -> Result<String, CoreError> {
        serde_yaml::to_string(self).map_err(CoreError::from)
    }

    fn section_mut(&mut self, plugin: &str) -> &mut CatalogSection {
        if let Some(idx) = self.catalogs.iter().position(|c| c.name == plugin) {
            return &mut self.catalogs[idx];
        }
        self.catalogs.push(CatalogSection {
            name: plugin.to_string(),
            sources: Vec::new(),
        });
        self.catalogs.last_mut().unwrap()
    }

    pub fn list(&self, plugin: &str) -> Vec<SourceConfig> {
        self.catalogs
            .iter()
            .find(|c| c.name == plugin)
            .map(|c| c.sources.clone())
            .unwrap_or_default()
    }

    pub fn get(&self, plugin: &str, id: &str) -> Result<SourceConfig, CoreError> {
        self.list(plugin)
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| CoreError::not_found(format!("source '{plugin}/{id}'")))
    }

    /// Inserts or replaces by id, keeping list order stable on replace.
    pub fn upsert(&mut self, plugin: &str, cfg: SourceConfig) {
        let section = self.section_mut(plugin);
        match section.sources.iter_mut().find(|s| s.id == cfg.id) {
            Some(slot) => *slot = cfg,
            None => section.sources.push(cfg),
        }
    }

    pub fn delete(&mut self, plugin: &str, id: &str) -> Result<(), CoreError> {
        let section = self.section_mut(plugin);
        let before = section.sources.len();
        section.sources.retain(|s| s.id != id);
        if section.sources.len() == before {
            return Err(CoreError::not_found(format!("source '{plugin}/{id}'")));
        }
        Ok(())
    }

    pub fn set_enabled(&mut self, plugin: &str, id: &str, enabled: bool) -> Result<(), CoreError> {
        let section = self.section_mut(plugin);
        let source = section
            .sources
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| CoreError::not_found(format!("source '{plugin}/{id}'")))?;
        source.enabled = enabled;
        Ok(())
    }
}

/// The config store contract all backends implement.
#[async_trait::async_trait]
pub trait ConfigStore: Send + Sync {
    async fn list(&self, plugin: &str) -> Result<Vec<SourceConfig>, CoreError>;
    async fn get(&self, plugin: &str, id: &str) -> Result<SourceConfig, CoreError>;
    async fn upsert(&self, plugin: &str, cfg: SourceConfig) -> Result<(), CoreError>;
    async fn delete(&self, plugin: &str, id: &str) -> Result<(), CoreError>;
    async fn set_enabled(&self, plugin: &str, id: &str, enabled: bool) -> Result<(), CoreError>;
    /// Captures the current document and returns an opaque revision token.
    async fn snapshot(&self) -> Result<String, CoreError>;
    /// Restores the document captured under `token`.
    async fn rollback(&self, token: &str) -> Result<(), CoreError>;
    /// Backend liveness for readiness reporting.
    async fn ping(&self) -> Result<(), CoreError>;
}

/// Builds the backend selected by settings.
pub async fn build_config_store(settings: &Settings) -> anyhow::Result<Arc<dyn ConfigStore>> {
    match settings.config_store.mode {
        ConfigStoreMode::File => Ok(Arc::new(
            FileConfigStore::open(
                &settings.config_store.path,
                settings.config_store.revision_ring,
            )
            .await?,
        )),
        ConfigStoreMode::K8s => Ok(Arc::new(
            ClusterConfigStore::connect(&settings.config_store).await?,
        )),
        ConfigStoreMode::None => Ok(Arc::new(MemoryConfigStore::seeded(
            &settings.config_store.path,
        ))),
    }
}

/// A bounded ring of prior document revisions shared by the backends.
#[derive(Debug, Default)]
pub struct RevisionRing {
    entries: Vec<(String, String)>,
    capacity: usize,
}

impl RevisionRing {
    pub fn new(capacity: usize) -> Self {
        RevisionRing {
            entries: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, payload: String) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        self.entries.push((token.clone(), payload));
        if self.entries.len() > self.capacity {
            let overflow = self.entries.len() - self.capacity;
            self.entries.drain(0..overflow);
        }
        token
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, payload)| payload.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_roundtrip_and_edits() {
        let raw = r#"
apiVersion: catalog.dev/v1alpha1
kind: CatalogSourceList
catalogs:
  - name: mcp
    sources:
      - id: default
        name: Default
        type: yaml
        properties:
          yamlCatalogPath: mcp.yaml
"#;
        let mut doc = SourceDocument::parse(raw).unwrap();
        assert_eq!(doc.list("mcp").len(), 1);
        assert!(doc.get("mcp", "default").is_ok());
        assert!(doc.get("mcp", "missing").is_err());

        doc.set_enabled("mcp", "default", false).unwrap();
        assert!(!doc.get("mcp", "default").unwrap().enabled);

        doc.delete("mcp", "default").unwrap();
        assert!(doc.list("mcp").is_empty());
        assert!(doc.delete("mcp", "default").is_err());
    }

    #[test]
    fn revision_ring_is_bounded() {
        let mut ring = RevisionRing::new(2);
        let t1 = ring.push("one".into());
        let _t2 = ring.push("two".into());
        let t3 = ring.push("three".into());
        assert!(ring.get(&t1).is_none());
        assert_eq!(ring.get(&t3), Some("three"));
    }
}
