//! In-memory config store for `mode = none`.
//!
//! Mutations behave like the other backends but nothing is persisted; the
//! store can be seeded from a `sources.yaml` on disk so a read-only
//! deployment still serves configured sources.

use super::{ConfigStore, RevisionRing, SourceDocument};
use catalog_core::error::CoreError;
use catalog_core::source::SourceConfig;
use std::path::PathBuf;
use tokio::sync::Mutex;

pub struct MemoryConfigStore {
    origin: Option<PathBuf>,
    state: Mutex<(SourceDocument, RevisionRing)>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        MemoryConfigStore {
            origin: None,
            state: Mutex::new((SourceDocument::default(), RevisionRing::new(10))),
        }
    }

    /// Seeds from a document on disk when one exists.
    pub fn seeded(path: &str) -> Self {
        let (document, origin) = match std::fs::read_to_string(path) {
            Ok(raw) => match SourceDocument::parse(&raw) {
                Ok(doc) => (doc, Some(PathBuf::from(path))),
                Err(e) => {
                    tracing::warn!("ignoring seed document '{path}': {e}");
                    (SourceDocument::default(), None)
                }
            },
            Err(_) => (SourceDocument::default(), None),
        };
        MemoryConfigStore {
            origin,
            state: Mutex::new((document, RevisionRing::new(10))),
        }
    }

    fn stamp_origin(&self, mut cfg: SourceConfig) -> SourceConfig {
        cfg.origin = self.origin.clone();
        cfg
    }
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        MemoryConfigStore::new()
    }
}

#[async_trait::async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn list(&self, plugin: &str) -> Result<Vec<SourceConfig>, CoreError> {
        let state = self.state.lock().await;
        Ok(state
            .0
            .list(plugin)
            .into_iter()
            .map(|cfg| self.stamp_origin(cfg))
            .collect())
    }

    async fn get(&self, plugin: &str, id: &str) -> Result<SourceConfig, CoreError> {
        let state = self.state.lock().await;
        state.0.get(plugin, id).map(|cfg| self.stamp_origin(cfg))
    }

    async fn upsert(&self, plugin: &str, cfg: SourceConfig) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        let prior = state.0.render()?;
        state.1.push(prior);
        state.0.upsert(plugin, cfg);
        Ok(())
    }

    async fn delete(&self, plugin: &str, id: &str) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        let prior = state.0.render()?;
        state.0.delete(plugin, id)?;
        state.1.push(prior);
        Ok(())
    }

    async fn set_enabled(&self, plugin: &str, id: &str, enabled: bool) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        let prior = state.0.render()?;
        state.0.set_enabled(plugin, id, enabled)?;
        state.1.push(prior);
        Ok(())
    }

    async fn snapshot(&self) -> Result<String, CoreError> {
        let mut state = self.state.lock().await;
        let payload = state.0.render()?;
        Ok(state.1.push(payload))
    }

    async fn rollback(&self, token: &str) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        let payload = state
            .1
            .get(token)
            .ok_or_else(|| CoreError::not_found(format!("revision '{token}'")))?
            .to_string();
        state.0 = SourceDocument::parse(&payload)?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    #[tokio::test]
    async fn seeded_store_serves_and_mutates_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sources.yaml");
        std::fs::write(
            &path,
            "catalogs:\n  - name: mcp\n    sources:\n      - id: a\n        name: a\n        type: yaml\n",
        )
        .unwrap();

        let store = MemoryConfigStore::seeded(path.to_str().unwrap());
        assert_eq!(store.list("mcp").await.unwrap().len(), 1);

        store
            .upsert(
                "mcp",
                SourceConfig {
                    id: "b".into(),
                    name: "b".into(),
                    source_type: "yaml".into(),
                    enabled: true,
                    labels: BTreeSet::new(),
                    properties: BTreeMap::new(),
                    origin: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(store.list("mcp").await.unwrap().len(), 2);

        // The seed file stays untouched.
        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert!(!on_disk.contains("id: b"));
    }
}
