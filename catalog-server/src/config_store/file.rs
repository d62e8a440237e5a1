//! File-backed config store.
//!
//! The document lives in one YAML file. Writes go to a sibling temp file
//! first and are renamed into place, so readers never observe a torn write.
//! Prior revisions are kept in a bounded in-process ring for rollback.

use super::{ConfigStore, RevisionRing, SourceDocument};
use catalog_core::error::CoreError;
use catalog_core::source::SourceConfig;
use std::path::PathBuf;
use tokio::sync::Mutex;

struct FileState {
    document: SourceDocument,
    revisions: RevisionRing,
}

pub struct FileConfigStore {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl FileConfigStore {
    /// Loads the document, creating an empty one when the file is absent.
    pub async fn open(path: &str, revision_ring: usize) -> anyhow::Result<Self> {
        let path = PathBuf::from(path);
        let document = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => SourceDocument::parse(&raw)
                .map_err(|e| anyhow::anyhow!("parsing '{}': {e}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SourceDocument::default(),
            Err(e) => return Err(anyhow::anyhow!("reading '{}': {e}", path.display())),
        };
        Ok(FileConfigStore {
            path,
            state: Mutex::new(FileState {
                document,
                revisions: RevisionRing::new(revision_ring),
            }),
        })
    }

    fn stamp_origin(&self, mut cfg: SourceConfig) -> SourceConfig {
        cfg.origin = Some(self.path.clone());
        cfg
    }

    async fn persist(&self, document: &SourceDocument) -> Result<(), CoreError> {
        let payload = document.render()?;
        let tmp = self.path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp, payload.as_bytes()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Runs a mutation under the store lock, pushing the prior payload into
    /// the revision ring before writing the new document out.
    async fn mutate<F>(&self, f: F) -> Result<(), CoreError>
    where
        F: FnOnce(&mut SourceDocument) -> Result<(), CoreError>,
    {
        let mut state = self.state.lock().await;
        let prior = state.document.render()?;
        let mut next = state.document.clone();
        f(&mut next)?;
        self.persist(&next).await?;
        state.revisions.push(prior);
        state.document = next;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConfigStore for FileConfigStore {
    async fn list(&self, plugin: &str) -> Result<Vec<SourceConfig>, CoreError> {
        let state = self.state.lock().await;
        Ok(state
            .document
            .list(plugin)
            .into_iter()
            .map(|cfg| self.stamp_origin(cfg))
            .collect())
    }

    async fn get(&self, plugin: &str, id: &str) -> Result<SourceConfig, CoreError> {
        let state = self.state.lock().await;
        state.document.get(plugin, id).map(|cfg| self.stamp_origin(cfg))
    }

    async fn upsert(&self, plugin: &str, cfg: SourceConfig) -> Result<(), CoreError> {
        self.mutate(|doc| {
            doc.upsert(plugin, cfg);
            Ok(())
        })
        .await
    }

    async fn delete(&self, plugin: &str, id: &str) -> Result<(), CoreError> {
        self.mutate(|doc| doc.delete(plugin, id)).await
    }

    async fn set_enabled(&self, plugin: &str, id: &str, enabled: bool) -> Result<(), CoreError> {
        self.mutate(|doc| doc.set_enabled(plugin, id, enabled)).await
    }

    async fn snapshot(&self) -> Result<String, CoreError> {
        let mut state = self.state.lock().await;
        let payload = state.document.render()?;
        Ok(state.revisions.push(payload))
    }

    async fn rollback(&self, token: &str) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        let payload = state
            .revisions
            .get(token)
            .ok_or_else(|| CoreError::not_found(format!("revision '{token}'")))?
            .to_string();
        let document = SourceDocument::parse(&payload)?;
        self.persist(&document).await?;
        state.document = document;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CoreError> {
        // The directory must stay writable for the rename dance.
        let dir = self.path.parent().unwrap_or_else(|| std::path::Path::new("."));
        tokio::fs::metadata(dir).await?;
        Ok(())
    }
}
