//! The YAML catalog file provider.
//!
//! Reads a document of the form
//!
//! ```yaml
//! entries:
//!   - name: filesystem
//!     description: Filesystem MCP server
//!     properties:
//!       transport: stdio
//!     customProperties:
//!       homepage: https://example.com
//! ```
//!
//! from the path given by the `yamlCatalogPath` source property, resolved
//! relative to the source config's origin. Entry timestamps default to the
//! file's modification time so repeated refreshes of an unchanged file keep
//! stable values.

use crate::error::CoreError;
use crate::record::{PropertyValue, Record};
use crate::source::{SourceConfig, SourceContext, SourceProvider};
use crate::validation::LayerResult;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Property key naming the catalog file.
pub const PROP_CATALOG_PATH: &str = "yamlCatalogPath";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YamlEntry {
    name: String,
    #[serde(default)]
    external_id: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    create_time_since_epoch: Option<i64>,
    #[serde(default)]
    last_update_time_since_epoch: Option<i64>,
    #[serde(default)]
    properties: BTreeMap<String, PropertyValue>,
    #[serde(default)]
    custom_properties: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct YamlCatalogDocument {
    #[serde(default)]
    entries: Vec<YamlEntry>,
}

/// Provider for `type: yaml` sources.
#[derive(Debug, Default)]
pub struct YamlSourceProvider;

impl YamlSourceProvider {
    pub fn new() -> Self {
        YamlSourceProvider
    }

    fn catalog_path(&self, cfg: &SourceConfig) -> Option<PathBuf> {
        cfg.properties
            .get(PROP_CATALOG_PATH)
            .and_then(|v| v.as_str())
            .map(|raw| cfg.resolve_path(raw))
    }
}

#[async_trait::async_trait]
impl SourceProvider for YamlSourceProvider {
    fn source_type(&self) -> &str {
        "yaml"
    }

    fn check_properties(&self, cfg: &SourceConfig) -> LayerResult {
        let result = LayerResult::ok("properties");
        match cfg.properties.get(PROP_CATALOG_PATH) {
            Some(value) if value.is_string() => result,
            Some(_) => result.error(format!("'{PROP_CATALOG_PATH}' must be a string")),
            None => result.error(format!("yaml sources require '{PROP_CATALOG_PATH}'")),
        }
    }

    async fn fetch(
        &self,
        cfg: &SourceConfig,
        ctx: &SourceContext,
    ) -> Result<Vec<Record>, CoreError> {
        if ctx.is_cancelled() {
            return Err(CoreError::source("fetch cancelled"));
        }
        let path = self
            .catalog_path(cfg)
            .ok_or_else(|| CoreError::invalid(format!("missing '{PROP_CATALOG_PATH}'")))?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            CoreError::source(format!("reading '{}': {e}", path.display()))
        })?;
        let document: YamlCatalogDocument = serde_yaml::from_slice(&bytes)?;

        let mtime_ms = tokio::fs::metadata(&path)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        let mut seen = std::collections::BTreeSet::new();
        let mut records = Vec::with_capacity(document.entries.len());
        for entry in document.entries {
            if !seen.insert(entry.name.clone()) {
                return Err(CoreError::source(format!(
                    "duplicate entry name '{}' in '{}'",
                    entry.name,
                    path.display()
                )));
            }
            let mut record = Record::new(entry.name);
            record.external_id = entry.external_id;
            record.create_time_since_epoch = entry.create_time_since_epoch.unwrap_or(mtime_ms);
            record.last_update_time_since_epoch =
                entry.last_update_time_since_epoch.unwrap_or(mtime_ms);
            record.properties = entry.properties;
            if let Some(description) = entry.description {
                record
                    .properties
                    .insert("description".into(), PropertyValue::String(description));
            }
            record.custom_properties = entry.custom_properties;
            records.push(record);
        }
        Ok(records)
    }

    fn refresh_interval(&self) -> Duration {
        Duration::from_secs(300)
    }

    fn watch_path(&self, cfg: &SourceConfig) -> Option<PathBuf> {
        self.catalog_path(cfg)
    }
}
