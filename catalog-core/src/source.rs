//! Source configuration and the provider contract.
//!
//! A source is one configured ingress of entities for a plugin: a YAML file,
//! a remote index, a cluster object. Providers produce a finite batch of
//! records and must be restartable, because every refresh re-invokes them.

use crate::error::CoreError;
use crate::record::Record;
use crate::validation::LayerResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

fn default_enabled() -> bool {
    true
}

/// A configured source for one plugin.
///
/// `(pluginName, sourceId)` is globally unique; the config store enforces the
/// per-plugin half and plugin names are unique by registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    /// Free-form provider properties. Values may be `{secretRef: {...}}`
    /// objects which are resolved before the provider sees them.
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
    /// Where this config was loaded from; relative paths in properties are
    /// resolved against it. Never serialized back out.
    #[serde(skip)]
    pub origin: Option<PathBuf>,
}

impl SourceConfig {
    /// Resolves a path-valued property against the config's origin.
    pub fn resolve_path(&self, value: &str) -> PathBuf {
        let path = PathBuf::from(value);
        if path.is_absolute() {
            return path;
        }
        match &self.origin {
            Some(origin) => origin
                .parent()
                .map(|dir| dir.join(&path))
                .unwrap_or(path),
            None => path,
        }
    }
}

/// Lifecycle state of a source as reported in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceState {
    Pending,
    Available,
    Error,
    Disabled,
}

/// Per-source diagnostics exposed under `GET {basePath}/diagnostics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    pub source_id: String,
    pub state: SourceState,
    pub entity_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh_duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceStatus {
    pub fn pending(source_id: impl Into<String>) -> Self {
        SourceStatus {
            source_id: source_id.into(),
            state: SourceState::Pending,
            entity_count: 0,
            last_refresh_time: None,
            last_refresh_duration_ms: None,
            error: None,
        }
    }
}

/// Cancellation handle passed to providers.
///
/// Providers should observe `shutdown` at their suspension points so long
/// fetches stop promptly when the request is dropped or the process exits.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub shutdown: watch::Receiver<bool>,
}

impl SourceContext {
    pub fn new(shutdown: watch::Receiver<bool>) -> Self {
        SourceContext { shutdown }
    }

    /// A context that never cancels, for tests and one-shot loads.
    pub fn detached() -> Self {
        let (_tx, rx) = watch::channel(false);
        SourceContext { shutdown: rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Producer of a finite batch of records for one source type.
#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    /// The `type` value this provider handles, e.g. `yaml`.
    fn source_type(&self) -> &str;

    /// Type-specific property validation, run as the third validator layer.
    fn check_properties(&self, cfg: &SourceConfig) -> LayerResult;

    /// Produces the full entity set for the source. Must be restartable.
    async fn fetch(&self, cfg: &SourceConfig, ctx: &SourceContext) -> Result<Vec<Record>, CoreError>;

    /// Default background refresh interval for sources of this type.
    fn refresh_interval(&self) -> Duration {
        Duration::from_secs(300)
    }

    /// For file-backed sources, the path the scheduler should poll for
    /// changes (every 5s by default).
    fn watch_path(&self, _cfg: &SourceConfig) -> Option<PathBuf> {
        None
    }
}
