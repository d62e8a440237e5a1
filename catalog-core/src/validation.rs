//! Layered validation of proposed source configs.
//!
//! Validation runs as an ordered pipeline. Each layer reports a
//! [`LayerResult`]; the overall outcome is valid iff every layer is valid.
//! Warnings never fail a config. The reachability layer probes the source
//! non-destructively and only hardens into errors at plugin init, so a
//! `validate-source` call against a temporarily unreachable file still
//! succeeds with a warning.

use crate::error::CoreError;
use crate::source::{SourceConfig, SourceProvider};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// How the pipeline is being invoked; decides how layer 4 failures count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// `validate-source`: reachability problems are warnings.
    ValidateOnly,
    /// `apply-source`: reachability problems are warnings; the next refresh
    /// surfaces them in diagnostics.
    Apply,
    /// Plugin init: reachability problems are hard errors.
    Init,
}

/// Result of one validation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerResult {
    pub layer: String,
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl LayerResult {
    pub fn ok(layer: impl Into<String>) -> Self {
        LayerResult {
            layer: layer.into(),
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.valid = false;
        self.errors.push(message.into());
        self
    }

    pub fn warning(mut self, message: impl Into<String>) -> Self {
        self.warnings.push(message.into());
        self
    }
}

/// Aggregated outcome of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub valid: bool,
    pub layers: Vec<LayerResult>,
}

impl ValidationOutcome {
    pub fn errors(&self) -> Vec<String> {
        self.layers
            .iter()
            .flat_map(|l| l.errors.iter().cloned())
            .collect()
    }
}

/// Organisation-level rules applied as the final layer.
#[derive(Debug, Clone, Default)]
pub struct ValidationPolicy {
    /// When non-empty, remote `url` properties must start with one of these
    /// prefixes.
    pub trusted_source_prefixes: Vec<String>,
}

/// The validation pipeline for one plugin's sources.
pub struct SourceValidator<'a> {
    /// Source ids already present in the plugin, for uniqueness checks.
    pub existing_ids: BTreeSet<String>,
    /// Source types the plugin has a provider for.
    pub registered_types: BTreeSet<String>,
    /// Provider for the proposed config's type, if registered.
    pub provider: Option<&'a dyn SourceProvider>,
    pub policy: ValidationPolicy,
}

impl<'a> SourceValidator<'a> {
    /// Runs all five layers in order and aggregates the outcome.
    pub async fn validate(&self, cfg: &SourceConfig, mode: ValidationMode) -> ValidationOutcome {
        let mut layers = Vec::with_capacity(5);
        layers.push(self.schema_layer(cfg));
        layers.push(self.type_layer(cfg));
        layers.push(self.properties_layer(cfg));
        layers.push(self.reachability_layer(cfg, mode).await);
        layers.push(self.policy_layer(cfg));
        let valid = layers.iter().all(|l| l.valid);
        ValidationOutcome { valid, layers }
    }

    fn schema_layer(&self, cfg: &SourceConfig) -> LayerResult {
        let mut result = LayerResult::ok("schema");
        if cfg.id.trim().is_empty() {
            result = result.error("source id must not be empty");
        }
        if cfg.name.trim().is_empty() {
            result = result.error("source name must not be empty");
        }
        if cfg.source_type.trim().is_empty() {
            result = result.error("source type must not be empty");
        }
        if self.existing_ids.contains(&cfg.id) {
            result = result.error(format!("source id '{}' already exists", cfg.id));
        }
        for label in &cfg.labels {
            if label.trim().is_empty() || label.contains(char::is_whitespace) {
                result = result.error(format!("label '{label}' is not well-formed"));
            }
        }
        result
    }

    fn type_layer(&self, cfg: &SourceConfig) -> LayerResult {
        if self.registered_types.contains(&cfg.source_type) {
            LayerResult::ok("type")
        } else {
            LayerResult::ok("type").error(format!(
                "source type '{}' is not registered (known: {})",
                cfg.source_type,
                self.registered_types
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        }
    }

    fn properties_layer(&self, cfg: &SourceConfig) -> LayerResult {
        match self.provider {
            Some(provider) => provider.check_properties(cfg),
            // Type layer already failed; do not pile on.
            None => LayerResult::ok("properties"),
        }
    }

    async fn reachability_layer(&self, cfg: &SourceConfig, mode: ValidationMode) -> LayerResult {
        let mut result = LayerResult::ok("reachability");
        let hard = mode == ValidationMode::Init;

        if let Some(path) = self
            .provider
            .and_then(|p| p.watch_path(cfg))
        {
            if tokio::fs::metadata(&path).await.is_err() {
                let message = format!("file '{}' is not readable", path.display());
                result = if hard {
                    result.error(message)
                } else {
                    result.warning(message)
                };
            }
        }

        if let Some(url) = cfg.properties.get("url").and_then(|v| v.as_str()) {
            let probe = reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build();
            let reachable = match probe {
                Ok(client) => matches!(client.head(url).send().await, Ok(resp) if !resp.status().is_server_error()),
                Err(_) => false,
            };
            if !reachable {
                let message = format!("url '{url}' did not answer a HEAD probe");
                result = if hard {
                    result.error(message)
                } else {
                    result.warning(message)
                };
            }
        }

        result
    }

    fn policy_layer(&self, cfg: &SourceConfig) -> LayerResult {
        let mut result = LayerResult::ok("policy");
        if self.policy.trusted_source_prefixes.is_empty() {
            return result;
        }
        if let Some(url) = cfg.properties.get("url").and_then(|v| v.as_str()) {
            let trusted = self
                .policy
                .trusted_source_prefixes
                .iter()
                .any(|prefix| url.starts_with(prefix));
            if !trusted {
                result = result.error(format!("url '{url}' is not on the trusted source list"));
            }
        }
        result
    }
}

/// Convenience conversion for callers that treat an invalid outcome as an
/// error value.
impl ValidationOutcome {
    pub fn into_result(self) -> Result<ValidationOutcome, CoreError> {
        if self.valid {
            Ok(self)
        } else {
            Err(CoreError::invalid(self.errors().join("; ")))
        }
    }
}
