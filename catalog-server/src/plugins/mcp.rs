//! The MCP server catalog plugin.
//!
//! Serves `McpServer` entities under `/api/mcp_catalog/v1alpha1/mcpservers`,
//! fed by YAML catalog files. Declares one source-scoped `probe` action on
//! top of the builtins and opts into governance.

use super::{
    ActionProvider, ActionTarget, AssetMapperProvider, AssetRef, CatalogPlugin, EntityKindSpec,
    Migration, MigrationProvider,
};
use catalog_core::actions::{ActionDefinition, ActionRequest, ActionResult, ActionScope};
use catalog_core::error::CoreError;
use catalog_core::providers::yaml::{YamlSourceProvider, PROP_CATALOG_PATH};
use catalog_core::source::{SourceConfig, SourceProvider};
use serde_json::json;
use std::sync::Arc;

pub const PLUGIN_NAME: &str = "mcp";
pub const KIND_MCP_SERVER: &str = "McpServer";

pub struct McpCatalogPlugin {
    yaml: Arc<YamlSourceProvider>,
}

impl McpCatalogPlugin {
    pub fn new() -> Self {
        McpCatalogPlugin {
            yaml: Arc::new(YamlSourceProvider::new()),
        }
    }
}

impl Default for McpCatalogPlugin {
    fn default() -> Self {
        McpCatalogPlugin::new()
    }
}

#[async_trait::async_trait]
impl CatalogPlugin for McpCatalogPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn description(&self) -> &str {
        "Catalog of MCP servers"
    }

    fn base_path(&self) -> &str {
        "/api/mcp_catalog/v1alpha1"
    }

    fn entity_kinds(&self) -> Vec<EntityKindSpec> {
        vec![EntityKindSpec {
            kind: KIND_MCP_SERVER.into(),
            plural: "mcpservers".into(),
            fields: vec![
                "name".into(),
                "description".into(),
                "transport".into(),
                "endpoint".into(),
                "tags".into(),
            ],
            list_columns: vec!["name".into(), "transport".into(), "description".into()],
            filter_fields: vec!["name".into(), "transport".into(), "endpoint".into()],
            detail_fields: vec![
                "name".into(),
                "description".into(),
                "transport".into(),
                "endpoint".into(),
                "annotations".into(),
            ],
        }]
    }

    fn source_types(&self) -> Vec<String> {
        vec!["yaml".into()]
    }

    fn source_provider(&self, source_type: &str) -> Option<Arc<dyn SourceProvider>> {
        match source_type {
            "yaml" => Some(self.yaml.clone() as Arc<dyn SourceProvider>),
            _ => None,
        }
    }

    fn governance_capable(&self) -> bool {
        true
    }

    fn as_action_provider(&self) -> Option<&dyn ActionProvider> {
        Some(self)
    }

    fn as_asset_mapper(&self) -> Option<&dyn AssetMapperProvider> {
        Some(self)
    }

    fn as_migration_provider(&self) -> Option<&dyn MigrationProvider> {
        Some(self)
    }
}

#[async_trait::async_trait]
impl ActionProvider for McpCatalogPlugin {
    fn list_actions(&self, scope: ActionScope) -> Vec<ActionDefinition> {
        match scope {
            ActionScope::Source => vec![ActionDefinition {
                name: "probe".into(),
                description: "Check that the source's catalog file is readable".into(),
                scope: ActionScope::Source,
                supports_dry_run: false,
                params_schema: serde_json::Value::Null,
            }],
            ActionScope::Asset => Vec::new(),
        }
    }

    async fn handle_action(
        &self,
        target: ActionTarget<'_>,
        request: &ActionRequest,
    ) -> Result<ActionResult, CoreError> {
        match (target, request.action.as_str()) {
            (ActionTarget::Source(cfg), "probe") => {
                let readable = probe_source(cfg).await;
                if readable {
                    Ok(ActionResult::completed(
                        "probe",
                        json!({"sourceId": cfg.id, "readable": true}),
                    ))
                } else {
                    Err(CoreError::source(format!(
                        "catalog file of source '{}' is not readable",
                        cfg.id
                    )))
                }
            }
            (_, other) => Err(CoreError::invalid(format!("unknown action '{other}'"))),
        }
    }
}

async fn probe_source(cfg: &SourceConfig) -> bool {
    match cfg.properties.get(PROP_CATALOG_PATH).and_then(|v| v.as_str()) {
        Some(raw) => tokio::fs::metadata(cfg.resolve_path(raw)).await.is_ok(),
        None => false,
    }
}

impl AssetMapperProvider for McpCatalogPlugin {
    fn map_asset(&self, entity_name: &str) -> Option<AssetRef> {
        Some(AssetRef {
            kind: KIND_MCP_SERVER.into(),
            name: entity_name.to_string(),
        })
    }
}

impl MigrationProvider for McpCatalogPlugin {
    fn migrations(&self) -> Vec<Migration> {
        vec![Migration {
            id: "0001-initial".into(),
            description: "seed overlay and governance tables for MCP assets".into(),
        }]
    }
}
