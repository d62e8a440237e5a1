//! The model catalog plugin.
//!
//! Serves `CatalogModel` entities under `/api/model_catalog/v1alpha1/models`
//! from YAML catalog files. Deliberately facet-light: no action provider and
//! no asset mapper, which exercises the builtin actions and the default
//! mapping path, and makes source-scoped action discovery answer with an
//! empty list rather than an error.

use super::{CatalogPlugin, EntityKindSpec};
use catalog_core::providers::yaml::YamlSourceProvider;
use catalog_core::source::SourceProvider;
use std::sync::Arc;

pub const PLUGIN_NAME: &str = "models";
pub const KIND_CATALOG_MODEL: &str = "CatalogModel";

pub struct ModelCatalogPlugin {
    yaml: Arc<YamlSourceProvider>,
}

impl ModelCatalogPlugin {
    pub fn new() -> Self {
        ModelCatalogPlugin {
            yaml: Arc::new(YamlSourceProvider::new()),
        }
    }
}

impl Default for ModelCatalogPlugin {
    fn default() -> Self {
        ModelCatalogPlugin::new()
    }
}

#[async_trait::async_trait]
impl CatalogPlugin for ModelCatalogPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn description(&self) -> &str {
        "Catalog of models"
    }

    fn base_path(&self) -> &str {
        "/api/model_catalog/v1alpha1"
    }

    fn entity_kinds(&self) -> Vec<EntityKindSpec> {
        vec![EntityKindSpec {
            kind: KIND_CATALOG_MODEL.into(),
            plural: "models".into(),
            fields: vec![
                "name".into(),
                "description".into(),
                "provider".into(),
                "license".into(),
                "tags".into(),
            ],
            list_columns: vec!["name".into(), "provider".into(), "license".into()],
            filter_fields: vec!["name".into(), "provider".into(), "license".into()],
            detail_fields: vec![
                "name".into(),
                "description".into(),
                "provider".into(),
                "license".into(),
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
}
