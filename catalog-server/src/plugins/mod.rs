//! The catalog plugin contract and process-wide registry.
//!
//! A plugin is a self-contained asset-type module: it declares its entity
//! kinds, supplies source providers for the source types it understands,
//! and may opt into extra capability facets. Everything else — read routes,
//! management, capabilities, governance — is mounted generically by the
//! server, which is what keeps new plugins zero-change for UI and CLI.
//!
//! Facets are optional trait views queried once at registration. A missing
//! facet is not an error: the affected endpoint answers with a
//! deterministic `501` instead of failing at dispatch time.

use catalog_core::actions::{ActionDefinition, ActionRequest, ActionResult, ActionScope};
use catalog_core::capabilities::PluginCapabilitiesV2;
use catalog_core::error::CoreError;
use catalog_core::source::{SourceConfig, SourceProvider};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

pub mod instance;
pub mod mcp;
pub mod models;

pub use instance::{InstanceState, PluginInstance};

/// One entity kind a plugin serves, with its route name and field hints.
#[derive(Debug, Clone)]
pub struct EntityKindSpec {
    pub kind: String,
    /// Route segment under the plugin base path, e.g. `mcpservers`.
    pub plural: String,
    pub fields: Vec<String>,
    pub list_columns: Vec<String>,
    pub filter_fields: Vec<String>,
    pub detail_fields: Vec<String>,
}

impl EntityKindSpec {
    pub fn new(kind: impl Into<String>, plural: impl Into<String>) -> Self {
        EntityKindSpec {
            kind: kind.into(),
            plural: plural.into(),
            fields: Vec::new(),
            list_columns: Vec::new(),
            filter_fields: Vec::new(),
            detail_fields: Vec::new(),
        }
    }
}

/// Target of a plugin-provided action.
pub enum ActionTarget<'a> {
    Source(&'a SourceConfig),
    Asset { kind: &'a str, name: &'a str },
}

/// Facet: plugin-declared actions beyond the builtins.
#[async_trait::async_trait]
pub trait ActionProvider: Send + Sync {
    fn list_actions(&self, scope: ActionScope) -> Vec<ActionDefinition>;
    async fn handle_action(
        &self,
        target: ActionTarget<'_>,
        request: &ActionRequest,
    ) -> Result<ActionResult, CoreError>;
}

/// Facet: plugin-refined capability documents. The builder assembles the
/// generic document first; the provider may adjust or extend it.
pub trait CapabilitiesV2Provider: Send + Sync {
    fn refine_capabilities(&self, doc: PluginCapabilitiesV2) -> PluginCapabilitiesV2;
}

/// A governance-addressable asset reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    pub kind: String,
    pub name: String,
}

/// Facet: maps an entity route name onto its governance asset tuple.
pub trait AssetMapperProvider: Send + Sync {
    fn map_asset(&self, entity_name: &str) -> Option<AssetRef>;
}

/// A named one-shot migration applied at plugin init.
#[derive(Debug, Clone)]
pub struct Migration {
    pub id: String,
    pub description: String,
}

/// Facet: plugin-declared migrations.
pub trait MigrationProvider: Send + Sync {
    fn migrations(&self) -> Vec<Migration>;
}

/// The plugin contract.
#[async_trait::async_trait]
pub trait CatalogPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn description(&self) -> &str {
        ""
    }

    /// URL prefix all of the plugin's routes are mounted under.
    fn base_path(&self) -> &str;

    fn entity_kinds(&self) -> Vec<EntityKindSpec>;

    /// Source types this plugin has providers for.
    fn source_types(&self) -> Vec<String>;

    fn source_provider(&self, source_type: &str) -> Option<Arc<dyn SourceProvider>>;

    /// False for plugins that can be healthy with no configured sources.
    fn requires_sources(&self) -> bool {
        true
    }

    /// Opting in populates governance capabilities and enables the
    /// governance routes for this plugin's assets.
    fn governance_capable(&self) -> bool {
        false
    }

    async fn on_init(&self) -> Result<(), CoreError> {
        Ok(())
    }

    async fn on_start(&self) -> Result<(), CoreError> {
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), CoreError> {
        Ok(())
    }

    fn as_action_provider(&self) -> Option<&dyn ActionProvider> {
        None
    }

    fn as_capabilities_provider(&self) -> Option<&dyn CapabilitiesV2Provider> {
        None
    }

    fn as_asset_mapper(&self) -> Option<&dyn AssetMapperProvider> {
        None
    }

    fn as_migration_provider(&self) -> Option<&dyn MigrationProvider> {
        None
    }
}

/// Factory producing a fresh plugin value.
pub type PluginFactory = Arc<dyn Fn() -> Result<Arc<dyn CatalogPlugin>, CoreError> + Send + Sync>;

/// Process-wide table of known plugin factories.
///
/// Registration happens during startup, before the server begins routing;
/// `seal` flips the registry read-only so late registration is a programming
/// error rather than a race.
#[derive(Default)]
pub struct PluginRegistry {
    factories: RwLock<BTreeMap<String, PluginFactory>>,
    sealed: AtomicBool,
}

impl PluginRegistry {
    pub fn new() -> Self {
        PluginRegistry::default()
    }

    pub fn register(&self, name: &str, factory: PluginFactory) -> Result<(), CoreError> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(CoreError::conflict(format!(
                "registry is sealed; cannot register '{name}'"
            )));
        }
        let mut factories = self.factories.write().expect("registry lock poisoned");
        if factories.contains_key(name) {
            return Err(CoreError::conflict(format!(
                "plugin '{name}' is already registered"
            )));
        }
        factories.insert(name.to_string(), factory);
        Ok(())
    }

    /// Registered names in deterministic (sorted) order.
    pub fn names(&self) -> Vec<String> {
        self.factories
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn build(&self, name: &str) -> Result<Arc<dyn CatalogPlugin>, CoreError> {
        let factory = {
            let factories = self.factories.read().expect("registry lock poisoned");
            factories
                .get(name)
                .cloned()
                .ok_or_else(|| CoreError::not_found(format!("plugin '{name}'")))?
        };
        factory()
    }

    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }
}

/// Registers the plugins bundled with this server.
pub fn register_builtin_plugins(registry: &PluginRegistry) -> Result<(), CoreError> {
    registry.register(
        mcp::PLUGIN_NAME,
        Arc::new(|| Ok(Arc::new(mcp::McpCatalogPlugin::new()) as Arc<dyn CatalogPlugin>)),
    )?;
    registry.register(
        models::PLUGIN_NAME,
        Arc::new(|| Ok(Arc::new(models::ModelCatalogPlugin::new()) as Arc<dyn CatalogPlugin>)),
    )?;
    Ok(())
}
