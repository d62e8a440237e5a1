//! The capabilities builder.
//!
//! Assembles one [`PluginCapabilitiesV2`] per plugin. The generic assembly
//! is the fallback path; a plugin implementing the capabilities facet may
//! refine the document afterwards. Governance capabilities are re-applied
//! after refinement for every entity of an opted-in plugin, so neither path
//! can ship a document the UI could use to bypass governance.

use crate::plugins::PluginInstance;
use crate::server::AppState;
use catalog_core::actions::ActionScope;
use catalog_core::capabilities::{
    ActionCatalog, CliHints, EntityCapabilities, GovernanceCapabilities, PluginCapabilitiesV2,
    SourceCapabilities, SourceManagement, UiHints,
};

pub async fn build_capabilities(state: &AppState, instance: &PluginInstance) -> PluginCapabilitiesV2 {
    let plugin = instance.plugin();
    let governance = governance_capabilities(state, instance).await;

    let entities: Vec<EntityCapabilities> = plugin
        .entity_kinds()
        .into_iter()
        .map(|spec| EntityCapabilities {
            kind: spec.kind,
            fields: spec.fields,
            list_columns: spec.list_columns,
            filter_fields: spec.filter_fields,
            detail_fields: spec.detail_fields,
            actions: instance
                .list_actions(ActionScope::Asset)
                .into_iter()
                .map(|a| a.name)
                .collect(),
            governance: governance.clone(),
        })
        .collect();

    let aliases = plugin
        .entity_kinds()
        .into_iter()
        .map(|spec| spec.plural)
        .collect();

    let doc = PluginCapabilitiesV2 {
        name: plugin.name().to_string(),
        version: plugin.version().to_string(),
        description: plugin.description().to_string(),
        base_path: plugin.base_path().to_string(),
        healthy: instance.healthy().await,
        entities,
        sources: SourceCapabilities {
            types: plugin.source_types(),
            management: SourceManagement {
                source_manager: true,
                refresh: true,
                diagnostics: true,
            },
        },
        actions: ActionCatalog {
            source: instance.list_actions(ActionScope::Source),
            asset: instance.list_actions(ActionScope::Asset),
        },
        ui_hints: UiHints {
            display_name: Some(plugin.description().to_string()),
            icon: None,
            order: 0,
        },
        cli_hints: CliHints {
            group: Some(plugin.name().to_string()),
            aliases,
        },
    };

    let mut doc = match plugin.as_capabilities_provider() {
        Some(provider) => provider.refine_capabilities(doc),
        None => doc,
    };
    // Governance sections survive refinement for opted-in plugins.
    for entity in &mut doc.entities {
        entity.governance = governance.clone();
    }
    doc
}

async fn governance_capabilities(
    state: &AppState,
    instance: &PluginInstance,
) -> GovernanceCapabilities {
    if !instance.plugin().governance_capable() {
        return GovernanceCapabilities::default();
    }
    GovernanceCapabilities {
        supported: true,
        states: state.governance.lifecycle_states().await,
        requires_approval: state.governance.gated_actions().await,
    }
}
