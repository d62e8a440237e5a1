//! The machine-readable plugin capability document.
//!
//! `GET {basePath}/capabilities` returns one [`PluginCapabilitiesV2`] per
//! plugin. The contract is that the document is syntactically complete for
//! every registered plugin: a plugin that declines a feature still gets the
//! section, as an explicit empty array rather than an absent key. UI and CLI
//! consume this document alone, which is what makes new plugins zero-change
//! for the outer surfaces.

use crate::actions::ActionDefinition;
use serde::{Deserialize, Serialize};

/// Governance-related capabilities of one entity kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceCapabilities {
    pub supported: bool,
    #[serde(default)]
    pub states: Vec<String>,
    /// Actions that may require approval under the active policy set.
    #[serde(default)]
    pub requires_approval: Vec<String>,
}

/// Capabilities of one entity kind served by a plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityCapabilities {
    pub kind: String,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub list_columns: Vec<String>,
    #[serde(default)]
    pub filter_fields: Vec<String>,
    #[serde(default)]
    pub detail_fields: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub governance: GovernanceCapabilities,
}

/// Which management surfaces the plugin serves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceManagement {
    pub source_manager: bool,
    pub refresh: bool,
    pub diagnostics: bool,
}

/// Source-related capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCapabilities {
    #[serde(default)]
    pub types: Vec<String>,
    pub management: SourceManagement,
}

/// Declared actions grouped by scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCatalog {
    #[serde(default)]
    pub source: Vec<ActionDefinition>,
    #[serde(default)]
    pub asset: Vec<ActionDefinition>,
}

/// Rendering hints for graphical surfaces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub order: i32,
}

/// Rendering hints for command-line surfaces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// The V2 capability document for one plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginCapabilitiesV2 {
    pub name: String,
    pub version: String,
    pub description: String,
    pub base_path: String,
    pub healthy: bool,
    #[serde(default)]
    pub entities: Vec<EntityCapabilities>,
    pub sources: SourceCapabilities,
    pub actions: ActionCatalog,
    pub ui_hints: UiHints,
    pub cli_hints: CliHints,
}
