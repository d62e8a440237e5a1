//! Declared, discoverable actions.
//!
//! Actions are the only mutation path the generic API exposes. Each action
//! is declared with a scope (source or asset), a dry-run capability flag and
//! a parameter sketch, so UI and CLI can render invocation forms without
//! per-plugin code.

use serde::{Deserialize, Serialize};

/// Whether an action targets a configured source or an ingested asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionScope {
    Source,
    Asset,
}

/// A declared action, discoverable under `GET .../actions/{source|asset}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDefinition {
    pub name: String,
    pub description: String,
    pub scope: ActionScope,
    pub supports_dry_run: bool,
    /// Free-form sketch of the expected `params` shape.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params_schema: serde_json::Value,
}

/// Body of a `POST ...:action` call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Outcome status of an action invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "dry-run")]
    DryRun,
    #[serde(rename = "error")]
    Error,
}

/// Response body of a `POST ...:action` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub action: String,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl ActionResult {
    pub fn completed(action: impl Into<String>, data: serde_json::Value) -> Self {
        ActionResult {
            action: action.into(),
            status: ActionStatus::Completed,
            message: None,
            data,
        }
    }

    pub fn dry_run(action: impl Into<String>, data: serde_json::Value) -> Self {
        ActionResult {
            action: action.into(),
            status: ActionStatus::DryRun,
            message: None,
            data,
        }
    }
}

/// Name of the builtin tag action.
pub const ACTION_TAG: &str = "tag";
/// Name of the builtin annotate action.
pub const ACTION_ANNOTATE: &str = "annotate";
/// Name of the builtin deprecate action.
pub const ACTION_DEPRECATE: &str = "deprecate";

/// The builtin asset-scoped actions every plugin serves.
///
/// All three are idempotent, dry-runnable, and mutate the overlay record
/// only; upstream source data is never touched.
pub fn builtin_asset_actions() -> Vec<ActionDefinition> {
    vec![
        ActionDefinition {
            name: ACTION_TAG.into(),
            description: "Replace the entity's tag list".into(),
            scope: ActionScope::Asset,
            supports_dry_run: true,
            params_schema: serde_json::json!({"tags": ["string"]}),
        },
        ActionDefinition {
            name: ACTION_ANNOTATE.into(),
            description: "Merge annotations into the entity".into(),
            scope: ActionScope::Asset,
            supports_dry_run: true,
            params_schema: serde_json::json!({"annotations": {"key": "value"}}),
        },
        ActionDefinition {
            name: ACTION_DEPRECATE.into(),
            description: "Mark the entity's lifecycle phase, 'deprecated' by default".into(),
            scope: ActionScope::Asset,
            supports_dry_run: true,
            params_schema: serde_json::json!({"phase": "string"}),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_request_defaults() {
        let req: ActionRequest =
            serde_json::from_str(r#"{"action": "tag"}"#).unwrap();
        assert_eq!(req.action, "tag");
        assert!(!req.dry_run);
        assert!(req.params.is_null());
    }

    #[test]
    fn status_serializes_with_wire_names() {
        assert_eq!(
            serde_json::to_string(&ActionStatus::DryRun).unwrap(),
            "\"dry-run\""
        );
        assert_eq!(
            serde_json::to_string(&ActionStatus::Completed).unwrap(),
            "\"completed\""
        );
    }

    #[test]
    fn builtins_are_all_dry_runnable() {
        for action in builtin_asset_actions() {
            assert!(action.supports_dry_run, "{} must dry-run", action.name);
            assert_eq!(action.scope, ActionScope::Asset);
        }
    }
}
