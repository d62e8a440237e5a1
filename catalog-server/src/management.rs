//! Per-plugin management surface.
//!
//! Everything under `{basePath}/management`: source CRUD with layered
//! validation, refresh and diagnostics, and the generic `:action` endpoints
//! with dry-run gating and governance interception. All of it is mounted by
//! the server, not the plugin, and all of it requires the operator role.

use crate::error::ApiError;
use crate::governance::{AssetKey, NewAuditEvent};
use crate::request_context::RequestContext;
use crate::server::AppState;
use axum::extract::{Extension, Path, State};
use axum::Json;
use catalog_core::actions::{ActionRequest, ActionResult, ActionScope, ActionStatus};
use catalog_core::source::{SourceConfig, SourceContext};
use catalog_core::validation::{SourceValidator, ValidationMode, ValidationOutcome};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Identifies the owning plugin on management sub-routers.
#[derive(Debug, Clone)]
pub struct PluginName(pub String);

fn instance_of(
    state: &AppState,
    plugin: &str,
) -> Result<Arc<crate::plugins::PluginInstance>, ApiError> {
    state
        .instances
        .get(plugin)
        .map(|i| i.clone())
        .ok_or_else(|| ApiError::not_found(format!("plugin '{plugin}'")))
}

fn source_context(state: &AppState) -> SourceContext {
    SourceContext::new(state.shutdown_rx())
}

/// Parses `{name}:action` selectors; the literal suffix is part of the
/// route shape.
fn parse_action_selector(selector: &str) -> Result<&str, ApiError> {
    match selector.rsplit_once(':') {
        Some((target, "action")) if !target.is_empty() => Ok(target),
        _ => Err(ApiError::not_found(format!(
            "no route for '{selector}'; expected '{{name}}:action'"
        ))),
    }
}

fn parse_action_request(body: Value) -> Result<ActionRequest, ApiError> {
    if body.get("action").and_then(|v| v.as_str()).is_none() {
        return Err(ApiError::bad_request("body must carry an 'action' field"));
    }
    serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("malformed action request: {e}")))
}

async fn validate_for(
    state: &AppState,
    instance: &crate::plugins::PluginInstance,
    plugin: &str,
    cfg: &SourceConfig,
    mode: ValidationMode,
) -> Result<ValidationOutcome, ApiError> {
    let mut existing_ids: BTreeSet<String> = state
        .config_store
        .list(plugin)
        .await
        .map_err(ApiError::from)?
        .into_iter()
        .map(|s| s.id)
        .collect();
    // Re-applying an existing id is an update, not a collision.
    existing_ids.remove(&cfg.id);

    let provider = instance.plugin().source_provider(&cfg.source_type);
    let validator = SourceValidator {
        existing_ids,
        registered_types: instance.plugin().source_types().into_iter().collect(),
        provider: provider.as_deref(),
        policy: instance.validation_policy.clone(),
    };
    Ok(validator.validate(cfg, mode).await)
}

// --- source CRUD ---------------------------------------------------------

pub async fn list_sources(
    State(state): State<AppState>,
    Extension(PluginName(plugin)): Extension<PluginName>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Value>, ApiError> {
    ctx.require_operator()?;
    let sources = state.config_store.list(&plugin).await?;
    Ok(Json(json!({"sources": sources})))
}

pub async fn validate_source(
    State(state): State<AppState>,
    Extension(PluginName(plugin)): Extension<PluginName>,
    Extension(ctx): Extension<RequestContext>,
    Json(cfg): Json<SourceConfig>,
) -> Result<Json<ValidationOutcome>, ApiError> {
    ctx.require_operator()?;
    let instance = instance_of(&state, &plugin)?;
    let outcome = validate_for(&state, &instance, &plugin, &cfg, ValidationMode::ValidateOnly).await?;
    Ok(Json(outcome))
}

pub async fn apply_source(
    State(state): State<AppState>,
    Extension(PluginName(plugin)): Extension<PluginName>,
    Extension(ctx): Extension<RequestContext>,
    Json(cfg): Json<SourceConfig>,
) -> Result<Json<Value>, ApiError> {
    ctx.require_operator()?;
    let instance = instance_of(&state, &plugin)?;
    let outcome = validate_for(&state, &instance, &plugin, &cfg, ValidationMode::Apply).await?;
    if !outcome.valid {
        return Err(ApiError::Validation {
            message: "source config failed validation".into(),
            layers: outcome.layers,
        });
    }
    state.config_store.upsert(&plugin, cfg.clone()).await?;
    // Re-read to pick up the store's origin stamp before loading.
    let stored = state.config_store.get(&plugin, &cfg.id).await?;
    instance
        .upsert_source(stored.clone(), &source_context(&state))
        .await;
    state.scheduler.sync_source(&plugin, &stored.id);
    Ok(Json(json!({"source": stored, "validation": outcome})))
}

#[derive(Debug, serde::Deserialize)]
pub struct EnableBody {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

pub async fn enable_source(
    State(state): State<AppState>,
    Extension(PluginName(plugin)): Extension<PluginName>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    body: Option<Json<EnableBody>>,
) -> Result<Json<Value>, ApiError> {
    ctx.require_operator()?;
    let enabled = body.map(|Json(b)| b.enabled).unwrap_or(true);
    let instance = instance_of(&state, &plugin)?;
    state.config_store.set_enabled(&plugin, &id, enabled).await?;
    instance
        .set_source_enabled(&id, enabled, &source_context(&state))
        .await?;
    Ok(Json(json!({"sourceId": id, "enabled": enabled})))
}

pub async fn refresh_all(
    State(state): State<AppState>,
    Extension(PluginName(plugin)): Extension<PluginName>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Value>, ApiError> {
    ctx.require_operator()?;
    let instance = instance_of(&state, &plugin)?;
    let mut statuses = Vec::new();
    for cfg in instance.sources().await {
        statuses.push(state.scheduler.trigger(&plugin, &cfg.id).await?);
    }
    Ok(Json(json!({"sources": statuses})))
}

pub async fn refresh_one(
    State(state): State<AppState>,
    Extension(PluginName(plugin)): Extension<PluginName>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    ctx.require_operator()?;
    let status = state.scheduler.trigger(&plugin, &id).await?;
    Ok(Json(json!({"source": status})))
}

pub async fn diagnostics(
    State(state): State<AppState>,
    Extension(PluginName(plugin)): Extension<PluginName>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Value>, ApiError> {
    ctx.require_operator()?;
    let instance = instance_of(&state, &plugin)?;
    Ok(Json(json!({
        "plugin": plugin,
        "state": instance.state().await,
        "healthy": instance.healthy().await,
        "sources": instance.diagnostics(),
    })))
}

// --- action discovery and dispatch ---------------------------------------

pub async fn list_actions(
    State(state): State<AppState>,
    Extension(PluginName(plugin)): Extension<PluginName>,
    Extension(ctx): Extension<RequestContext>,
    Path(scope): Path<String>,
) -> Result<Json<Value>, ApiError> {
    ctx.require_operator()?;
    let scope = match scope.as_str() {
        "source" => ActionScope::Source,
        "asset" => ActionScope::Asset,
        other => return Err(ApiError::bad_request(format!("unknown scope '{other}'"))),
    };
    let instance = instance_of(&state, &plugin)?;
    Ok(Json(json!({"actions": instance.list_actions(scope)})))
}

/// `POST .../sources/{id}:action`
pub async fn source_action(
    State(state): State<AppState>,
    Extension(PluginName(plugin)): Extension<PluginName>,
    Extension(ctx): Extension<RequestContext>,
    Path(selector): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<ActionResult>, ApiError> {
    ctx.require_operator()?;
    let source_id = parse_action_selector(&selector)?;
    let request = parse_action_request(body)?;
    let instance = instance_of(&state, &plugin)?;

    let definition = instance
        .find_action(ActionScope::Source, &request.action)
        .ok_or_else(|| ApiError::bad_request(format!("unknown action '{}'", request.action)))?;
    if request.dry_run && !definition.supports_dry_run {
        return Err(ApiError::bad_request(format!(
            "action '{}' does not support dry-run",
            request.action
        )));
    }

    let result = instance.handle_source_action(source_id, &request).await?;
    if result.status == ActionStatus::Completed {
        state
            .governance
            .audit()
            .append(NewAuditEvent {
                plugin: plugin.clone(),
                kind: "Source".into(),
                name: source_id.to_string(),
                actor: ctx.principal.clone(),
                action: request.action.clone(),
                outcome: "completed".into(),
                payload: request.params.clone(),
            })
            .await?;
    }
    Ok(Json(result))
}

/// `POST .../entities/{name}:action`
pub async fn entity_action(
    State(state): State<AppState>,
    Extension(PluginName(plugin)): Extension<PluginName>,
    Extension(ctx): Extension<RequestContext>,
    Path(selector): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<ActionResult>, ApiError> {
    ctx.require_operator()?;
    let entity = parse_action_selector(&selector)?;
    let request = parse_action_request(body)?;
    let result = dispatch_asset_action(&state, &plugin, entity, request, &ctx.principal).await?;
    Ok(Json(result))
}

/// The asset-action dispatch pipeline: resolve the definition, enforce
/// dry-run capability, let governance intercept gated actions, execute,
/// audit on effect.
pub async fn dispatch_asset_action(
    state: &AppState,
    plugin: &str,
    entity: &str,
    request: ActionRequest,
    actor: &str,
) -> Result<ActionResult, ApiError> {
    let instance = instance_of(state, plugin)?;

    let definition = instance
        .find_action(ActionScope::Asset, &request.action)
        .ok_or_else(|| ApiError::bad_request(format!("unknown action '{}'", request.action)))?;
    if request.dry_run && !definition.supports_dry_run {
        return Err(ApiError::bad_request(format!(
            "action '{}' does not support dry-run",
            request.action
        )));
    }

    let asset = instance.map_asset(entity);
    if instance.plugin().governance_capable() && !request.dry_run {
        let key = AssetKey::new(plugin, asset.kind.clone(), asset.name.clone());
        let gate = state
            .governance
            .gate_for(&key, &request.action, &request.params)
            .await;
        if gate.is_gated() {
            let approval = state
                .governance
                .create_approval(&key, &request.action, request.params.clone(), actor, &gate)
                .await?;
            return Err(ApiError::ApprovalRequired {
                approval_id: approval.id,
            });
        }
    }

    execute_asset_action(state, plugin, &asset.kind, &asset.name, &request, actor).await
}

/// Executes an asset action past the gate; also the continuation for
/// approved requests, which must not be re-gated.
pub async fn execute_asset_action(
    state: &AppState,
    plugin: &str,
    kind: &str,
    name: &str,
    request: &ActionRequest,
    actor: &str,
) -> Result<ActionResult, ApiError> {
    let instance = instance_of(state, plugin)?;
    let result = instance.handle_asset_action(kind, name, request).await?;
    if result.status == ActionStatus::Completed {
        state
            .governance
            .audit()
            .append(NewAuditEvent {
                plugin: plugin.to_string(),
                kind: kind.to_string(),
                name: name.to_string(),
                actor: actor.to_string(),
                action: request.action.clone(),
                outcome: "completed".into(),
                payload: request.params.clone(),
            })
            .await?;
    }
    Ok(result)
}

/// Delete handler for `DELETE .../sources/{id}`; shares its route with the
/// `:action` selector, so a selector-shaped id is rejected first.
pub async fn delete_source(
    State(state): State<AppState>,
    Extension(PluginName(plugin)): Extension<PluginName>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    ctx.require_operator()?;
    let instance = instance_of(&state, &plugin)?;
    state.config_store.delete(&plugin, &id).await?;
    instance.remove_source(&id).await?;
    state.scheduler.forget_source(&plugin, &id);
    Ok(Json(json!({"deleted": id})))
}
