//! Governance HTTP handlers.
//!
//! Everything under `/api/governance/v1alpha1`. Asset routes are keyed by
//! `(plugin, kind, name)` and plugin-agnostic; approval routes are global.
//! Gated actions answer 202 with the approval id — a first-class outcome
//! clients handle like a 200, not an error.

use super::{ApprovalState, AssetKey, GovernancePatch, LifecycleState, Verdict};
use crate::error::ApiError;
use crate::request_context::RequestContext;
use crate::server::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use catalog_core::actions::{ActionRequest, ActionResult};
use serde::Deserialize;
use serde_json::{json, Value};

/// Actions the governance service executes itself.
const GOVERNANCE_ACTIONS: [&str; 5] = [
    "lifecycle.setState",
    "version.create",
    "promotion.bind",
    "promotion.promote",
    "promotion.rollback",
];

fn asset_key(plugin: &str, kind: &str, name: &str) -> AssetKey {
    AssetKey::new(plugin, kind, name)
}

// --- overlay -------------------------------------------------------------

pub async fn get_asset(
    State(state): State<AppState>,
    Path((plugin, kind, name)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    let overlay = state.governance.overlay(&asset_key(&plugin, &kind, &name));
    Ok(Json(json!({
        "plugin": plugin,
        "kind": kind,
        "name": name,
        "governance": overlay,
    })))
}

pub async fn patch_asset(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((plugin, kind, name)): Path<(String, String, String)>,
    Json(patch): Json<GovernancePatch>,
) -> Result<Json<Value>, ApiError> {
    ctx.require_operator()?;
    let overlay = state
        .governance
        .patch_overlay(&asset_key(&plugin, &kind, &name), patch, &ctx.principal)
        .await?;
    Ok(Json(json!({"governance": overlay})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub page_size: Option<usize>,
    pub page_token: Option<String>,
}

pub async fn asset_history(
    State(state): State<AppState>,
    Path((plugin, kind, name)): Path<(String, String, String)>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let page = state
        .governance
        .history(
            &asset_key(&plugin, &kind, &name),
            query.page_size,
            query.page_token.as_deref(),
        )
        .await?;
    Ok(Json(serde_json::to_value(page).map_err(|e| ApiError::internal(e.to_string()))?))
}

// --- actions -------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceActionBody {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub params: Value,
}

/// `POST /assets/{plugin}/{kind}/{name}/actions/{action}` — may answer 200
/// (executed), 202 (approval pending) or 4xx.
pub async fn asset_action(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((plugin, kind, name, action)): Path<(String, String, String, String)>,
    Json(body): Json<GovernanceActionBody>,
) -> Result<Json<Value>, ApiError> {
    ctx.require_operator()?;
    let key = asset_key(&plugin, &kind, &name);

    if GOVERNANCE_ACTIONS.contains(&action.as_str()) {
        if body.dry_run {
            let data = check_governance_action(&state, &key, &action, &body.params).await?;
            return Ok(Json(json!({"action": action, "status": "dry-run", "data": data})));
        }
        let gate = state.governance.gate_for(&key, &action, &body.params).await;
        if gate.is_gated() {
            let approval = state
                .governance
                .create_approval(&key, &action, body.params.clone(), &ctx.principal, &gate)
                .await?;
            return Err(ApiError::ApprovalRequired {
                approval_id: approval.id,
            });
        }
        let data = execute_governance_action(&state, &key, &action, &body.params, &ctx.principal)
            .await?;
        return Ok(Json(json!({"action": action, "status": "completed", "data": data})));
    }

    // Anything else is a plugin/builtin asset action addressed through the
    // governance surface; route it through the management dispatcher.
    let request = ActionRequest {
        action: action.clone(),
        dry_run: body.dry_run,
        params: body.params,
    };
    let result =
        crate::management::dispatch_asset_action(&state, &plugin, &name, request, &ctx.principal)
            .await?;
    Ok(Json(serde_json::to_value(result).map_err(|e| ApiError::internal(e.to_string()))?))
}

fn param_str<'a>(params: &'a Value, field: &str) -> Result<&'a str, ApiError> {
    params
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::bad_request(format!("params.{field} is required")))
}

fn lifecycle_target(params: &Value) -> Result<LifecycleState, ApiError> {
    let raw = param_str(params, "state")?;
    LifecycleState::parse(raw)
        .ok_or_else(|| ApiError::bad_request(format!("unknown lifecycle state '{raw}'")))
}

/// Validation-only path backing dry runs.
async fn check_governance_action(
    state: &AppState,
    key: &AssetKey,
    action: &str,
    params: &Value,
) -> Result<Value, ApiError> {
    match action {
        "lifecycle.setState" => {
            let to = lifecycle_target(params)?;
            state.governance.check_transition(key, to)?;
            Ok(json!({"state": to.as_str()}))
        }
        "version.create" => {
            let label = param_str(params, "versionLabel")?;
            if state
                .governance
                .versions(key)
                .iter()
                .any(|v| v.version_label == label)
            {
                return Err(ApiError::conflict(format!(
                    "version label '{label}' already exists"
                )));
            }
            Ok(json!({"versionLabel": label}))
        }
        "promotion.bind" => {
            let env = param_str(params, "env")?;
            let version_id = param_str(params, "versionId")?;
            Ok(json!({"env": env, "versionId": version_id}))
        }
        "promotion.promote" => Ok(json!({
            "fromEnv": param_str(params, "fromEnv")?,
            "toEnv": param_str(params, "toEnv")?,
        })),
        "promotion.rollback" => Ok(json!({"env": param_str(params, "env")?})),
        other => Err(ApiError::bad_request(format!("unknown action '{other}'"))),
    }
}

/// Executes a governance action after gating has cleared.
pub async fn execute_governance_action(
    state: &AppState,
    key: &AssetKey,
    action: &str,
    params: &Value,
    actor: &str,
) -> Result<Value, ApiError> {
    match action {
        "lifecycle.setState" => {
            let to = lifecycle_target(params)?;
            let overlay = state.governance.set_lifecycle_state(key, to, actor).await?;
            Ok(json!({"state": overlay.lifecycle_info.state}))
        }
        "version.create" => {
            let label = param_str(params, "versionLabel")?;
            let content = match state.instances.get(&key.plugin).map(|i| i.clone()) {
                Some(instance) => instance.get_entity(&key.kind, &key.name).await,
                None => None,
            };
            let version = state
                .governance
                .create_version(key, label, actor, content)
                .await?;
            Ok(json!({"versionId": version.id, "versionLabel": version.version_label}))
        }
        "promotion.bind" => {
            let env = param_str(params, "env")?;
            let version_id = param_str(params, "versionId")?;
            state
                .governance
                .bind(key, env, version_id, actor, "promotion.bind")
                .await?;
            Ok(json!({"env": env, "versionId": version_id}))
        }
        "promotion.promote" => {
            let from_env = param_str(params, "fromEnv")?;
            let to_env = param_str(params, "toEnv")?;
            let version_id = state.governance.promote(key, from_env, to_env, actor).await?;
            Ok(json!({"env": to_env, "versionId": version_id}))
        }
        "promotion.rollback" => {
            let env = param_str(params, "env")?;
            let version_id = state.governance.rollback_binding(key, env, actor).await?;
            Ok(json!({"env": env, "versionId": version_id}))
        }
        other => Err(ApiError::bad_request(format!("unknown action '{other}'"))),
    }
}

// --- versions ------------------------------------------------------------

pub async fn list_versions(
    State(state): State<AppState>,
    Path((plugin, kind, name)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    let versions = state.governance.versions(&asset_key(&plugin, &kind, &name));
    Ok(Json(json!({"versions": versions})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVersionBody {
    pub version_label: String,
}

/// `POST .../versions` delegates to the `version.create` action machinery,
/// so policy gates apply here too.
pub async fn create_version(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((plugin, kind, name)): Path<(String, String, String)>,
    Json(body): Json<CreateVersionBody>,
) -> Result<Json<Value>, ApiError> {
    ctx.require_operator()?;
    let key = asset_key(&plugin, &kind, &name);
    let params = json!({"versionLabel": body.version_label});
    let gate = state.governance.gate_for(&key, "version.create", &params).await;
    if gate.is_gated() {
        let approval = state
            .governance
            .create_approval(&key, "version.create", params, &ctx.principal, &gate)
            .await?;
        return Err(ApiError::ApprovalRequired {
            approval_id: approval.id,
        });
    }
    let data = execute_governance_action(&state, &key, "version.create", &params, &ctx.principal)
        .await?;
    Ok(Json(data))
}

// --- bindings ------------------------------------------------------------

pub async fn list_bindings(
    State(state): State<AppState>,
    Path((plugin, kind, name)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    let bindings = state.governance.bindings(&asset_key(&plugin, &kind, &name));
    Ok(Json(json!({"bindings": bindings})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindBody {
    pub version_id: String,
}

pub async fn bind_environment(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((plugin, kind, name, env)): Path<(String, String, String, String)>,
    Json(body): Json<BindBody>,
) -> Result<Json<Value>, ApiError> {
    ctx.require_operator()?;
    let key = asset_key(&plugin, &kind, &name);
    let params = json!({"env": env, "versionId": body.version_id});
    let gate = state.governance.gate_for(&key, "promotion.bind", &params).await;
    if gate.is_gated() {
        let approval = state
            .governance
            .create_approval(&key, "promotion.bind", params, &ctx.principal, &gate)
            .await?;
        return Err(ApiError::ApprovalRequired {
            approval_id: approval.id,
        });
    }
    let data =
        execute_governance_action(&state, &key, "promotion.bind", &params, &ctx.principal).await?;
    Ok(Json(data))
}

// --- approvals -----------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ApprovalsQuery {
    pub state: Option<String>,
}

pub async fn list_approvals(
    State(state): State<AppState>,
    Query(query): Query<ApprovalsQuery>,
) -> Result<Json<Value>, ApiError> {
    let filter = match query.state.as_deref() {
        None => None,
        Some("pending") => Some(ApprovalState::Pending),
        Some("approved") => Some(ApprovalState::Approved),
        Some("denied") => Some(ApprovalState::Denied),
        Some("cancelled") => Some(ApprovalState::Cancelled),
        Some(other) => {
            return Err(ApiError::bad_request(format!(
                "unknown approval state '{other}'"
            )))
        }
    };
    let approvals = state.governance.list_approvals(filter).await;
    Ok(Json(json!({"approvals": approvals})))
}

pub async fn get_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let approval = state.governance.approval(&id).await?;
    Ok(Json(json!({"approval": approval})))
}

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub verdict: String,
    pub comment: Option<String>,
}

/// `POST /approvals/{id}/decisions` — the decision that meets the
/// threshold auto-executes the original action.
pub async fn decide_approval(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<Value>, ApiError> {
    ctx.require_operator()?;
    let verdict = match body.verdict.as_str() {
        "approve" => Verdict::Approve,
        "deny" => Verdict::Deny,
        other => return Err(ApiError::bad_request(format!("unknown verdict '{other}'"))),
    };
    let (approval, newly_approved) = state
        .governance
        .decide(&id, &ctx.principal, verdict, body.comment)
        .await?;

    let mut execution: Option<Value> = None;
    if newly_approved {
        execution = Some(execute_approved(&state, &approval).await?);
    }
    Ok(Json(json!({"approval": approval, "execution": execution})))
}

/// Runs the action an approval was guarding, without re-gating.
async fn execute_approved(
    state: &AppState,
    approval: &super::ApprovalRequest,
) -> Result<Value, ApiError> {
    let actor = approval.requested_by.as_str();
    if GOVERNANCE_ACTIONS.contains(&approval.action.as_str()) {
        return execute_governance_action(
            state,
            &approval.asset,
            &approval.action,
            &approval.params,
            actor,
        )
        .await;
    }
    let request = ActionRequest {
        action: approval.action.clone(),
        dry_run: false,
        params: approval.params.clone(),
    };
    let result: ActionResult = crate::management::execute_asset_action(
        state,
        &approval.asset.plugin,
        &approval.asset.kind,
        &approval.asset.name,
        &request,
        actor,
    )
    .await?;
    serde_json::to_value(result).map_err(|e| ApiError::internal(e.to_string()))
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub reason: Option<String>,
}

pub async fn cancel_approval(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(body): Json<CancelBody>,
) -> Result<Json<Value>, ApiError> {
    ctx.require_operator()?;
    let approval = state
        .governance
        .cancel_approval(&id, &ctx.principal, body.reason)
        .await?;
    Ok(Json(json!({"approval": approval})))
}

/// The global audit stream.
pub async fn audit_stream(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let page = state
        .governance
        .audit()
        .list_all(query.page_size, query.page_token.as_deref())
        .await?;
    Ok(Json(serde_json::to_value(page).map_err(|e| ApiError::internal(e.to_string()))?))
}
