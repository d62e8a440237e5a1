//! Discovery, entity read, and health handlers.
//!
//! Read endpoints are unauthenticated; they serve merged, overlay-applied
//! entities with provenance attached. The discovery endpoint and the
//! per-plugin capability documents are what UI and CLI build all their
//! surfaces from.

use crate::capabilities::build_capabilities;
use crate::error::ApiError;
use crate::management::PluginName;
use crate::server::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::Json;
use catalog_core::filter::FilterQuery;
use catalog_core::pagination::paginate;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Identifies the plugin and entity kind a read route serves.
#[derive(Debug, Clone)]
pub struct EntityRoute {
    pub plugin: String,
    pub kind: String,
}

fn instance_of(state: &AppState, plugin: &str) -> Result<Arc<crate::plugins::PluginInstance>, ApiError> {
    state
        .instances
        .get(plugin)
        .map(|i| i.clone())
        .ok_or_else(|| ApiError::not_found(format!("plugin '{plugin}'")))
}

// --- discovery -----------------------------------------------------------

pub async fn list_plugins(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let mut plugins = Vec::new();
    for name in state.plugin_order.iter() {
        let instance = instance_of(&state, name)?;
        let plugin = instance.plugin();
        plugins.push(json!({
            "name": plugin.name(),
            "version": plugin.version(),
            "description": plugin.description(),
            "basePath": plugin.base_path(),
            "healthy": instance.healthy().await,
            "started": instance.started(),
            "entityKinds": plugin.entity_kinds().iter().map(|k| k.kind.clone()).collect::<Vec<_>>(),
            "governanceCapable": plugin.governance_capable(),
        }));
    }
    Ok(Json(json!({"plugins": plugins})))
}

/// `GET {basePath}/capabilities`
pub async fn plugin_capabilities(
    State(state): State<AppState>,
    Extension(PluginName(plugin)): Extension<PluginName>,
) -> Result<Json<Value>, ApiError> {
    let instance = instance_of(&state, &plugin)?;
    let doc = build_capabilities(&state, &instance).await;
    Ok(Json(serde_json::to_value(doc).map_err(|e| ApiError::internal(e.to_string()))?))
}

/// `GET /api/plugins/{name}/capabilities` — same document, addressed by
/// plugin name instead of base path.
pub async fn plugin_capabilities_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let instance = instance_of(&state, &name)?;
    let doc = build_capabilities(&state, &instance).await;
    Ok(Json(serde_json::to_value(doc).map_err(|e| ApiError::internal(e.to_string()))?))
}

// --- entity reads --------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub page_size: Option<usize>,
    pub page_token: Option<String>,
    pub q: Option<String>,
    pub filter_query: Option<String>,
    pub order_by: Option<String>,
    pub sort_order: Option<String>,
}

pub async fn list_entities(
    State(state): State<AppState>,
    Extension(route): Extension<EntityRoute>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    let instance = instance_of(&state, &route.plugin)?;

    let descending = match params.sort_order.as_deref() {
        None => false,
        Some(order) if order.eq_ignore_ascii_case("asc") => false,
        Some(order) if order.eq_ignore_ascii_case("desc") => true,
        Some(other) => {
            return Err(ApiError::bad_request(format!(
                "sortOrder '{other}' is not one of ASC|DESC"
            )))
        }
    };
    let filter = match &params.filter_query {
        Some(raw) => FilterQuery::parse(raw)?,
        None => FilterQuery::default(),
    };

    let items = instance
        .list_entities(
            &route.kind,
            params.q.as_deref(),
            &filter,
            params.order_by.as_deref(),
            descending,
        )
        .await;
    let page = paginate(items, params.page_size, params.page_token.as_deref())?;
    Ok(Json(serde_json::to_value(page).map_err(|e| ApiError::internal(e.to_string()))?))
}

pub async fn get_entity(
    State(state): State<AppState>,
    Extension(route): Extension<EntityRoute>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let instance = instance_of(&state, &route.plugin)?;
    let entity = instance
        .get_entity(&route.kind, &name)
        .await
        .ok_or_else(|| ApiError::not_found(format!("{} '{name}'", route.kind)))?;
    Ok(Json(entity))
}

// --- health --------------------------------------------------------------

/// `/livez` and its `/healthz` alias.
pub async fn livez(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "alive",
        "uptime": state.started_at.elapsed().as_secs(),
    }))
}

/// `/readyz`: ready when the config store answers, the initial source load
/// finished, and every plugin reports healthy. Each component carries its
/// own sub-status.
pub async fn readyz(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let store_ok = state.config_store.ping().await.is_ok();
    let initial_load_done = state.ready.load(std::sync::atomic::Ordering::Acquire);

    let mut plugin_status = serde_json::Map::new();
    let mut plugins_ok = true;
    for name in state.plugin_order.iter() {
        let healthy = match state.instances.get(name).map(|i| i.clone()) {
            Some(instance) => instance.healthy().await,
            None => false,
        };
        plugins_ok &= healthy;
        plugin_status.insert(name.clone(), json!(if healthy { "ok" } else { "degraded" }));
    }

    let ready = store_ok && initial_load_done && plugins_ok;
    let body = json!({
        "status": if ready { "ready" } else { "not_ready" },
        "components": {
            "configStore": if store_ok { "ok" } else { "unavailable" },
            "initialLoad": if initial_load_done { "ok" } else { "pending" },
            "plugins": plugin_status,
        },
    });
    if ready {
        Ok(Json(body))
    } else {
        Err(ApiError::Transient {
            message: body.to_string(),
        })
    }
}
