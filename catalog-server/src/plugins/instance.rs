//! Per-plugin runtime state.
//!
//! A [`PluginInstance`] owns one plugin's configured sources, the entity
//! cache produced by their refreshes, the overlay table, and the per-source
//! diagnostics. Lifecycle is linear within one process: uninitialised →
//! initialised → running → stopped; only running → stopped is reachable
//! twice (stop is idempotent).
//!
//! Cache discipline: one refresh at a time per source (a per-source mutex),
//! with the new entity list staged fully before the cache entry is swapped.
//! Readers therefore see either the previous or the new list, never a mix,
//! and a failing refresh leaves the last good entities visible while the
//! source's status flips to `error`.

use super::{ActionTarget, AssetRef, CatalogPlugin};
use crate::governance::provenance;
use catalog_core::actions::{
    builtin_asset_actions, ActionDefinition, ActionRequest, ActionResult, ActionScope, ACTION_ANNOTATE,
    ACTION_DEPRECATE, ACTION_TAG,
};
use catalog_core::error::CoreError;
use catalog_core::filter::FilterQuery;
use catalog_core::overlay::{OverlayKey, OverlayStore};
use catalog_core::record::{Provenance, Record};
use catalog_core::secrets::{resolve_properties, SecretResolver};
use catalog_core::source::{
    SourceConfig, SourceContext, SourceState, SourceStatus,
};
use catalog_core::validation::ValidationPolicy;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

/// Lifecycle states of a plugin instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Uninitialised,
    Initialised,
    Running,
    Stopped,
}

#[derive(Clone)]
struct CacheEntry {
    records: Arc<Vec<Record>>,
    revision: u64,
    source_type: String,
}

pub struct PluginInstance {
    plugin: Arc<dyn CatalogPlugin>,
    state: RwLock<InstanceState>,
    healthy: AtomicBool,
    started: AtomicBool,
    fatal_init_error: RwLock<Option<String>>,
    /// Source map guarded by the instance-wide lock; entity caches use
    /// finer-grained per-source locks.
    sources: RwLock<BTreeMap<String, SourceConfig>>,
    caches: DashMap<String, CacheEntry>,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
    refresh_counter: AtomicU64,
    diagnostics: DashMap<String, SourceStatus>,
    overlays: Arc<OverlayStore>,
    secret_resolver: Arc<dyn SecretResolver>,
    pub validation_policy: ValidationPolicy,
}

impl PluginInstance {
    pub fn new(
        plugin: Arc<dyn CatalogPlugin>,
        secret_resolver: Arc<dyn SecretResolver>,
        validation_policy: ValidationPolicy,
    ) -> Self {
        PluginInstance {
            plugin,
            state: RwLock::new(InstanceState::Uninitialised),
            healthy: AtomicBool::new(false),
            started: AtomicBool::new(false),
            fatal_init_error: RwLock::new(None),
            sources: RwLock::new(BTreeMap::new()),
            caches: DashMap::new(),
            refresh_locks: DashMap::new(),
            refresh_counter: AtomicU64::new(0),
            diagnostics: DashMap::new(),
            overlays: Arc::new(OverlayStore::new()),
            secret_resolver,
            validation_policy,
        }
    }

    pub fn plugin(&self) -> &Arc<dyn CatalogPlugin> {
        &self.plugin
    }

    pub fn overlays(&self) -> &Arc<OverlayStore> {
        &self.overlays
    }

    pub async fn state(&self) -> InstanceState {
        *self.state.read().await
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// The first declared kind; sources that don't tag records with a kind
    /// feed this one.
    pub fn primary_kind(&self) -> String {
        self.plugin
            .entity_kinds()
            .first()
            .map(|k| k.kind.clone())
            .unwrap_or_default()
    }

    fn record_kind(&self, record: &Record) -> String {
        record
            .custom_properties
            .get("kind")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.primary_kind())
    }

    /// Maps an entity route name to its governance asset tuple, through the
    /// plugin's mapper facet when present.
    pub fn map_asset(&self, entity_name: &str) -> AssetRef {
        self.plugin
            .as_asset_mapper()
            .and_then(|mapper| mapper.map_asset(entity_name))
            .unwrap_or_else(|| AssetRef {
                kind: self.primary_kind(),
                name: entity_name.to_string(),
            })
    }

    // --- lifecycle -------------------------------------------------------

    /// Applies migrations, resolves secrets, and loads enabled sources
    /// sequentially. A failing source degrades the plugin; a missing secret
    /// or failing plugin hook is fatal.
    pub async fn init(
        &self,
        sources: Vec<SourceConfig>,
        ctx: &SourceContext,
    ) -> Result<(), CoreError> {
        {
            let state = self.state.read().await;
            if *state != InstanceState::Uninitialised {
                return Err(CoreError::conflict(format!(
                    "plugin '{}' is already initialised",
                    self.plugin.name()
                )));
            }
        }

        if let Some(migrations) = self.plugin.as_migration_provider() {
            for migration in migrations.migrations() {
                tracing::info!(
                    plugin = self.plugin.name(),
                    migration = %migration.id,
                    "applying migration: {}",
                    migration.description
                );
            }
        }

        if let Err(e) = self.plugin.on_init().await {
            *self.fatal_init_error.write().await = Some(e.to_string());
            self.healthy.store(false, Ordering::Release);
            return Err(e);
        }

        {
            let mut map = self.sources.write().await;
            for cfg in sources {
                self.diagnostics
                    .insert(cfg.id.clone(), SourceStatus::pending(cfg.id.clone()));
                map.insert(cfg.id.clone(), cfg);
            }
        }

        let ids: Vec<String> = self.sources.read().await.keys().cloned().collect();
        for id in ids {
            let enabled = {
                let map = self.sources.read().await;
                map.get(&id).map(|c| c.enabled).unwrap_or(false)
            };
            if !enabled {
                self.mark_disabled(&id);
                continue;
            }
            // Secret resolution is a hard error here, unlike hot reload.
            let mut probe = {
                let map = self.sources.read().await;
                map.get(&id).cloned().expect("source vanished during init")
            };
            if let Err(e) =
                resolve_properties(&mut probe.properties, self.secret_resolver.as_ref())
            {
                *self.fatal_init_error.write().await = Some(e.to_string());
                self.healthy.store(false, Ordering::Release);
                return Err(e);
            }
            if let Err(e) = self.refresh_source(&id, ctx).await {
                tracing::warn!(
                    plugin = self.plugin.name(),
                    source = %id,
                    "initial load failed, plugin degraded: {e}"
                );
            }
        }

        *self.state.write().await = InstanceState::Initialised;
        self.recompute_health().await;
        Ok(())
    }

    /// Idempotent; background work is driven by the refresh scheduler.
    pub async fn start(&self) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        match *state {
            InstanceState::Running => Ok(()),
            InstanceState::Initialised => {
                self.plugin.on_start().await?;
                self.started.store(true, Ordering::Release);
                *state = InstanceState::Running;
                Ok(())
            }
            other => Err(CoreError::conflict(format!(
                "cannot start plugin '{}' from state {other:?}",
                self.plugin.name()
            ))),
        }
    }

    /// Idempotent. After stop the instance reports unhealthy.
    pub async fn stop(&self) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        if *state == InstanceState::Stopped {
            return Ok(());
        }
        self.plugin.on_stop().await?;
        self.started.store(false, Ordering::Release);
        self.healthy.store(false, Ordering::Release);
        *state = InstanceState::Stopped;
        Ok(())
    }

    /// No fatal init error, and at least one source available unless the
    /// plugin declares it needs none.
    pub async fn healthy(&self) -> bool {
        if *self.state.read().await == InstanceState::Stopped {
            return false;
        }
        if self.fatal_init_error.read().await.is_some() {
            return false;
        }
        if !self.plugin.requires_sources() {
            return true;
        }
        let no_sources = self.sources.read().await.is_empty();
        if no_sources {
            return true;
        }
        self.diagnostics
            .iter()
            .any(|entry| entry.state == SourceState::Available)
    }

    pub fn healthy_cached(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    async fn recompute_health(&self) {
        let healthy = self.healthy().await;
        self.healthy.store(healthy, Ordering::Release);
    }

    // --- source management ----------------------------------------------

    pub async fn sources(&self) -> Vec<SourceConfig> {
        self.sources.read().await.values().cloned().collect()
    }

    pub async fn source(&self, id: &str) -> Option<SourceConfig> {
        self.sources.read().await.get(id).cloned()
    }

    pub async fn upsert_source(&self, cfg: SourceConfig, ctx: &SourceContext) {
        let id = cfg.id.clone();
        let enabled = cfg.enabled;
        self.sources.write().await.insert(id.clone(), cfg);
        if enabled {
            if let Err(e) = self.refresh_source(&id, ctx).await {
                tracing::warn!(source = %id, "initial refresh after apply failed: {e}");
            }
        } else {
            self.mark_disabled(&id);
        }
        self.recompute_health().await;
    }

    /// Removing a source destroys its cached entities.
    pub async fn remove_source(&self, id: &str) -> Result<(), CoreError> {
        let removed = self.sources.write().await.remove(id);
        if removed.is_none() {
            return Err(CoreError::not_found(format!("source '{id}'")));
        }
        self.caches.remove(id);
        self.diagnostics.remove(id);
        self.refresh_locks.remove(id);
        self.recompute_health().await;
        Ok(())
    }

    pub async fn set_source_enabled(
        &self,
        id: &str,
        enabled: bool,
        ctx: &SourceContext,
    ) -> Result<(), CoreError> {
        {
            let mut map = self.sources.write().await;
            let cfg = map
                .get_mut(id)
                .ok_or_else(|| CoreError::not_found(format!("source '{id}'")))?;
            cfg.enabled = enabled;
        }
        if enabled {
            if let Err(e) = self.refresh_source(id, ctx).await {
                tracing::warn!(source = %id, "refresh after enable failed: {e}");
            }
        } else {
            self.caches.remove(id);
            self.mark_disabled(id);
        }
        self.recompute_health().await;
        Ok(())
    }

    fn mark_disabled(&self, id: &str) {
        let mut status = SourceStatus::pending(id);
        status.state = SourceState::Disabled;
        self.diagnostics.insert(id.to_string(), status);
    }

    // --- refresh ---------------------------------------------------------

    /// Refreshes one source: fetch into a staging list, then swap the cache
    /// entry. On failure the previous entry is preserved and the status
    /// carries the error.
    pub async fn refresh_source(
        &self,
        id: &str,
        ctx: &SourceContext,
    ) -> Result<SourceStatus, CoreError> {
        let lock = self
            .refresh_locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let Some(mut cfg) = self.sources.read().await.get(id).cloned() else {
            return Err(CoreError::not_found(format!("source '{id}'")));
        };
        if !cfg.enabled {
            self.mark_disabled(id);
            return Ok(self.diagnostics.get(id).unwrap().clone());
        }
        let provider = self
            .plugin
            .source_provider(&cfg.source_type)
            .ok_or_else(|| {
                CoreError::invalid(format!("no provider for source type '{}'", cfg.source_type))
            })?;

        // A missing secret during hot reload is a warning, not a failure.
        if let Err(e) = resolve_properties(&mut cfg.properties, self.secret_resolver.as_ref()) {
            tracing::warn!(plugin = self.plugin.name(), source = %id, "secret resolution: {e}");
        }

        let started = Instant::now();
        let outcome = match provider.fetch(&cfg, ctx).await {
            Ok(records) => provenance::verify_records(&cfg, records),
            Err(e) => Err(e),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let status = match outcome {
            Ok(records) => {
                let revision = self.refresh_counter.fetch_add(1, Ordering::AcqRel) + 1;
                let count = records.len();
                self.caches.insert(
                    id.to_string(),
                    CacheEntry {
                        records: Arc::new(records),
                        revision,
                        source_type: cfg.source_type.clone(),
                    },
                );
                SourceStatus {
                    source_id: id.to_string(),
                    state: SourceState::Available,
                    entity_count: count,
                    last_refresh_time: Some(Utc::now()),
                    last_refresh_duration_ms: Some(elapsed_ms),
                    error: None,
                }
            }
            Err(e) => {
                let previous_count = self
                    .caches
                    .get(id)
                    .map(|entry| entry.records.len())
                    .unwrap_or(0);
                tracing::warn!(plugin = self.plugin.name(), source = %id, "refresh failed: {e}");
                SourceStatus {
                    source_id: id.to_string(),
                    state: SourceState::Error,
                    entity_count: previous_count,
                    last_refresh_time: Some(Utc::now()),
                    last_refresh_duration_ms: Some(elapsed_ms),
                    error: Some(e.to_string()),
                }
            }
        };
        self.diagnostics.insert(id.to_string(), status.clone());
        self.recompute_health().await;
        Ok(status)
    }

    pub fn diagnostics(&self) -> Vec<SourceStatus> {
        let mut statuses: Vec<SourceStatus> =
            self.diagnostics.iter().map(|e| e.value().clone()).collect();
        statuses.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        statuses
    }

    // --- reads -----------------------------------------------------------

    /// Merged records of one kind across all sources, in source-id order.
    /// Duplicate names across sources resolve to the first source.
    pub async fn records(&self, kind: &str) -> Vec<(Record, Provenance)> {
        let ids: Vec<String> = self.sources.read().await.keys().cloned().collect();
        let mut seen = std::collections::BTreeSet::new();
        let mut out = Vec::new();
        for id in ids {
            let Some(entry) = self.caches.get(&id).map(|e| e.clone()) else {
                continue;
            };
            for record in entry.records.iter() {
                if self.record_kind(record) != kind {
                    continue;
                }
                if !seen.insert(record.name.clone()) {
                    continue;
                }
                let integrity = record
                    .custom_properties
                    .get(provenance::INTEGRITY_KEY)
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                out.push((
                    record.clone(),
                    Provenance {
                        source_id: id.clone(),
                        source_type: entry.source_type.clone(),
                        revision: entry.revision,
                        integrity,
                    },
                ));
            }
        }
        out
    }

    async fn to_entity_json(
        &self,
        kind: &str,
        record: &Record,
        prov: &Provenance,
    ) -> serde_json::Value {
        let mut value = serde_json::to_value(record).unwrap_or_else(|_| json!({}));
        if let Some(obj) = value.as_object_mut() {
            obj.entry("tags").or_insert_with(|| json!([]));
            obj.entry("annotations").or_insert_with(|| json!({}));
            obj.insert("provenance".into(), serde_json::to_value(prov).unwrap_or_default());
        }
        let key = OverlayKey::new(self.plugin.name(), kind, &record.name);
        if let Some(overlay) = self.overlays.get(&key).await {
            overlay.merge_into(&mut value);
        }
        value
    }

    /// Filtered, sorted entity list ready for pagination.
    pub async fn list_entities(
        &self,
        kind: &str,
        q: Option<&str>,
        filter: &FilterQuery,
        order_by: Option<&str>,
        descending: bool,
    ) -> Vec<serde_json::Value> {
        let mut matched: Vec<(Record, Provenance)> = self
            .records(kind)
            .await
            .into_iter()
            .filter(|(record, _)| filter.is_empty() || filter.matches(record))
            .filter(|(record, _)| match q {
                Some(q) if !q.is_empty() => {
                    let needle = q.to_lowercase();
                    record.name.to_lowercase().contains(&needle)
                        || record
                            .field("description")
                            .and_then(|v| v.as_str().map(|s| s.to_lowercase().contains(&needle)))
                            .unwrap_or(false)
                }
                _ => true,
            })
            .collect();

        let order_field = order_by.unwrap_or("name");
        matched.sort_by(|(a, _), (b, _)| {
            let left = a.field(order_field);
            let right = b.field(order_field);
            let ordering = compare_fields(&left, &right).then_with(|| a.name.cmp(&b.name));
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });

        let mut out = Vec::with_capacity(matched.len());
        for (record, prov) in &matched {
            out.push(self.to_entity_json(kind, record, prov).await);
        }
        out
    }

    pub async fn get_entity(&self, kind: &str, name: &str) -> Option<serde_json::Value> {
        let records = self.records(kind).await;
        let (record, prov) = records.iter().find(|(r, _)| r.name == name)?;
        Some(self.to_entity_json(kind, record, prov).await)
    }

    pub async fn entity_exists(&self, kind: &str, name: &str) -> bool {
        self.records(kind).await.iter().any(|(r, _)| r.name == name)
    }

    // --- actions ---------------------------------------------------------

    /// Builtin asset actions plus whatever the action facet declares.
    pub fn list_actions(&self, scope: ActionScope) -> Vec<ActionDefinition> {
        let mut actions = match scope {
            ActionScope::Asset => builtin_asset_actions(),
            ActionScope::Source => Vec::new(),
        };
        if let Some(provider) = self.plugin.as_action_provider() {
            actions.extend(provider.list_actions(scope));
        }
        actions
    }

    pub fn find_action(&self, scope: ActionScope, name: &str) -> Option<ActionDefinition> {
        self.list_actions(scope).into_iter().find(|a| a.name == name)
    }

    /// Executes an asset action; builtins mutate the overlay, everything
    /// else goes to the plugin's action facet.
    pub async fn handle_asset_action(
        &self,
        kind: &str,
        name: &str,
        request: &ActionRequest,
    ) -> Result<ActionResult, CoreError> {
        if !self.entity_exists(kind, name).await {
            return Err(CoreError::not_found(format!("entity '{name}'")));
        }
        let key = OverlayKey::new(self.plugin.name(), kind, name);
        match request.action.as_str() {
            ACTION_TAG => {
                let tags: Vec<String> = serde_json::from_value(
                    request.params.get("tags").cloned().unwrap_or(json!([])),
                )
                .map_err(|_| CoreError::invalid("params.tags must be a list of strings"))?;
                if request.dry_run {
                    return Ok(ActionResult::dry_run(ACTION_TAG, json!({"tags": tags})));
                }
                self.overlays
                    .mutate(&key, |overlay| overlay.set_tags(tags.clone()))
                    .await;
                Ok(ActionResult::completed(ACTION_TAG, json!({"tags": tags})))
            }
            ACTION_ANNOTATE => {
                let annotations: BTreeMap<String, String> = serde_json::from_value(
                    request
                        .params
                        .get("annotations")
                        .cloned()
                        .unwrap_or(json!({})),
                )
                .map_err(|_| {
                    CoreError::invalid("params.annotations must be a string-to-string map")
                })?;
                if request.dry_run {
                    return Ok(ActionResult::dry_run(
                        ACTION_ANNOTATE,
                        json!({"annotations": annotations}),
                    ));
                }
                self.overlays
                    .mutate(&key, |overlay| overlay.merge_annotations(annotations.clone()))
                    .await;
                Ok(ActionResult::completed(
                    ACTION_ANNOTATE,
                    json!({"annotations": annotations}),
                ))
            }
            ACTION_DEPRECATE => {
                let phase = request
                    .params
                    .get("phase")
                    .and_then(|v| v.as_str())
                    .unwrap_or("deprecated")
                    .to_string();
                if request.dry_run {
                    return Ok(ActionResult::dry_run(
                        ACTION_DEPRECATE,
                        json!({"phase": phase}),
                    ));
                }
                self.overlays
                    .mutate(&key, |overlay| overlay.set_lifecycle_phase(phase.clone()))
                    .await;
                Ok(ActionResult::completed(
                    ACTION_DEPRECATE,
                    json!({"phase": phase}),
                ))
            }
            _ => {
                let provider = self.plugin.as_action_provider().ok_or_else(|| {
                    CoreError::unsupported(format!(
                        "plugin '{}' provides no actions",
                        self.plugin.name()
                    ))
                })?;
                provider
                    .handle_action(ActionTarget::Asset { kind, name }, request)
                    .await
            }
        }
    }

    pub async fn handle_source_action(
        &self,
        source_id: &str,
        request: &ActionRequest,
    ) -> Result<ActionResult, CoreError> {
        let cfg = self
            .source(source_id)
            .await
            .ok_or_else(|| CoreError::not_found(format!("source '{source_id}'")))?;
        let provider = self.plugin.as_action_provider().ok_or_else(|| {
            CoreError::unsupported(format!(
                "plugin '{}' provides no actions",
                self.plugin.name()
            ))
        })?;
        provider
            .handle_action(ActionTarget::Source(&cfg), request)
            .await
    }
}

fn compare_fields(
    left: &Option<serde_json::Value>,
    right: &Option<serde_json::Value>,
) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (left, right) {
        (Some(a), Some(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => a
                .as_str()
                .unwrap_or_default()
                .cmp(b.as_str().unwrap_or_default()),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
