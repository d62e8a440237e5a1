//! Server assembly.
//!
//! Builds every component from settings — config store, governance service,
//! plugin registry and instances, refresh scheduler, retention worker — and
//! mounts the full route table behind the middleware stack. Plugins supply
//! their identity and providers; every route is mounted here, generically,
//! from the plugin's declared entity kinds.

use crate::config::{AuthMode, AuthzMode, Settings};
use crate::config_store::cluster::ClusterClient;
use crate::config_store::{build_config_store, ConfigStore};
use crate::governance::{
    handlers as governance_handlers, GovernanceConfig, GovernanceService, MemoryAuditStore,
    PolicyDocument,
};
use crate::handlers::{self, EntityRoute};
use crate::management::{self, PluginName};
use crate::middleware::{
    access_log_middleware, request_id_middleware, role_middleware, tenancy_middleware, JwtVerifier,
};
use crate::plugins::{register_builtin_plugins, PluginInstance, PluginRegistry};
use crate::retention::spawn_retention_worker;
use crate::scheduler::RefreshScheduler;
use catalog_core::secrets::{EnvSecretResolver, MountedSecretResolver, SecretResolver};
use catalog_core::source::SourceContext;
use catalog_core::validation::ValidationPolicy;
use axum::routing::{get, patch, post};
use axum::{Extension, Router};
use dashmap::DashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

/// Shared state available to every handler.
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<PluginRegistry>,
    pub instances: Arc<DashMap<String, Arc<PluginInstance>>>,
    /// Deterministic plugin iteration order.
    pub plugin_order: Arc<Vec<String>>,
    pub config_store: Arc<dyn ConfigStore>,
    pub governance: Arc<GovernanceService>,
    pub scheduler: Arc<RefreshScheduler>,
    pub jwt: Option<Arc<JwtVerifier>>,
    pub authorizer: Option<Arc<ClusterClient>>,
    pub started_at: Instant,
    /// Flipped once the initial source load of every plugin has run.
    pub ready: Arc<AtomicBool>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            registry: self.registry.clone(),
            instances: self.instances.clone(),
            plugin_order: self.plugin_order.clone(),
            config_store: self.config_store.clone(),
            governance: self.governance.clone(),
            scheduler: self.scheduler.clone(),
            jwt: self.jwt.clone(),
            authorizer: self.authorizer.clone(),
            started_at: self.started_at,
            ready: self.ready.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }
}

impl AppState {
    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Signals every background loop and stops the plugin instances.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        for name in self.plugin_order.iter() {
            if let Some(instance) = self.instances.get(name).map(|i| i.clone()) {
                if let Err(e) = instance.stop().await {
                    tracing::warn!(plugin = %name, "stop failed: {e}");
                }
            }
        }
    }
}

fn build_secret_resolver(settings: &Settings) -> Arc<dyn SecretResolver> {
    match settings.secrets.mode {
        crate::config::SecretResolverMode::Env => Arc::new(EnvSecretResolver),
        crate::config::SecretResolverMode::Mounted => {
            Arc::new(MountedSecretResolver::new(settings.secrets.mount_dir.clone()))
        }
    }
}

/// Builds the application state and the router.
pub async fn create_app(settings: Settings) -> anyhow::Result<(Router, AppState)> {
    settings.validate()?;

    let governance_config = if settings.governance.config_path.is_empty() {
        GovernanceConfig::default()
    } else {
        GovernanceConfig::load(&settings.governance.config_path)?
    };
    let policies = if settings.governance.policies_path.is_empty() {
        Vec::new()
    } else {
        PolicyDocument::load(&settings.governance.policies_path)?.policies
    };

    if settings.database.db_type != "embedded" {
        tracing::warn!(
            "DATABASE_TYPE '{}' has no bundled driver; using the embedded store",
            settings.database.db_type
        );
    }
    let audit = Arc::new(MemoryAuditStore::new());
    let retention_days = governance_config.audit_retention.days;
    let governance = Arc::new(GovernanceService::new(
        governance_config.clone(),
        policies,
        (!settings.governance.policies_path.is_empty())
            .then(|| settings.governance.policies_path.clone()),
        audit.clone(),
    ));

    let config_store = build_config_store(&settings).await?;
    let secret_resolver = build_secret_resolver(&settings);

    let jwt = match settings.auth.mode {
        AuthMode::Jwt => Some(Arc::new(JwtVerifier::from_settings(&settings.auth)?)),
        AuthMode::Header => None,
    };
    let authorizer = match settings.authz.mode {
        AuthzMode::Sar => Some(Arc::new(ClusterClient::in_cluster().await?)),
        AuthzMode::None => None,
    };

    let registry = Arc::new(PluginRegistry::new());
    register_builtin_plugins(&registry)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let instances: Arc<DashMap<String, Arc<PluginInstance>>> = Arc::new(DashMap::new());
    let plugin_order = registry.names();
    let init_ctx = SourceContext::new(shutdown_rx.clone());
    let validation_policy = ValidationPolicy {
        trusted_source_prefixes: governance_config.trusted_sources.clone(),
    };

    for name in &plugin_order {
        let plugin = registry.build(name)?;
        let instance = Arc::new(PluginInstance::new(
            plugin,
            secret_resolver.clone(),
            validation_policy.clone(),
        ));
        let sources = config_store.list(name).await?;
        // A failing plugin init degrades that plugin, never the server.
        if let Err(e) = instance.init(sources, &init_ctx).await {
            tracing::error!(plugin = %name, "init failed, plugin degraded: {e}");
        } else if let Err(e) = instance.start().await {
            tracing::error!(plugin = %name, "start failed: {e}");
        }
        instances.insert(name.clone(), instance);
    }
    registry.seal();

    let scheduler = Arc::new(RefreshScheduler::new(instances.clone(), shutdown_rx.clone()));
    scheduler.start();
    spawn_retention_worker(audit.clone(), retention_days, shutdown_rx.clone());

    let state = AppState {
        settings: Arc::new(settings),
        registry,
        instances,
        plugin_order: Arc::new(plugin_order),
        config_store,
        governance,
        scheduler,
        jwt,
        authorizer,
        started_at: Instant::now(),
        ready: Arc::new(AtomicBool::new(true)),
        shutdown_tx,
    };

    spawn_policy_reload_on_sighup(&state);

    let router = build_router(&state);
    Ok((router, state))
}

/// Convenience wrapper returning the router alone, for embedding and tests.
pub async fn create_server(settings: Settings) -> anyhow::Result<Router> {
    let (router, _state) = create_app(settings).await?;
    Ok(router)
}

#[cfg(unix)]
fn spawn_policy_reload_on_sighup(state: &AppState) {
    let governance = state.governance.clone();
    let mut shutdown = state.shutdown_rx();
    tokio::spawn(async move {
        let Ok(mut hangup) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        else {
            tracing::warn!("SIGHUP handler could not be installed");
            return;
        };
        loop {
            tokio::select! {
                _ = hangup.recv() => governance.reload_policies().await,
                _ = shutdown.changed() => return,
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_policy_reload_on_sighup(_state: &AppState) {}

fn build_router(state: &AppState) -> Router {
    let mut app = Router::new()
        .route("/api/plugins", get(handlers::list_plugins))
        .route(
            "/api/plugins/{name}/capabilities",
            get(handlers::plugin_capabilities_by_name),
        )
        .route("/livez", get(handlers::livez))
        .route("/healthz", get(handlers::livez))
        .route("/readyz", get(handlers::readyz));

    for name in state.plugin_order.iter() {
        let Some(instance) = state.instances.get(name).map(|i| i.clone()) else {
            continue;
        };
        let plugin = instance.plugin();
        let mut plugin_router = Router::new().route("/capabilities", get(handlers::plugin_capabilities));

        for spec in plugin.entity_kinds() {
            let kind_router = Router::new()
                .route(&format!("/{}", spec.plural), get(handlers::list_entities))
                .route(
                    &format!("/{}/{{name}}", spec.plural),
                    get(handlers::get_entity),
                )
                .layer(Extension(EntityRoute {
                    plugin: name.clone(),
                    kind: spec.kind.clone(),
                }));
            plugin_router = plugin_router.merge(kind_router);
        }

        let management_router = Router::new()
            .route("/sources", get(management::list_sources))
            .route("/validate-source", post(management::validate_source))
            .route("/apply-source", post(management::apply_source))
            .route(
                "/sources/{selector}",
                post(management::source_action).delete(management::delete_source),
            )
            .route("/sources/{selector}/enable", post(management::enable_source))
            .route("/refresh", post(management::refresh_all))
            .route("/refresh/{id}", post(management::refresh_one))
            .route("/diagnostics", get(management::diagnostics))
            .route("/entities/{selector}", post(management::entity_action))
            .route("/actions/{scope}", get(management::list_actions));
        plugin_router = plugin_router
            .nest("/management", management_router)
            .layer(Extension(PluginName(name.clone())));

        app = app.nest(plugin.base_path(), plugin_router);
    }

    let governance_router = Router::new()
        .route(
            "/assets/{plugin}/{kind}/{name}",
            get(governance_handlers::get_asset).patch(governance_handlers::patch_asset),
        )
        .route(
            "/assets/{plugin}/{kind}/{name}/history",
            get(governance_handlers::asset_history),
        )
        .route(
            "/assets/{plugin}/{kind}/{name}/actions/{action}",
            post(governance_handlers::asset_action),
        )
        .route(
            "/assets/{plugin}/{kind}/{name}/versions",
            get(governance_handlers::list_versions).post(governance_handlers::create_version),
        )
        .route(
            "/assets/{plugin}/{kind}/{name}/bindings",
            get(governance_handlers::list_bindings),
        )
        .route(
            "/assets/{plugin}/{kind}/{name}/bindings/{env}",
            patch(governance_handlers::bind_environment),
        )
        .route("/approvals", get(governance_handlers::list_approvals))
        .route("/approvals/{id}", get(governance_handlers::get_approval))
        .route(
            "/approvals/{id}/decisions",
            post(governance_handlers::decide_approval),
        )
        .route(
            "/approvals/{id}/cancel",
            post(governance_handlers::cancel_approval),
        )
        .route("/audit", get(governance_handlers::audit_stream));
    app = app.nest("/api/governance/v1alpha1", governance_router);

    let mut cors = CorsLayer::new();
    if state
        .settings
        .server
        .cors_allowed_origins
        .iter()
        .any(|o| o == "*")
    {
        cors = cors.allow_origin(Any).allow_methods(Any).allow_headers(Any);
    } else {
        for origin in &state.settings.server.cors_allowed_origins {
            if let Ok(value) = origin.parse::<axum::http::HeaderValue>() {
                cors = cors.allow_origin(value);
            }
        }
    }

    app.layer(
        ServiceBuilder::new()
            .layer(CatchPanicLayer::new())
            .layer(axum::middleware::from_fn(request_id_middleware))
            .layer(axum::middleware::from_fn(access_log_middleware))
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                tenancy_middleware,
            ))
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                role_middleware,
            ))
            .layer(cors)
            .layer(TimeoutLayer::new(state.settings.server.timeout)),
    )
    .with_state(state.clone())
}
