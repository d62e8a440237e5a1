//! The governance service.
//!
//! Centralised and plugin-agnostic: everything is keyed by
//! `(plugin, kind, name)`. Owns governance overlays, the lifecycle machine,
//! asset versions, environment bindings, approval requests, and the audit
//! log. Plugins never see any of this; the dispatcher consults the service
//! before executing gated actions.

use catalog_core::error::CoreError;
use catalog_core::pagination::Page;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub mod audit;
pub mod handlers;
pub mod lifecycle;
pub mod policy;
pub mod provenance;

pub use audit::{AuditEvent, AuditStore, MemoryAuditStore, NewAuditEvent};
pub use lifecycle::{transition_requires_approval, validate_transition, LifecycleState};
pub use policy::{gates_for, ApprovalPolicy, EffectiveGate, PolicyDocument};

/// Governance key of one asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetKey {
    pub plugin: String,
    pub kind: String,
    pub name: String,
}

impl AssetKey {
    pub fn new(
        plugin: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        AssetKey {
            plugin: plugin.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleTransitionEntry {
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub actor: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleInfo {
    pub state: LifecycleState,
    #[serde(default)]
    pub history: Vec<LifecycleTransitionEntry>,
}

impl Default for LifecycleInfo {
    fn default() -> Self {
        LifecycleInfo {
            state: LifecycleState::Draft,
            history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

/// The per-asset governance overlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceOverlay {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance: Option<String>,
    pub lifecycle_info: LifecycleInfo,
    pub audit_metadata: AuditMetadata,
}

impl GovernanceOverlay {
    fn new(actor: &str) -> Self {
        let now = Utc::now();
        GovernanceOverlay {
            owner: None,
            team: None,
            sla: None,
            risk: None,
            compliance: None,
            lifecycle_info: LifecycleInfo::default(),
            audit_metadata: AuditMetadata {
                created_at: now,
                updated_at: now,
                updated_by: actor.to_string(),
            },
        }
    }
}

/// PATCH body for the governance overlay; lifecycle changes go through the
/// `lifecycle.setState` action instead.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernancePatch {
    pub owner: Option<String>,
    pub team: Option<String>,
    pub sla: Option<String>,
    pub risk: Option<String>,
    pub compliance: Option<String>,
}

/// Immutable snapshot of an asset's governance and content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetVersion {
    pub id: String,
    pub version_label: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    /// The asset's lifecycle state at snapshot time.
    pub lifecycle_state: LifecycleState,
    pub governance: GovernanceOverlay,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalState {
    Pending,
    Approved,
    Denied,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Approve,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDecision {
    pub approver: String,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// A pending gated action awaiting decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub id: String,
    pub asset: AssetKey,
    pub action: String,
    pub params: serde_json::Value,
    pub requested_by: String,
    pub approvals_required: u32,
    #[serde(default)]
    pub allowed_approvers: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<ApprovalDecision>,
    pub state: ApprovalState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
}

/// One configured deployment environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
    /// Draft versions may only bind to development environments.
    #[serde(default)]
    pub development: bool,
}

fn default_retention_days() -> i64 {
    90
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRetention {
    #[serde(default = "default_retention_days")]
    pub days: i64,
}

impl Default for AuditRetention {
    fn default() -> Self {
        AuditRetention {
            days: default_retention_days(),
        }
    }
}

/// The governance config document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceConfig {
    #[serde(default)]
    pub environments: Vec<EnvironmentConfig>,
    #[serde(default)]
    pub trusted_sources: Vec<String>,
    #[serde(default)]
    pub audit_retention: AuditRetention,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        GovernanceConfig {
            environments: vec![
                EnvironmentConfig {
                    name: "dev".into(),
                    development: true,
                },
                EnvironmentConfig {
                    name: "staging".into(),
                    development: false,
                },
                EnvironmentConfig {
                    name: "prod".into(),
                    development: false,
                },
            ],
            trusted_sources: Vec::new(),
            audit_retention: AuditRetention::default(),
        }
    }
}

impl GovernanceConfig {
    pub fn load(path: &str) -> anyhow::Result<GovernanceConfig> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading governance config '{path}': {e}"))?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    pub fn environment(&self, name: &str) -> Option<&EnvironmentConfig> {
        self.environments.iter().find(|e| e.name == name)
    }
}

pub struct GovernanceService {
    config: RwLock<GovernanceConfig>,
    policies: RwLock<Vec<ApprovalPolicy>>,
    policies_path: Option<String>,
    overlays: DashMap<AssetKey, GovernanceOverlay>,
    versions: DashMap<AssetKey, Vec<AssetVersion>>,
    /// Per environment a stack of bound version ids; the top is current and
    /// rollback pops.
    bindings: DashMap<AssetKey, BTreeMap<String, Vec<String>>>,
    approvals: DashMap<String, Arc<Mutex<ApprovalRequest>>>,
    audit: Arc<dyn AuditStore>,
}

impl GovernanceService {
    pub fn new(
        config: GovernanceConfig,
        policies: Vec<ApprovalPolicy>,
        policies_path: Option<String>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        GovernanceService {
            config: RwLock::new(config),
            policies: RwLock::new(policies),
            policies_path,
            overlays: DashMap::new(),
            versions: DashMap::new(),
            bindings: DashMap::new(),
            approvals: DashMap::new(),
            audit,
        }
    }

    pub fn audit(&self) -> &Arc<dyn AuditStore> {
        &self.audit
    }

    pub async fn config(&self) -> GovernanceConfig {
        self.config.read().await.clone()
    }

    pub async fn retention_days(&self) -> i64 {
        self.config.read().await.audit_retention.days
    }

    /// Reloads the policy document from disk; wired to SIGHUP.
    pub async fn reload_policies(&self) {
        let Some(path) = &self.policies_path else {
            return;
        };
        match PolicyDocument::load(path) {
            Ok(doc) => {
                let count = doc.policies.len();
                *self.policies.write().await = doc.policies;
                tracing::info!("reloaded {count} approval policies from '{path}'");
            }
            Err(e) => tracing::warn!("keeping previous approval policies: {e}"),
        }
    }

    pub async fn lifecycle_states(&self) -> Vec<String> {
        LifecycleState::all().iter().map(|s| s.as_str().to_string()).collect()
    }

    /// Actions any active policy may gate, for capability documents.
    pub async fn gated_actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self
            .policies
            .read()
            .await
            .iter()
            .flat_map(|p| p.gates.iter().map(|g| g.action.clone()))
            .collect();
        actions.sort();
        actions.dedup();
        actions
    }

    // --- overlays --------------------------------------------------------

    /// The overlay, defaulting to a fresh draft for unknown assets.
    pub fn overlay(&self, key: &AssetKey) -> GovernanceOverlay {
        self.overlays
            .get(key)
            .map(|o| o.clone())
            .unwrap_or_else(|| GovernanceOverlay::new("system"))
    }

    pub async fn patch_overlay(
        &self,
        key: &AssetKey,
        patch: GovernancePatch,
        actor: &str,
    ) -> Result<GovernanceOverlay, CoreError> {
        let mut overlay = self
            .overlays
            .entry(key.clone())
            .or_insert_with(|| GovernanceOverlay::new(actor));
        let o = overlay.value_mut();
        if let Some(owner) = patch.owner {
            o.owner = Some(owner);
        }
        if let Some(team) = patch.team {
            o.team = Some(team);
        }
        if let Some(sla) = patch.sla {
            o.sla = Some(sla);
        }
        if let Some(risk) = patch.risk {
            o.risk = Some(risk);
        }
        if let Some(compliance) = patch.compliance {
            o.compliance = Some(compliance);
        }
        o.audit_metadata.updated_at = Utc::now();
        o.audit_metadata.updated_by = actor.to_string();
        let snapshot = o.clone();
        drop(overlay);

        self.audit
            .append(NewAuditEvent {
                plugin: key.plugin.clone(),
                kind: key.kind.clone(),
                name: key.name.clone(),
                actor: actor.to_string(),
                action: "governance.update".into(),
                outcome: "completed".into(),
                payload: serde_json::to_value(&snapshot).unwrap_or_default(),
            })
            .await?;
        Ok(snapshot)
    }

    // --- gating ----------------------------------------------------------

    /// The gates the attempted action must clear for this asset; includes
    /// the structural requirement for transitions out of `archived`.
    pub async fn gate_for(&self, key: &AssetKey, action: &str, params: &serde_json::Value) -> EffectiveGate {
        let overlay = self.overlay(key);
        let policies = self.policies.read().await;
        let mut gate = gates_for(
            &policies,
            &key.plugin,
            &key.kind,
            overlay.risk.as_deref(),
            action,
        );
        if action == "lifecycle.setState" && !gate.is_gated() {
            if let Some(to) = params
                .get("state")
                .and_then(|v| v.as_str())
                .and_then(LifecycleState::parse)
            {
                if transition_requires_approval(overlay.lifecycle_info.state, to) {
                    gate.gates.push(policy::ApprovalGate {
                        action: action.to_string(),
                        approvals_required: 1,
                        allowed_approvers: Vec::new(),
                    });
                }
            }
        }
        gate
    }

    // --- lifecycle -------------------------------------------------------

    /// Validates and applies a lifecycle transition, emitting one audit
    /// event. Gating is the caller's responsibility.
    pub async fn set_lifecycle_state(
        &self,
        key: &AssetKey,
        to: LifecycleState,
        actor: &str,
    ) -> Result<GovernanceOverlay, CoreError> {
        let snapshot = {
            let mut overlay = self
                .overlays
                .entry(key.clone())
                .or_insert_with(|| GovernanceOverlay::new(actor));
            let o = overlay.value_mut();
            let from = o.lifecycle_info.state;
            validate_transition(from, to).map_err(CoreError::invalid)?;
            o.lifecycle_info.state = to;
            o.lifecycle_info.history.push(LifecycleTransitionEntry {
                from,
                to,
                actor: actor.to_string(),
                at: Utc::now(),
            });
            o.audit_metadata.updated_at = Utc::now();
            o.audit_metadata.updated_by = actor.to_string();
            o.clone()
        };

        self.audit
            .append(NewAuditEvent {
                plugin: key.plugin.clone(),
                kind: key.kind.clone(),
                name: key.name.clone(),
                actor: actor.to_string(),
                action: "lifecycle.setState".into(),
                outcome: "completed".into(),
                payload: serde_json::json!({"state": to.as_str()}),
            })
            .await?;
        Ok(snapshot)
    }

    /// Pure pre-check used by dry runs.
    pub fn check_transition(&self, key: &AssetKey, to: LifecycleState) -> Result<(), CoreError> {
        let overlay = self.overlay(key);
        validate_transition(overlay.lifecycle_info.state, to).map_err(CoreError::invalid)
    }

    // --- versions --------------------------------------------------------

    pub async fn create_version(
        &self,
        key: &AssetKey,
        label: &str,
        actor: &str,
        content: Option<serde_json::Value>,
    ) -> Result<AssetVersion, CoreError> {
        if label.trim().is_empty() {
            return Err(CoreError::invalid("versionLabel must not be empty"));
        }
        let overlay = self.overlay(key);
        let version = {
            let mut versions = self.versions.entry(key.clone()).or_default();
            if versions.iter().any(|v| v.version_label == label) {
                return Err(CoreError::conflict(format!(
                    "version label '{label}' already exists"
                )));
            }
            let version = AssetVersion {
                id: uuid::Uuid::new_v4().to_string(),
                version_label: label.to_string(),
                created_at: Utc::now(),
                created_by: actor.to_string(),
                lifecycle_state: overlay.lifecycle_info.state,
                governance: overlay,
                content,
            };
            versions.push(version.clone());
            version
        };

        self.audit
            .append(NewAuditEvent {
                plugin: key.plugin.clone(),
                kind: key.kind.clone(),
                name: key.name.clone(),
                actor: actor.to_string(),
                action: "version.create".into(),
                outcome: "completed".into(),
                payload: serde_json::json!({"versionLabel": label, "versionId": version.id}),
            })
            .await?;
        Ok(version)
    }

    pub fn versions(&self, key: &AssetKey) -> Vec<AssetVersion> {
        self.versions.get(key).map(|v| v.clone()).unwrap_or_default()
    }

    pub fn version_by_id(&self, key: &AssetKey, version_id: &str) -> Option<AssetVersion> {
        self.versions(key).into_iter().find(|v| v.id == version_id)
    }

    // --- bindings --------------------------------------------------------

    /// Binds a version to an environment, enforcing the structural
    /// constraints: archived assets cannot take new bindings, draft
    /// snapshots only bind to development environments.
    pub async fn bind(
        &self,
        key: &AssetKey,
        env: &str,
        version_id: &str,
        actor: &str,
        audit_action: &str,
    ) -> Result<(), CoreError> {
        let config = self.config.read().await;
        let environment = config
            .environment(env)
            .ok_or_else(|| CoreError::invalid(format!("unknown environment '{env}'")))?;
        let overlay = self.overlay(key);
        if overlay.lifecycle_info.state == LifecycleState::Archived {
            return Err(CoreError::invalid(
                "archived assets cannot be bound to environments",
            ));
        }
        let version = self
            .version_by_id(key, version_id)
            .ok_or_else(|| CoreError::not_found(format!("version '{version_id}'")))?;
        if version.lifecycle_state == LifecycleState::Archived {
            return Err(CoreError::invalid("archived versions cannot be bound"));
        }
        if version.lifecycle_state == LifecycleState::Draft && !environment.development {
            return Err(CoreError::invalid(format!(
                "draft versions cannot bind to non-development environment '{env}'"
            )));
        }
        let development = environment.development;
        drop(config);

        self.bindings
            .entry(key.clone())
            .or_default()
            .entry(env.to_string())
            .or_default()
            .push(version_id.to_string());

        self.audit
            .append(NewAuditEvent {
                plugin: key.plugin.clone(),
                kind: key.kind.clone(),
                name: key.name.clone(),
                actor: actor.to_string(),
                action: audit_action.to_string(),
                outcome: "completed".into(),
                payload: serde_json::json!({
                    "env": env,
                    "versionId": version_id,
                    "development": development,
                }),
            })
            .await?;
        Ok(())
    }

    /// Copies the current binding of `from_env` onto `to_env`.
    pub async fn promote(
        &self,
        key: &AssetKey,
        from_env: &str,
        to_env: &str,
        actor: &str,
    ) -> Result<String, CoreError> {
        let version_id = self
            .current_binding(key, from_env)
            .ok_or_else(|| {
                CoreError::invalid(format!("no binding in environment '{from_env}'"))
            })?;
        self.bind(key, to_env, &version_id, actor, "promotion.promote")
            .await?;
        Ok(version_id)
    }

    /// Reverts an environment to its previous binding.
    pub async fn rollback_binding(
        &self,
        key: &AssetKey,
        env: &str,
        actor: &str,
    ) -> Result<String, CoreError> {
        let restored = {
            let mut bindings = self
                .bindings
                .get_mut(key)
                .ok_or_else(|| CoreError::not_found("no bindings for asset"))?;
            let stack = bindings
                .get_mut(env)
                .ok_or_else(|| CoreError::not_found(format!("no binding in '{env}'")))?;
            if stack.len() < 2 {
                return Err(CoreError::invalid(format!(
                    "environment '{env}' has no previous binding to roll back to"
                )));
            }
            stack.pop();
            stack.last().cloned().expect("stack non-empty after pop")
        };

        self.audit
            .append(NewAuditEvent {
                plugin: key.plugin.clone(),
                kind: key.kind.clone(),
                name: key.name.clone(),
                actor: actor.to_string(),
                action: "promotion.rollback".into(),
                outcome: "completed".into(),
                payload: serde_json::json!({"env": env, "versionId": restored}),
            })
            .await?;
        Ok(restored)
    }

    pub fn current_binding(&self, key: &AssetKey, env: &str) -> Option<String> {
        self.bindings
            .get(key)?
            .get(env)
            .and_then(|stack| stack.last().cloned())
    }

    pub fn bindings(&self, key: &AssetKey) -> BTreeMap<String, String> {
        self.bindings
            .get(key)
            .map(|map| {
                map.iter()
                    .filter_map(|(env, stack)| {
                        stack.last().map(|id| (env.clone(), id.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    // --- approvals -------------------------------------------------------

    pub async fn create_approval(
        &self,
        key: &AssetKey,
        action: &str,
        params: serde_json::Value,
        requested_by: &str,
        gate: &EffectiveGate,
    ) -> Result<ApprovalRequest, CoreError> {
        let now = Utc::now();
        let mut allowed: Vec<String> = gate
            .gates
            .iter()
            .flat_map(|g| g.allowed_approvers.iter().cloned())
            .collect();
        allowed.sort();
        allowed.dedup();
        let request = ApprovalRequest {
            id: uuid::Uuid::new_v4().to_string(),
            asset: key.clone(),
            action: action.to_string(),
            params,
            requested_by: requested_by.to_string(),
            approvals_required: gate.approvals_required(),
            allowed_approvers: allowed,
            decisions: Vec::new(),
            state: ApprovalState::Pending,
            created_at: now,
            updated_at: now,
            cancel_reason: None,
        };
        self.approvals
            .insert(request.id.clone(), Arc::new(Mutex::new(request.clone())));

        self.audit
            .append(NewAuditEvent {
                plugin: key.plugin.clone(),
                kind: key.kind.clone(),
                name: key.name.clone(),
                actor: requested_by.to_string(),
                action: format!("{action}.approvalRequested"),
                outcome: "pending".into(),
                payload: serde_json::json!({"approvalId": request.id}),
            })
            .await?;
        Ok(request)
    }

    pub async fn approval(&self, id: &str) -> Result<ApprovalRequest, CoreError> {
        let entry = self
            .approvals
            .get(id)
            .ok_or_else(|| CoreError::not_found(format!("approval '{id}'")))?
            .clone();
        let request = entry.lock().await;
        Ok(request.clone())
    }

    pub async fn list_approvals(&self, state: Option<ApprovalState>) -> Vec<ApprovalRequest> {
        // Snapshot the Arcs first; the shard guard must not live across an
        // await.
        let entries: Vec<Arc<Mutex<ApprovalRequest>>> =
            self.approvals.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for entry in entries {
            let request = entry.lock().await.clone();
            if state.map(|s| request.state == s).unwrap_or(true) {
                out.push(request);
            }
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// Records one decision. Decisions on the same request are serialised
    /// by the request's lock; the first decision that tips either threshold
    /// transitions the state. Returns the updated request and whether it
    /// just became approved (the caller then executes the original action).
    pub async fn decide(
        &self,
        id: &str,
        approver: &str,
        verdict: Verdict,
        comment: Option<String>,
    ) -> Result<(ApprovalRequest, bool), CoreError> {
        let entry = self
            .approvals
            .get(id)
            .ok_or_else(|| CoreError::not_found(format!("approval '{id}'")))?
            .clone();
        let mut request = entry.lock().await;
        if request.state != ApprovalState::Pending {
            return Err(CoreError::conflict(format!(
                "approval '{id}' is not pending"
            )));
        }
        if !request.allowed_approvers.is_empty()
            && !request.allowed_approvers.iter().any(|a| a == approver)
        {
            return Err(CoreError::invalid(format!(
                "'{approver}' is not an allowed approver"
            )));
        }
        if request.decisions.iter().any(|d| d.approver == approver) {
            return Err(CoreError::conflict(format!(
                "'{approver}' has already decided"
            )));
        }

        request.decisions.push(ApprovalDecision {
            approver: approver.to_string(),
            verdict,
            comment,
            decided_at: Utc::now(),
        });
        request.updated_at = Utc::now();

        let newly_approved = match verdict {
            Verdict::Deny => {
                request.state = ApprovalState::Denied;
                false
            }
            Verdict::Approve => {
                let approvals = request
                    .decisions
                    .iter()
                    .filter(|d| d.verdict == Verdict::Approve)
                    .count() as u32;
                if approvals >= request.approvals_required {
                    request.state = ApprovalState::Approved;
                    true
                } else {
                    false
                }
            }
        };

        let snapshot = request.clone();
        drop(request);

        self.audit
            .append(NewAuditEvent {
                plugin: snapshot.asset.plugin.clone(),
                kind: snapshot.asset.kind.clone(),
                name: snapshot.asset.name.clone(),
                actor: approver.to_string(),
                action: "approval.decision".into(),
                outcome: match snapshot.state {
                    ApprovalState::Denied => "denied".into(),
                    ApprovalState::Approved => "approved".into(),
                    _ => "pending".into(),
                },
                payload: serde_json::json!({"approvalId": id, "verdict": verdict}),
            })
            .await?;
        Ok((snapshot, newly_approved))
    }

    pub async fn cancel_approval(
        &self,
        id: &str,
        actor: &str,
        reason: Option<String>,
    ) -> Result<ApprovalRequest, CoreError> {
        let entry = self
            .approvals
            .get(id)
            .ok_or_else(|| CoreError::not_found(format!("approval '{id}'")))?
            .clone();
        let mut request = entry.lock().await;
        if request.state != ApprovalState::Pending {
            return Err(CoreError::conflict(format!(
                "approval '{id}' is not pending"
            )));
        }
        request.state = ApprovalState::Cancelled;
        request.cancel_reason = reason;
        request.updated_at = Utc::now();
        let snapshot = request.clone();
        drop(request);

        self.audit
            .append(NewAuditEvent {
                plugin: snapshot.asset.plugin.clone(),
                kind: snapshot.asset.kind.clone(),
                name: snapshot.asset.name.clone(),
                actor: actor.to_string(),
                action: "approval.cancel".into(),
                outcome: "cancelled".into(),
                payload: serde_json::json!({"approvalId": id}),
            })
            .await?;
        Ok(snapshot)
    }

    // --- history ---------------------------------------------------------

    pub async fn history(
        &self,
        key: &AssetKey,
        page_size: Option<usize>,
        page_token: Option<&str>,
    ) -> Result<Page<AuditEvent>, CoreError> {
        self.audit
            .list_for_asset(&key.plugin, &key.kind, &key.name, page_size, page_token)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> GovernanceService {
        GovernanceService::new(
            GovernanceConfig::default(),
            Vec::new(),
            None,
            Arc::new(MemoryAuditStore::new()),
        )
    }

    fn key() -> AssetKey {
        AssetKey::new("mcp", "McpServer", "filesystem")
    }

    #[tokio::test]
    async fn lifecycle_walk_and_denial() {
        let svc = service();
        let key = key();
        svc.set_lifecycle_state(&key, LifecycleState::Approved, "op")
            .await
            .unwrap();
        svc.set_lifecycle_state(&key, LifecycleState::Deprecated, "op")
            .await
            .unwrap();
        let denied = svc
            .set_lifecycle_state(&key, LifecycleState::Approved, "op")
            .await;
        assert!(denied.is_err());
        // Denied transition left state unchanged.
        assert_eq!(
            svc.overlay(&key).lifecycle_info.state,
            LifecycleState::Deprecated
        );
        assert_eq!(svc.overlay(&key).lifecycle_info.history.len(), 2);
    }

    #[tokio::test]
    async fn version_labels_are_unique_per_asset() {
        let svc = service();
        let key = key();
        svc.create_version(&key, "v1", "op", None).await.unwrap();
        assert!(svc.create_version(&key, "v1", "op", None).await.is_err());
        let other = AssetKey::new("mcp", "McpServer", "github");
        svc.create_version(&other, "v1", "op", None).await.unwrap();
    }

    #[tokio::test]
    async fn binding_constraints() {
        let svc = service();
        let key = key();
        // Draft snapshot binds to dev only.
        let v1 = svc.create_version(&key, "v1", "op", None).await.unwrap();
        svc.bind(&key, "dev", &v1.id, "op", "promotion.bind")
            .await
            .unwrap();
        assert!(svc
            .bind(&key, "prod", &v1.id, "op", "promotion.bind")
            .await
            .is_err());

        // Approved snapshot may go anywhere known.
        svc.set_lifecycle_state(&key, LifecycleState::Approved, "op")
            .await
            .unwrap();
        let v2 = svc.create_version(&key, "v2", "op", None).await.unwrap();
        svc.bind(&key, "prod", &v2.id, "op", "promotion.bind")
            .await
            .unwrap();
        assert!(svc
            .bind(&key, "moon", &v2.id, "op", "promotion.bind")
            .await
            .is_err());

        // Archived assets take no new bindings.
        svc.set_lifecycle_state(&key, LifecycleState::Deprecated, "op")
            .await
            .unwrap();
        svc.set_lifecycle_state(&key, LifecycleState::Archived, "op")
            .await
            .unwrap();
        assert!(svc
            .bind(&key, "dev", &v2.id, "op", "promotion.bind")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn promote_and_rollback() {
        let svc = service();
        let key = key();
        svc.set_lifecycle_state(&key, LifecycleState::Approved, "op")
            .await
            .unwrap();
        let v1 = svc.create_version(&key, "v1", "op", None).await.unwrap();
        let v2 = svc.create_version(&key, "v2", "op", None).await.unwrap();
        svc.bind(&key, "dev", &v1.id, "op", "promotion.bind").await.unwrap();
        svc.promote(&key, "dev", "prod", "op").await.unwrap();
        assert_eq!(svc.current_binding(&key, "prod"), Some(v1.id.clone()));

        svc.bind(&key, "prod", &v2.id, "op", "promotion.bind").await.unwrap();
        let restored = svc.rollback_binding(&key, "prod", "op").await.unwrap();
        assert_eq!(restored, v1.id);
        assert!(svc.rollback_binding(&key, "dev", "op").await.is_err());
    }

    #[tokio::test]
    async fn approval_flow_with_distinct_approvers() {
        let svc = service();
        let key = key();
        let gate = EffectiveGate {
            policy_id: Some("p".into()),
            gates: vec![policy::ApprovalGate {
                action: "lifecycle.setState".into(),
                approvals_required: 2,
                allowed_approvers: Vec::new(),
            }],
        };
        let request = svc
            .create_approval(&key, "lifecycle.setState", serde_json::json!({"state": "approved"}), "requester", &gate)
            .await
            .unwrap();

        let (_, done) = svc
            .decide(&request.id, "alice", Verdict::Approve, None)
            .await
            .unwrap();
        assert!(!done);
        // Same approver cannot decide twice.
        assert!(svc
            .decide(&request.id, "alice", Verdict::Approve, None)
            .await
            .is_err());
        let (updated, done) = svc
            .decide(&request.id, "bob", Verdict::Approve, None)
            .await
            .unwrap();
        assert!(done);
        assert_eq!(updated.state, ApprovalState::Approved);
        // No further decisions once settled.
        assert!(svc
            .decide(&request.id, "carol", Verdict::Approve, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn denial_settles_the_request() {
        let svc = service();
        let key = key();
        let gate = EffectiveGate {
            policy_id: None,
            gates: vec![policy::ApprovalGate {
                action: "tag".into(),
                approvals_required: 2,
                allowed_approvers: Vec::new(),
            }],
        };
        let request = svc
            .create_approval(&key, "tag", serde_json::json!({}), "requester", &gate)
            .await
            .unwrap();
        let (updated, done) = svc
            .decide(&request.id, "alice", Verdict::Deny, Some("nope".into()))
            .await
            .unwrap();
        assert!(!done);
        assert_eq!(updated.state, ApprovalState::Denied);
    }
}
