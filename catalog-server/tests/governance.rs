//! Governance end-to-end tests: lifecycle, approvals, versions, bindings,
//! audit.

mod common;

use axum::http::StatusCode;
use common::{server_with_mcp_source, server_with_policies, OPERATOR_ROLE};
use serde_json::{json, Value};

const HIGH_RISK_POLICY: &str = r#"
policies:
  - id: high-risk-lifecycle
    selector:
      risk_levels: [high]
    gates:
      - action: lifecycle.setState
        approvalsRequired: 2
"#;

fn asset_base() -> &'static str {
    "/api/governance/v1alpha1/assets/mcp/McpServer/filesystem"
}

#[tokio::test]
async fn overlay_patch_round_trip() {
    let catalog = server_with_mcp_source().await;

    // Fresh assets read as draft.
    let body: Value = catalog.server.get(asset_base()).await.json();
    assert_eq!(body["governance"]["lifecycleInfo"]["state"], "draft");

    let response = catalog
        .server
        .patch(asset_base())
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"owner": "alice", "team": "ml", "risk": "low"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = catalog.server.get(asset_base()).await.json();
    assert_eq!(body["governance"]["owner"], "alice");
    assert_eq!(body["governance"]["risk"], "low");

    // Mutations require the operator role.
    let response = catalog
        .server
        .patch(asset_base())
        .json(&json!({"owner": "mallory"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn denied_transition_is_400_and_state_unchanged() {
    let catalog = server_with_mcp_source().await;

    let response = catalog
        .server
        .post(&format!("{}/actions/lifecycle.setState", asset_base()))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"params": {"state": "archived"}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let body: Value = catalog.server.get(asset_base()).await.json();
    assert_eq!(body["governance"]["lifecycleInfo"]["state"], "draft");

    // Unknown states and unknown actions are 400 as well.
    let response = catalog
        .server
        .post(&format!("{}/actions/lifecycle.setState", asset_base()))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"params": {"state": "limbo"}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ungated_transition_executes_and_audits() {
    let catalog = server_with_mcp_source().await;

    let response = catalog
        .server
        .post(&format!("{}/actions/lifecycle.setState", asset_base()))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"params": {"state": "approved"}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["data"]["state"], "approved");

    let body: Value = catalog
        .server
        .get(&format!("{}/history", asset_base()))
        .await
        .json();
    assert_eq!(body["items"][0]["action"], "lifecycle.setState");
}

#[tokio::test]
async fn dry_run_transition_changes_nothing() {
    let catalog = server_with_mcp_source().await;

    let response = catalog
        .server
        .post(&format!("{}/actions/lifecycle.setState", asset_base()))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"dryRun": true, "params": {"state": "approved"}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "dry-run");

    let body: Value = catalog.server.get(asset_base()).await.json();
    assert_eq!(body["governance"]["lifecycleInfo"]["state"], "draft");
    let body: Value = catalog
        .server
        .get(&format!("{}/history", asset_base()))
        .await
        .json();
    assert_eq!(body["size"], 0);
}

#[tokio::test]
async fn gated_transition_needs_two_distinct_approvals() {
    let catalog = server_with_policies(HIGH_RISK_POLICY).await;

    // Raise the asset's risk so the policy selector matches.
    catalog
        .server
        .patch(asset_base())
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"risk": "high"}))
        .await
        .assert_status_ok();

    // The gated action answers 202 with a pending approval id.
    let response = catalog
        .server
        .post(&format!("{}/actions/lifecycle.setState", asset_base()))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .add_header("X-User-Id", "requester")
        .json(&json!({"params": {"state": "approved"}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::ACCEPTED);
    let body: Value = response.json();
    let approval_id = body["approvalId"].as_str().unwrap().to_string();

    // State unchanged while pending.
    let body: Value = catalog.server.get(asset_base()).await.json();
    assert_eq!(body["governance"]["lifecycleInfo"]["state"], "draft");

    // First approval: still pending.
    let response = catalog
        .server
        .post(&format!(
            "/api/governance/v1alpha1/approvals/{approval_id}/decisions"
        ))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .add_header("X-User-Id", "alice")
        .json(&json!({"verdict": "approve"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["approval"]["state"], "pending");

    // The same approver cannot tip the count alone.
    let response = catalog
        .server
        .post(&format!(
            "/api/governance/v1alpha1/approvals/{approval_id}/decisions"
        ))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .add_header("X-User-Id", "alice")
        .json(&json!({"verdict": "approve"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);

    // The second distinct approval executes the transition.
    let response = catalog
        .server
        .post(&format!(
            "/api/governance/v1alpha1/approvals/{approval_id}/decisions"
        ))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .add_header("X-User-Id", "bob")
        .json(&json!({"verdict": "approve"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["approval"]["state"], "approved");

    let body: Value = catalog.server.get(asset_base()).await.json();
    assert_eq!(body["governance"]["lifecycleInfo"]["state"], "approved");

    // Exactly one lifecycle audit event was emitted.
    let body: Value = catalog
        .server
        .get(&format!("{}/history", asset_base()))
        .await
        .json();
    let lifecycle_events = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["action"] == "lifecycle.setState")
        .count();
    assert_eq!(lifecycle_events, 1);
}

#[tokio::test]
async fn denied_approval_prevents_execution() {
    let catalog = server_with_policies(HIGH_RISK_POLICY).await;
    catalog
        .server
        .patch(asset_base())
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"risk": "high"}))
        .await
        .assert_status_ok();

    let body: Value = catalog
        .server
        .post(&format!("{}/actions/lifecycle.setState", asset_base()))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"params": {"state": "approved"}}))
        .await
        .json();
    let approval_id = body["approvalId"].as_str().unwrap().to_string();

    let response = catalog
        .server
        .post(&format!(
            "/api/governance/v1alpha1/approvals/{approval_id}/decisions"
        ))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .add_header("X-User-Id", "carol")
        .json(&json!({"verdict": "deny", "comment": "not ready"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["approval"]["state"], "denied");

    let body: Value = catalog.server.get(asset_base()).await.json();
    assert_eq!(body["governance"]["lifecycleInfo"]["state"], "draft");

    // Settled requests accept no further decisions and cannot be cancelled.
    let response = catalog
        .server
        .post(&format!(
            "/api/governance/v1alpha1/approvals/{approval_id}/cancel"
        ))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"reason": "too late"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn cancel_leaves_request_cancelled() {
    let catalog = server_with_policies(HIGH_RISK_POLICY).await;
    catalog
        .server
        .patch(asset_base())
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"risk": "high"}))
        .await
        .assert_status_ok();

    let body: Value = catalog
        .server
        .post(&format!("{}/actions/lifecycle.setState", asset_base()))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"params": {"state": "approved"}}))
        .await
        .json();
    let approval_id = body["approvalId"].as_str().unwrap().to_string();

    let response = catalog
        .server
        .post(&format!(
            "/api/governance/v1alpha1/approvals/{approval_id}/cancel"
        ))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"reason": "superseded"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = catalog
        .server
        .get(&format!("/api/governance/v1alpha1/approvals/{approval_id}"))
        .await
        .json();
    assert_eq!(body["approval"]["state"], "cancelled");
    assert_eq!(body["approval"]["cancelReason"], "superseded");

    let body: Value = catalog
        .server
        .get("/api/governance/v1alpha1/approvals?state=cancelled")
        .await
        .json();
    assert_eq!(body["approvals"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn versions_and_binding_constraints() {
    let catalog = server_with_mcp_source().await;

    // Create v1 while the asset is a draft.
    let response = catalog
        .server
        .post(&format!("{}/versions", asset_base()))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"versionLabel": "v1"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    let v1 = body["versionId"].as_str().unwrap().to_string();

    // Labels are unique per asset.
    let response = catalog
        .server
        .post(&format!("{}/versions", asset_base()))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"versionLabel": "v1"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);

    // Draft snapshots bind to development environments only.
    let response = catalog
        .server
        .patch(&format!("{}/bindings/dev", asset_base()))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"versionId": v1}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let response = catalog
        .server
        .patch(&format!("{}/bindings/prod", asset_base()))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"versionId": v1}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    // Archive the asset, then no new bindings at all.
    for state in ["approved", "deprecated", "archived"] {
        catalog
            .server
            .post(&format!("{}/actions/lifecycle.setState", asset_base()))
            .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
            .json(&json!({"params": {"state": state}}))
            .await
            .assert_status_ok();
    }
    let response = catalog
        .server
        .patch(&format!("{}/bindings/prod", asset_base()))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"versionId": v1}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let body: Value = catalog
        .server
        .get(&format!("{}/bindings", asset_base()))
        .await
        .json();
    assert_eq!(body["bindings"]["dev"], v1);
}

#[tokio::test]
async fn promote_and_rollback_actions() {
    let catalog = server_with_mcp_source().await;

    // Approved asset, two versions.
    catalog
        .server
        .post(&format!("{}/actions/lifecycle.setState", asset_base()))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"params": {"state": "approved"}}))
        .await
        .assert_status_ok();
    let v1: Value = catalog
        .server
        .post(&format!("{}/versions", asset_base()))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"versionLabel": "v1"}))
        .await
        .json();
    let v2: Value = catalog
        .server
        .post(&format!("{}/versions", asset_base()))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"versionLabel": "v2"}))
        .await
        .json();
    let v1 = v1["versionId"].as_str().unwrap().to_string();
    let v2 = v2["versionId"].as_str().unwrap().to_string();

    catalog
        .server
        .patch(&format!("{}/bindings/dev", asset_base()))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"versionId": v1}))
        .await
        .assert_status_ok();

    // promote dev -> prod.
    let response = catalog
        .server
        .post(&format!("{}/actions/promotion.promote", asset_base()))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"params": {"fromEnv": "dev", "toEnv": "prod"}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    // Re-bind prod to v2, then roll back to v1.
    catalog
        .server
        .patch(&format!("{}/bindings/prod", asset_base()))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"versionId": v2}))
        .await
        .assert_status_ok();
    let response = catalog
        .server
        .post(&format!("{}/actions/promotion.rollback", asset_base()))
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"params": {"env": "prod"}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["data"]["versionId"], v1);

    let body: Value = catalog
        .server
        .get(&format!("{}/bindings", asset_base()))
        .await
        .json();
    assert_eq!(body["bindings"]["prod"], v1);
}

#[tokio::test]
async fn audit_stream_and_history_paginate() {
    let catalog = server_with_mcp_source().await;
    for state in ["approved", "deprecated"] {
        catalog
            .server
            .post(&format!("{}/actions/lifecycle.setState", asset_base()))
            .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
            .json(&json!({"params": {"state": state}}))
            .await
            .assert_status_ok();
    }

    let body: Value = catalog
        .server
        .get(&format!("{}/history?pageSize=1", asset_base()))
        .await
        .json();
    assert_eq!(body["size"], 2);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert!(body["nextPageToken"].is_string());
    // Newest first.
    assert_eq!(body["items"][0]["payloadHash"].as_str().unwrap().len(), 64);

    let body: Value = catalog
        .server
        .get("/api/governance/v1alpha1/audit")
        .await
        .json();
    assert_eq!(body["size"], 2);
}
