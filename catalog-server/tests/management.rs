//! Management surface tests: role gating, source CRUD with validation,
//! actions with dry-run semantics, refresh and diagnostics.

mod common;

use axum::http::StatusCode;
use common::{server_with_mcp_source, OPERATOR_ROLE};
use serde_json::{json, Value};

#[tokio::test]
async fn management_requires_identity_and_operator_role() {
    let catalog = server_with_mcp_source().await;

    let response = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/management/sources")
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    let response = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/management/sources")
        .add_header("X-User-Role", "viewer")
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

    let response = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/management/sources")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["sources"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn dry_run_tag_previews_without_effect() {
    let catalog = server_with_mcp_source().await;

    let response = catalog
        .server
        .post("/api/mcp_catalog/v1alpha1/management/entities/filesystem:action")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({
            "action": "tag",
            "dryRun": true,
            "params": {"tags": ["prod", "verified"]},
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "dry-run");
    assert_eq!(body["data"]["tags"], json!(["prod", "verified"]));

    // The read path shows no tags afterwards.
    let response = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/mcpservers/filesystem")
        .await;
    let body: Value = response.json();
    assert_eq!(body["tags"], json!([]));

    // And no audit event was appended for the dry run.
    let response = catalog
        .server
        .get("/api/governance/v1alpha1/assets/mcp/McpServer/filesystem/history")
        .await;
    let body: Value = response.json();
    assert_eq!(body["size"], 0);
}

#[tokio::test]
async fn tag_replaces_annotate_merges_and_audits() {
    let catalog = server_with_mcp_source().await;

    let response = catalog
        .server
        .post("/api/mcp_catalog/v1alpha1/management/entities/filesystem:action")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .add_header("X-User-Id", "alice")
        .json(&json!({"action": "tag", "params": {"tags": ["prod", "verified"]}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "completed");

    let response = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/mcpservers/filesystem")
        .await;
    let body: Value = response.json();
    assert_eq!(body["tags"], json!(["prod", "verified"]));

    // Replacement semantics.
    catalog
        .server
        .post("/api/mcp_catalog/v1alpha1/management/entities/filesystem:action")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"action": "tag", "params": {"tags": ["prod"]}}))
        .await
        .assert_status_ok();
    let body: Value = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/mcpservers/filesystem")
        .await
        .json();
    assert_eq!(body["tags"], json!(["prod"]));

    // Merge semantics for annotations.
    for annotations in [json!({"team": "ml"}), json!({"tier": "gold"})] {
        catalog
            .server
            .post("/api/mcp_catalog/v1alpha1/management/entities/filesystem:action")
            .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
            .json(&json!({"action": "annotate", "params": {"annotations": annotations}}))
            .await
            .assert_status_ok();
    }
    let body: Value = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/mcpservers/filesystem")
        .await
        .json();
    assert_eq!(body["annotations"]["team"], "ml");
    assert_eq!(body["annotations"]["tier"], "gold");

    // Effective actions appended audit events with the right action names.
    let body: Value = catalog
        .server
        .get("/api/governance/v1alpha1/assets/mcp/McpServer/filesystem/history")
        .await
        .json();
    let actions: Vec<&str> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert!(actions.contains(&"tag"));
    assert!(actions.contains(&"annotate"));
    assert_eq!(body["items"].as_array().unwrap()[0]["actor"], "operator");
}

#[tokio::test]
async fn tags_survive_refresh() {
    let catalog = server_with_mcp_source().await;
    catalog
        .server
        .post("/api/mcp_catalog/v1alpha1/management/entities/filesystem:action")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"action": "tag", "params": {"tags": ["prod"]}}))
        .await
        .assert_status_ok();

    let response = catalog
        .server
        .post("/api/mcp_catalog/v1alpha1/management/refresh/default")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/mcpservers/filesystem")
        .await
        .json();
    assert_eq!(body["tags"], json!(["prod"]));
}

#[tokio::test]
async fn deprecate_defaults_phase() {
    let catalog = server_with_mcp_source().await;
    catalog
        .server
        .post("/api/mcp_catalog/v1alpha1/management/entities/github:action")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"action": "deprecate"}))
        .await
        .assert_status_ok();
    let body: Value = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/mcpservers/github")
        .await
        .json();
    assert_eq!(body["lifecyclePhase"], "deprecated");
}

#[tokio::test]
async fn action_dispatch_input_errors() {
    let catalog = server_with_mcp_source().await;

    // Missing action field.
    let response = catalog
        .server
        .post("/api/mcp_catalog/v1alpha1/management/entities/filesystem:action")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"params": {}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    // Unknown action.
    let response = catalog
        .server
        .post("/api/mcp_catalog/v1alpha1/management/entities/filesystem:action")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"action": "explode"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    // Dry-run on an action that does not support it.
    let response = catalog
        .server
        .post("/api/mcp_catalog/v1alpha1/management/sources/default:action")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"action": "probe", "dryRun": true}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    // Unknown entity.
    let response = catalog
        .server
        .post("/api/mcp_catalog/v1alpha1/management/entities/absent:action")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"action": "tag", "params": {"tags": []}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn source_action_discovery_and_probe() {
    let catalog = server_with_mcp_source().await;

    let body: Value = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/management/actions/source")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .await
        .json();
    assert_eq!(body["actions"][0]["name"], "probe");

    let body: Value = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/management/actions/asset")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .await
        .json();
    assert_eq!(body["actions"].as_array().unwrap().len(), 3);

    let response = catalog
        .server
        .post("/api/mcp_catalog/v1alpha1/management/sources/default:action")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"action": "probe"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["data"]["readable"], true);
}

#[tokio::test]
async fn validate_and_apply_source_lifecycle() {
    let catalog = server_with_mcp_source().await;
    std::fs::write(
        catalog.dir.path().join("extra.yaml"),
        "entries:\n  - name: slack\n    properties:\n      transport: sse\n",
    )
    .unwrap();
    let extra_path = catalog.dir.path().join("extra.yaml");

    // Unknown source type fails validation.
    let response = catalog
        .server
        .post("/api/mcp_catalog/v1alpha1/management/validate-source")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"id": "extra", "name": "Extra", "type": "huggingface"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["valid"], false);

    // Applying an invalid source is a structured 400.
    let response = catalog
        .server
        .post("/api/mcp_catalog/v1alpha1/management/apply-source")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"id": "extra", "name": "Extra", "type": "yaml"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["layers"].is_array());

    // A valid one applies and serves immediately.
    let response = catalog
        .server
        .post("/api/mcp_catalog/v1alpha1/management/apply-source")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({
            "id": "extra",
            "name": "Extra",
            "type": "yaml",
            "properties": {"yamlCatalogPath": extra_path.to_str().unwrap()},
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/mcpservers")
        .await
        .json();
    assert_eq!(body["size"], 3);

    // Disable drops its entities; enable brings them back.
    catalog
        .server
        .post("/api/mcp_catalog/v1alpha1/management/sources/extra/enable")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"enabled": false}))
        .await
        .assert_status_ok();
    let body: Value = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/mcpservers")
        .await
        .json();
    assert_eq!(body["size"], 2);

    catalog
        .server
        .post("/api/mcp_catalog/v1alpha1/management/sources/extra/enable")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .json(&json!({"enabled": true}))
        .await
        .assert_status_ok();
    let body: Value = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/mcpservers")
        .await
        .json();
    assert_eq!(body["size"], 3);

    // Deleting the source destroys its entities.
    catalog
        .server
        .delete("/api/mcp_catalog/v1alpha1/management/sources/extra")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .await
        .assert_status_ok();
    let body: Value = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/mcpservers")
        .await
        .json();
    assert_eq!(body["size"], 2);
}

#[tokio::test]
async fn failing_refresh_preserves_last_good_entities() {
    let catalog = server_with_mcp_source().await;

    // Break the source, then refresh.
    std::fs::remove_file(catalog.catalog_path()).unwrap();
    let response = catalog
        .server
        .post("/api/mcp_catalog/v1alpha1/management/refresh/default")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["source"]["state"], "error");

    // Last good entities stay visible; diagnostics carry the error.
    let body: Value = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/mcpservers")
        .await
        .json();
    assert_eq!(body["size"], 2);

    let body: Value = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/management/diagnostics")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .await
        .json();
    assert_eq!(body["sources"][0]["state"], "error");
    assert!(body["sources"][0]["error"].as_str().unwrap().len() > 0);
}

#[tokio::test]
async fn models_plugin_serves_builtins_but_no_source_actions() {
    let catalog = server_with_mcp_source().await;

    let body: Value = catalog
        .server
        .get("/api/model_catalog/v1alpha1/management/actions/source")
        .add_header(OPERATOR_ROLE.0, OPERATOR_ROLE.1)
        .await
        .json();
    assert_eq!(body["actions"].as_array().unwrap().len(), 0);

    // No configured sources, still a complete, empty read surface.
    let body: Value = catalog
        .server
        .get("/api/model_catalog/v1alpha1/models")
        .await
        .json();
    assert_eq!(body["size"], 0);
}
