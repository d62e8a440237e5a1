//! Read API end-to-end tests: discovery, listing, filtering, pagination,
//! tenancy.

mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use catalog_server::config::TenancyMode;
use catalog_server::server::create_server;
use common::{base_settings, server_with_mcp_source, write_sources_yaml, MCP_CATALOG};
use serde_json::Value;

#[tokio::test]
async fn listing_serves_both_entries() {
    let catalog = server_with_mcp_source().await;
    let response = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/mcpservers")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["size"], 2);
    assert_eq!(body["items"][0]["name"], "filesystem");
    assert_eq!(body["items"][1]["name"], "github");
    // Provenance rides along on reads.
    assert_eq!(body["items"][0]["provenance"]["sourceId"], "default");
    assert_eq!(body["items"][0]["provenance"]["sourceType"], "yaml");
}

#[tokio::test]
async fn capabilities_advertise_builtin_actions_and_governance() {
    let catalog = server_with_mcp_source().await;
    let response = catalog
        .server
        .get("/api/plugins/mcp/capabilities")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["entities"][0]["kind"], "McpServer");
    let actions: Vec<&str> = body["entities"][0]["actions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    for builtin in ["tag", "annotate", "deprecate"] {
        assert!(actions.contains(&builtin), "missing {builtin}");
    }
    assert_eq!(body["entities"][0]["governance"]["supported"], true);
}

#[tokio::test]
async fn get_entity_and_not_found() {
    let catalog = server_with_mcp_source().await;
    let response = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/mcpservers/filesystem")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["name"], "filesystem");
    assert_eq!(body["properties"]["transport"], "stdio");
    assert_eq!(body["tags"], serde_json::json!([]));

    let response = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/mcpservers/absent")
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn filter_query_and_q() {
    let catalog = server_with_mcp_source().await;
    let response = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/mcpservers")
        .add_query_param("filterQuery", "transport = 'sse'")
        .await;
    let body: Value = response.json();
    assert_eq!(body["size"], 1);
    assert_eq!(body["items"][0]["name"], "github");

    let response = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/mcpservers")
        .add_query_param("filterQuery", "name LIKE 'file%' AND transport != 'sse'")
        .await;
    let body: Value = response.json();
    assert_eq!(body["size"], 1);
    assert_eq!(body["items"][0]["name"], "filesystem");

    let response = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/mcpservers")
        .add_query_param("q", "GitHub")
        .await;
    let body: Value = response.json();
    assert_eq!(body["size"], 1);

    let response = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/mcpservers")
        .add_query_param("filterQuery", "transport ~ 'x'")
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sort_order_is_validated() {
    let catalog = server_with_mcp_source().await;
    let response = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/mcpservers")
        .add_query_param("sortOrder", "DESC")
        .await;
    let body: Value = response.json();
    assert_eq!(body["items"][0]["name"], "github");

    let response = catalog
        .server
        .get("/api/mcp_catalog/v1alpha1/mcpservers")
        .add_query_param("sortOrder", "sideways")
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn pagination_round_trip_covers_every_item_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut doc = String::from("entries:\n");
    for i in 0..47 {
        doc.push_str(&format!("  - name: server-{i:02}\n"));
    }
    std::fs::write(dir.path().join("mcp-catalog.yaml"), doc).unwrap();
    write_sources_yaml(dir.path());
    let app = create_server(base_settings(dir.path())).await.unwrap();
    let server = TestServer::new(app).unwrap();

    let mut seen = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let mut request = server
            .get("/api/mcp_catalog/v1alpha1/mcpservers")
            .add_query_param("pageSize", "10");
        if let Some(t) = &token {
            request = request.add_query_param("pageToken", t);
        }
        let response = request.await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["size"], 47);
        for item in body["items"].as_array().unwrap() {
            seen.push(item["name"].as_str().unwrap().to_string());
        }
        match body.get("nextPageToken").and_then(|v| v.as_str()) {
            Some(next) => token = Some(next.to_string()),
            None => break,
        }
    }
    assert_eq!(seen.len(), 47);
    let mut deduped = seen.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(deduped.len(), 47, "no duplicates and no omissions");
}

#[tokio::test]
async fn namespace_mode_rejects_bad_namespaces_before_handlers() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("mcp-catalog.yaml"), MCP_CATALOG).unwrap();
    write_sources_yaml(dir.path());
    let mut settings = base_settings(dir.path());
    settings.tenancy.mode = TenancyMode::Namespace;
    let app = create_server(settings).await.unwrap();
    let server = TestServer::new(app).unwrap();

    // Uppercase namespace violates the DNS label rule.
    let response = server.get("/api/plugins?namespace=Team-A").await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], "bad_request");

    let response = server.get("/api/plugins?namespace=team-a").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    // Missing namespace is rejected too; header form is accepted.
    let response = server.get("/api/plugins").await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let response = server
        .get("/api/plugins")
        .add_header("X-Namespace", "team-b")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    // Probes never need a namespace.
    let response = server.get("/livez").await;
    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn readyz_reports_component_substatus() {
    let catalog = server_with_mcp_source().await;
    let response = catalog.server.get("/readyz").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "ready");
    assert_eq!(body["components"]["configStore"], "ok");
    assert_eq!(body["components"]["initialLoad"], "ok");
    assert_eq!(body["components"]["plugins"]["mcp"], "ok");
}
