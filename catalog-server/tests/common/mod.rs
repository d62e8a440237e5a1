//! Shared fixtures for the end-to-end tests.

use axum_test::TestServer;
use catalog_server::config::Settings;
use catalog_server::server::create_server;
use std::path::Path;

pub const OPERATOR_ROLE: (&str, &str) = ("X-User-Role", "operator");

/// Two MCP servers, the fixture most scenarios start from.
pub const MCP_CATALOG: &str = r#"
entries:
  - name: filesystem
    description: Filesystem MCP server
    properties:
      transport: stdio
  - name: github
    description: GitHub MCP server
    properties:
      transport: sse
      endpoint: https://mcp.github.example
"#;

pub struct TestCatalog {
    pub server: TestServer,
    pub dir: tempfile::TempDir,
}

impl TestCatalog {
    pub fn catalog_path(&self) -> std::path::PathBuf {
        self.dir.path().join("mcp-catalog.yaml")
    }
}

pub fn write_sources_yaml(dir: &Path) {
    std::fs::write(
        dir.join("sources.yaml"),
        r#"
apiVersion: catalog.dev/v1alpha1
kind: CatalogSourceList
catalogs:
  - name: mcp
    sources:
      - id: default
        name: Default MCP catalog
        type: yaml
        enabled: true
        properties:
          yamlCatalogPath: mcp-catalog.yaml
"#,
    )
    .unwrap();
}

pub fn base_settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.config_store.path = dir.join("sources.yaml").to_str().unwrap().to_string();
    settings
}

/// A server with one enabled YAML source of two MCP entries.
pub async fn server_with_mcp_source() -> TestCatalog {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("mcp-catalog.yaml"), MCP_CATALOG).unwrap();
    write_sources_yaml(dir.path());
    let app = create_server(base_settings(dir.path())).await.unwrap();
    TestCatalog {
        server: TestServer::new(app).unwrap(),
        dir,
    }
}

/// Same fixture with an approval policy document installed.
pub async fn server_with_policies(policies: &str) -> TestCatalog {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("mcp-catalog.yaml"), MCP_CATALOG).unwrap();
    std::fs::write(dir.path().join("policies.yaml"), policies).unwrap();
    write_sources_yaml(dir.path());
    let mut settings = base_settings(dir.path());
    settings.governance.policies_path = dir
        .path()
        .join("policies.yaml")
        .to_str()
        .unwrap()
        .to_string();
    let app = create_server(settings).await.unwrap();
    TestCatalog {
        server: TestServer::new(app).unwrap(),
        dir,
    }
}
