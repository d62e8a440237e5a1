//! Cluster-object config store.
//!
//! Stores the same YAML payload in one key of a named ConfigMap, talking to
//! the Kubernetes API directly over HTTPS with the pod's service-account
//! credentials. Writes carry the observed `resourceVersion`; a 409 from the
//! API server means another replica won the race, so the mutation is
//! re-applied on a fresh read with jittered backoff.

use super::{ConfigStore, RevisionRing, SourceDocument};
use crate::config::ConfigStoreSettings;
use catalog_core::error::CoreError;
use catalog_core::source::SourceConfig;
use rand::Rng;
use serde_json::json;
use std::time::Duration;
use tokio::sync::Mutex;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const MAX_CONFLICT_RETRIES: usize = 5;

/// Minimal API-server client; enough for ConfigMap read/write and SAR posts.
#[derive(Clone)]
pub struct ClusterClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl ClusterClient {
    /// Builds a client from the in-cluster environment.
    pub async fn in_cluster() -> anyhow::Result<Self> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| anyhow::anyhow!("KUBERNETES_SERVICE_HOST is not set"))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".into());
        let token =
            tokio::fs::read_to_string(format!("{SERVICE_ACCOUNT_DIR}/token")).await?;
        let ca = tokio::fs::read(format!("{SERVICE_ACCOUNT_DIR}/ca.crt")).await?;
        let cert = reqwest::Certificate::from_pem(&ca)?;
        let http = reqwest::Client::builder()
            .add_root_certificate(cert)
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(ClusterClient {
            base_url: format!("https://{host}:{port}"),
            token: token.trim().to_string(),
            http,
        })
    }

    /// Client against an explicit endpoint, for tests.
    pub fn with_endpoint(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        ClusterClient {
            base_url: base_url.into(),
            token: token.into(),
            http: reqwest::Client::new(),
        }
    }

    fn configmap_url(&self, namespace: &str, name: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{namespace}/configmaps/{name}",
            self.base_url
        )
    }

    async fn get_configmap(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<serde_json::Value>, CoreError> {
        let resp = self
            .http
            .get(self.configmap_url(namespace, name))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| CoreError::source(format!("api server: {e}")))?;
        match resp.status().as_u16() {
            404 => Ok(None),
            code if code < 300 => Ok(Some(
                resp.json()
                    .await
                    .map_err(|e| CoreError::source(format!("api server: {e}")))?,
            )),
            code => Err(CoreError::source(format!("api server returned {code}"))),
        }
    }

    /// Creates or replaces the ConfigMap. A `resource_version` of `None`
    /// creates; `Some` replaces and surfaces 409 as [`CoreError::Conflict`].
    async fn put_configmap(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        payload: &str,
        resource_version: Option<&str>,
    ) -> Result<(), CoreError> {
        let mut metadata = json!({"name": name, "namespace": namespace});
        if let Some(rv) = resource_version {
            metadata["resourceVersion"] = json!(rv);
        }
        let body = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": metadata,
            "data": {key: payload},
        });
        let request = match resource_version {
            Some(_) => self.http.put(self.configmap_url(namespace, name)),
            None => self
                .http
                .post(format!("{}/api/v1/namespaces/{namespace}/configmaps", self.base_url)),
        };
        let resp = request
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::source(format!("api server: {e}")))?;
        match resp.status().as_u16() {
            409 => Err(CoreError::conflict("configmap revision conflict")),
            code if code < 300 => Ok(()),
            code => Err(CoreError::source(format!("api server returned {code}"))),
        }
    }

    /// Posts a SubjectAccessReview and returns whether it was allowed.
    pub async fn subject_access_review(
        &self,
        user: &str,
        verb: &str,
        resource: &str,
    ) -> Result<bool, CoreError> {
        let body = json!({
            "apiVersion": "authorization.k8s.io/v1",
            "kind": "SubjectAccessReview",
            "spec": {
                "user": user,
                "resourceAttributes": {"verb": verb, "resource": resource},
            },
        });
        let resp = self
            .http
            .post(format!(
                "{}/apis/authorization.k8s.io/v1/subjectaccessreviews",
                self.base_url
            ))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::source(format!("api server: {e}")))?;
        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CoreError::source(format!("api server: {e}")))?;
        Ok(value["status"]["allowed"].as_bool().unwrap_or(false))
    }
}

pub struct ClusterConfigStore {
    client: ClusterClient,
    namespace: String,
    object_name: String,
    object_key: String,
    revisions: Mutex<RevisionRing>,
}

impl ClusterConfigStore {
    pub async fn connect(settings: &ConfigStoreSettings) -> anyhow::Result<Self> {
        let client = ClusterClient::in_cluster().await?;
        Ok(Self::with_client(client, settings))
    }

    pub fn with_client(client: ClusterClient, settings: &ConfigStoreSettings) -> Self {
        ClusterConfigStore {
            client,
            namespace: settings.namespace.clone(),
            object_name: settings.object_name.clone(),
            object_key: settings.object_key.clone(),
            revisions: Mutex::new(RevisionRing::new(settings.revision_ring)),
        }
    }

    async fn load(&self) -> Result<(SourceDocument, Option<String>), CoreError> {
        match self
            .client
            .get_configmap(&self.namespace, &self.object_name)
            .await?
        {
            Some(object) => {
                let resource_version = object["metadata"]["resourceVersion"]
                    .as_str()
                    .map(str::to_string);
                let payload = object["data"][self.object_key.as_str()]
                    .as_str()
                    .unwrap_or("");
                Ok((SourceDocument::parse(payload)?, resource_version))
            }
            None => Ok((SourceDocument::default(), None)),
        }
    }

    async fn store(
        &self,
        document: &SourceDocument,
        resource_version: Option<&str>,
    ) -> Result<(), CoreError> {
        let payload = document.render()?;
        self.client
            .put_configmap(
                &self.namespace,
                &self.object_name,
                &self.object_key,
                &payload,
                resource_version,
            )
            .await
    }

    /// Read-modify-write with optimistic-concurrency retry.
    async fn mutate<F>(&self, f: F) -> Result<(), CoreError>
    where
        F: Fn(&mut SourceDocument) -> Result<(), CoreError>,
    {
        for attempt in 0..MAX_CONFLICT_RETRIES {
            let (mut document, resource_version) = self.load().await?;
            let prior = document.render()?;
            f(&mut document)?;
            match self.store(&document, resource_version.as_deref()).await {
                Ok(()) => {
                    self.revisions.lock().await.push(prior);
                    return Ok(());
                }
                Err(CoreError::Conflict { .. }) if attempt + 1 < MAX_CONFLICT_RETRIES => {
                    let jitter = rand::thread_rng().gen_range(20..120);
                    tokio::time::sleep(Duration::from_millis(jitter)).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(CoreError::conflict("configmap update kept conflicting"))
    }
}

#[async_trait::async_trait]
impl ConfigStore for ClusterConfigStore {
    async fn list(&self, plugin: &str) -> Result<Vec<SourceConfig>, CoreError> {
        let (document, _) = self.load().await?;
        Ok(document.list(plugin))
    }

    async fn get(&self, plugin: &str, id: &str) -> Result<SourceConfig, CoreError> {
        let (document, _) = self.load().await?;
        document.get(plugin, id)
    }

    async fn upsert(&self, plugin: &str, cfg: SourceConfig) -> Result<(), CoreError> {
        self.mutate(move |doc| {
            doc.upsert(plugin, cfg.clone());
            Ok(())
        })
        .await
    }

    async fn delete(&self, plugin: &str, id: &str) -> Result<(), CoreError> {
        self.mutate(|doc| doc.delete(plugin, id)).await
    }

    async fn set_enabled(&self, plugin: &str, id: &str, enabled: bool) -> Result<(), CoreError> {
        self.mutate(|doc| doc.set_enabled(plugin, id, enabled)).await
    }

    async fn snapshot(&self) -> Result<String, CoreError> {
        let (document, _) = self.load().await?;
        let payload = document.render()?;
        Ok(self.revisions.lock().await.push(payload))
    }

    async fn rollback(&self, token: &str) -> Result<(), CoreError> {
        let payload = {
            let revisions = self.revisions.lock().await;
            revisions
                .get(token)
                .ok_or_else(|| CoreError::not_found(format!("revision '{token}'")))?
                .to_string()
        };
        let restored = SourceDocument::parse(&payload)?;
        let (_, resource_version) = self.load().await?;
        self.store(&restored, resource_version.as_deref()).await
    }

    async fn ping(&self) -> Result<(), CoreError> {
        self.client
            .get_configmap(&self.namespace, &self.object_name)
            .await
            .map(|_| ())
    }
}
