//! The append-only audit log.
//!
//! Every governance mutation and every effective (non-dry-run) action
//! appends one event. Events are never mutated; the retention worker is the
//! sole deleter. Ids are monotone within one process; cross-process
//! ordering is by `occurredAt` with the id as tiebreaker.

use catalog_core::error::CoreError;
use catalog_core::pagination::{paginate, Page};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: u64,
    pub occurred_at: DateTime<Utc>,
    pub plugin: String,
    pub kind: String,
    pub name: String,
    pub actor: String,
    pub action: String,
    pub outcome: String,
    pub payload_hash: String,
}

/// Sha-256 of the canonical JSON payload, recorded instead of the payload
/// itself so the log stays small and free of secrets.
pub fn payload_hash(payload: &serde_json::Value) -> String {
    let rendered = serde_json::to_string(payload).unwrap_or_default();
    let digest = Sha256::digest(rendered.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// A new event before the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub plugin: String,
    pub kind: String,
    pub name: String,
    pub actor: String,
    pub action: String,
    pub outcome: String,
    pub payload: serde_json::Value,
}

#[async_trait::async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, event: NewAuditEvent) -> Result<AuditEvent, CoreError>;

    /// Paginated history for one asset, newest first.
    async fn list_for_asset(
        &self,
        plugin: &str,
        kind: &str,
        name: &str,
        page_size: Option<usize>,
        page_token: Option<&str>,
    ) -> Result<Page<AuditEvent>, CoreError>;

    /// The global stream, newest first.
    async fn list_all(
        &self,
        page_size: Option<usize>,
        page_token: Option<&str>,
    ) -> Result<Page<AuditEvent>, CoreError>;

    /// Deletes events older than the cutoff; returns how many went away.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, CoreError>;

    async fn count(&self) -> usize;
}

/// The bundled in-process store behind `DATABASE_TYPE=embedded`.
#[derive(Default)]
pub struct MemoryAuditStore {
    events: RwLock<Vec<AuditEvent>>,
    next_id: AtomicU64,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        MemoryAuditStore::default()
    }
}

#[async_trait::async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, event: NewAuditEvent) -> Result<AuditEvent, CoreError> {
        let stored = AuditEvent {
            id: self.next_id.fetch_add(1, Ordering::AcqRel) + 1,
            occurred_at: Utc::now(),
            plugin: event.plugin,
            kind: event.kind,
            name: event.name,
            actor: event.actor,
            action: event.action,
            outcome: event.outcome,
            payload_hash: payload_hash(&event.payload),
        };
        self.events.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn list_for_asset(
        &self,
        plugin: &str,
        kind: &str,
        name: &str,
        page_size: Option<usize>,
        page_token: Option<&str>,
    ) -> Result<Page<AuditEvent>, CoreError> {
        let events = self.events.read().await;
        let mut matched: Vec<AuditEvent> = events
            .iter()
            .filter(|e| e.plugin == plugin && e.kind == kind && e.name == name)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then(b.id.cmp(&a.id)));
        paginate(matched, page_size, page_token)
    }

    async fn list_all(
        &self,
        page_size: Option<usize>,
        page_token: Option<&str>,
    ) -> Result<Page<AuditEvent>, CoreError> {
        let events = self.events.read().await;
        let mut all: Vec<AuditEvent> = events.iter().cloned().collect();
        all.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then(b.id.cmp(&a.id)));
        paginate(all, page_size, page_token)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, CoreError> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|e| e.occurred_at >= cutoff);
        Ok(before - events.len())
    }

    async fn count(&self) -> usize {
        self.events.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, action: &str) -> NewAuditEvent {
        NewAuditEvent {
            plugin: "mcp".into(),
            kind: "McpServer".into(),
            name: name.into(),
            actor: "tester".into(),
            action: action.into(),
            outcome: "completed".into(),
            payload: serde_json::json!({"x": 1}),
        }
    }

    #[tokio::test]
    async fn ids_are_monotone() {
        let store = MemoryAuditStore::new();
        let a = store.append(event("a", "tag")).await.unwrap();
        let b = store.append(event("a", "annotate")).await.unwrap();
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn per_asset_history_is_isolated() {
        let store = MemoryAuditStore::new();
        store.append(event("a", "tag")).await.unwrap();
        store.append(event("b", "tag")).await.unwrap();
        let page = store
            .list_for_asset("mcp", "McpServer", "a", None, None)
            .await
            .unwrap();
        assert_eq!(page.size, 1);
        assert_eq!(page.items[0].name, "a");
    }

    #[tokio::test]
    async fn retention_deletes_only_old_events() {
        let store = MemoryAuditStore::new();
        store.append(event("a", "tag")).await.unwrap();
        let removed = store
            .delete_older_than(Utc::now() - chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert_eq!(store.count().await, 1);

        let removed = store
            .delete_older_than(Utc::now() + chrono::Duration::seconds(5))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count().await, 0);
    }

    #[test]
    fn payload_hash_is_stable() {
        let a = payload_hash(&serde_json::json!({"tags": ["x"]}));
        let b = payload_hash(&serde_json::json!({"tags": ["x"]}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
