//! Overlay records: user-applied mutations kept aside from source data.
//!
//! Refresh semantics are "source of truth wins for everything the source
//! defines". Tags, annotations, labels and the lifecycle phase applied
//! through actions therefore live in a separate overlay table keyed by
//! `(plugin, kind, uid)` and are merged back at read time. Overlays are
//! created lazily on the first mutating action and survive refreshes.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Key of one overlay record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OverlayKey {
    pub plugin: String,
    pub kind: String,
    pub uid: String,
}

impl OverlayKey {
    pub fn new(
        plugin: impl Into<String>,
        kind: impl Into<String>,
        uid: impl Into<String>,
    ) -> Self {
        OverlayKey {
            plugin: plugin.into(),
            kind: kind.into(),
            uid: uid.into(),
        }
    }
}

/// The whitelisted overlay fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayRecord {
    /// Ordered, deduplicated. `tag` replaces this list wholesale.
    #[serde(default)]
    pub tags: Vec<String>,
    /// `annotate` merges into this map.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle_phase: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for OverlayRecord {
    fn default() -> Self {
        OverlayRecord {
            tags: Vec::new(),
            annotations: BTreeMap::new(),
            labels: BTreeSet::new(),
            lifecycle_phase: None,
            updated_at: Utc::now(),
        }
    }
}

impl OverlayRecord {
    /// Replaces the tag list, deduplicating while preserving first-seen order.
    pub fn set_tags(&mut self, tags: Vec<String>) {
        let mut seen = BTreeSet::new();
        self.tags = tags
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();
        self.updated_at = Utc::now();
    }

    pub fn merge_annotations(&mut self, annotations: BTreeMap<String, String>) {
        self.annotations.extend(annotations);
        self.updated_at = Utc::now();
    }

    pub fn set_lifecycle_phase(&mut self, phase: impl Into<String>) {
        self.lifecycle_phase = Some(phase.into());
        self.updated_at = Utc::now();
    }

    /// Merges the overlay into a serialized entity. Only the whitelisted
    /// fields are written; upstream keys keep their values unless the
    /// overlay carries a replacement.
    pub fn merge_into(&self, entity: &mut serde_json::Value) {
        let Some(obj) = entity.as_object_mut() else {
            return;
        };
        obj.insert("tags".into(), serde_json::json!(self.tags));
        let mut annotations: BTreeMap<String, String> = obj
            .get("annotations")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        annotations.extend(self.annotations.clone());
        obj.insert("annotations".into(), serde_json::json!(annotations));
        if !self.labels.is_empty() {
            obj.insert("labels".into(), serde_json::json!(self.labels));
        }
        if let Some(phase) = &self.lifecycle_phase {
            obj.insert("lifecyclePhase".into(), serde_json::json!(phase));
        }
    }
}

/// Thread-safe overlay table with per-key write serialization.
///
/// Writers for the same key queue on the key's mutex; readers see the
/// last-committed record.
#[derive(Default)]
pub struct OverlayStore {
    records: DashMap<OverlayKey, Arc<Mutex<OverlayRecord>>>,
}

impl OverlayStore {
    pub fn new() -> Self {
        OverlayStore::default()
    }

    fn entry(&self, key: &OverlayKey) -> Arc<Mutex<OverlayRecord>> {
        self.records
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(OverlayRecord::default())))
            .clone()
    }

    /// Applies a mutation under the key's lock, creating the record lazily.
    pub async fn mutate<F, T>(&self, key: &OverlayKey, f: F) -> T
    where
        F: FnOnce(&mut OverlayRecord) -> T,
    {
        let entry = self.entry(key);
        let mut record = entry.lock().await;
        f(&mut record)
    }

    /// Snapshot of the committed overlay, if one exists.
    pub async fn get(&self, key: &OverlayKey) -> Option<OverlayRecord> {
        let entry = self.records.get(key)?.clone();
        let record = entry.lock().await;
        Some(record.clone())
    }

    pub async fn remove(&self, key: &OverlayKey) {
        self.records.remove(key);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
