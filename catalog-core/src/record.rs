//! The entity model produced by source providers.
//!
//! A [`Record`] is one asset as ingested from a source. The core treats the
//! payload as opaque: well-known scalar fields live in `properties`, anything
//! else in `custom_properties`. Records are replaced wholesale on each
//! successful refresh of their owning source; user-applied mutations live in
//! overlay records instead (see [`crate::overlay`]).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A typed scalar property value.
///
/// The order of the variants matters for untagged deserialization: booleans
/// and integers must be tried before doubles and strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl PropertyValue {
    /// Renders the value for comparison in filter queries.
    pub fn as_json(&self) -> serde_json::Value {
        match self {
            PropertyValue::Bool(b) => serde_json::Value::Bool(*b),
            PropertyValue::Int(i) => serde_json::Value::from(*i),
            PropertyValue::Double(d) => serde_json::Value::from(*d),
            PropertyValue::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

/// One asset as produced by a source provider.
///
/// `name` is stable and unique within its plugin and entity kind and doubles
/// as the entity UID for overlay and governance keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default)]
    pub create_time_since_epoch: i64,
    #[serde(default)]
    pub last_update_time_since_epoch: i64,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    #[serde(default)]
    pub custom_properties: BTreeMap<String, serde_json::Value>,
}

impl Record {
    pub fn new(name: impl Into<String>) -> Self {
        Record {
            name: name.into(),
            external_id: None,
            create_time_since_epoch: 0,
            last_update_time_since_epoch: 0,
            properties: BTreeMap::new(),
            custom_properties: BTreeMap::new(),
        }
    }

    /// Looks up a scalar field for filtering: the mandatory fields first,
    /// then `properties`, then `custom_properties`.
    pub fn field(&self, name: &str) -> Option<serde_json::Value> {
        match name {
            "name" => Some(serde_json::Value::String(self.name.clone())),
            "externalId" => self
                .external_id
                .clone()
                .map(serde_json::Value::String),
            "createTimeSinceEpoch" => Some(serde_json::Value::from(self.create_time_since_epoch)),
            "lastUpdateTimeSinceEpoch" => {
                Some(serde_json::Value::from(self.last_update_time_since_epoch))
            }
            _ => self
                .properties
                .get(name)
                .map(PropertyValue::as_json)
                .or_else(|| self.custom_properties.get(name).cloned()),
        }
    }
}

/// Where a served record came from, attached at read time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub source_id: String,
    pub source_type: String,
    /// Monotone per-source refresh counter.
    pub revision: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}
