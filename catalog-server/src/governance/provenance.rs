//! Record provenance and the verifying extractor.
//!
//! Every served record carries `{sourceId, sourceType, revision}`. On top
//! of that, a source may opt into integrity verification: with
//! `verifyIntegrity: true` and a `pinnedDigests` map in its properties,
//! each fetched record's content hash is checked against the pinned value
//! and the whole refresh is rejected on a mismatch. Off by default.

use catalog_core::error::CoreError;
use catalog_core::record::Record;
use catalog_core::source::SourceConfig;
use sha2::{Digest, Sha256};

/// Property enabling the verifying extractor on a source.
pub const PROP_VERIFY_INTEGRITY: &str = "verifyIntegrity";
/// Property holding `{recordName: hexDigest}` pins.
pub const PROP_PINNED_DIGESTS: &str = "pinnedDigests";
/// Custom-property key the computed hash is stored under.
pub const INTEGRITY_KEY: &str = "integritySha256";

/// Sha-256 over the record's canonical JSON, with any previously computed
/// hash excluded so the digest is stable across refreshes.
pub fn record_digest(record: &Record) -> String {
    let mut clean = record.clone();
    clean.custom_properties.remove(INTEGRITY_KEY);
    let rendered = serde_json::to_string(&clean).unwrap_or_default();
    let digest = Sha256::digest(rendered.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Wraps a fetch result: annotates every record with its content hash and,
/// when the source pins digests, rejects records whose hash does not match.
pub fn verify_records(
    cfg: &SourceConfig,
    records: Vec<Record>,
) -> Result<Vec<Record>, CoreError> {
    let verify = cfg
        .properties
        .get(PROP_VERIFY_INTEGRITY)
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let pins = cfg
        .properties
        .get(PROP_PINNED_DIGESTS)
        .and_then(|v| v.as_object());

    let mut out = Vec::with_capacity(records.len());
    for mut record in records {
        let digest = record_digest(&record);
        if verify {
            let pinned = pins
                .and_then(|p| p.get(&record.name))
                .and_then(|v| v.as_str());
            match pinned {
                Some(pin) if pin == digest => {}
                Some(pin) => {
                    return Err(CoreError::source(format!(
                        "integrity mismatch for '{}': pinned {pin}, computed {digest}",
                        record.name
                    )));
                }
                None => {
                    return Err(CoreError::source(format!(
                        "no pinned digest for '{}' on verifying source '{}'",
                        record.name, cfg.id
                    )));
                }
            }
        }
        record
            .custom_properties
            .insert(INTEGRITY_KEY.into(), serde_json::json!(digest));
        out.push(record);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn source(props: serde_json::Value) -> SourceConfig {
        SourceConfig {
            id: "s1".into(),
            name: "s1".into(),
            source_type: "yaml".into(),
            enabled: true,
            labels: BTreeSet::new(),
            properties: serde_json::from_value(props).unwrap(),
            origin: None,
        }
    }

    #[test]
    fn digest_ignores_previous_hash() {
        let mut record = Record::new("a");
        let first = record_digest(&record);
        record
            .custom_properties
            .insert(INTEGRITY_KEY.into(), serde_json::json!(first.clone()));
        assert_eq!(record_digest(&record), first);
    }

    #[test]
    fn unverified_sources_only_annotate() {
        let records = verify_records(&source(serde_json::json!({})), vec![Record::new("a")]).unwrap();
        assert!(records[0].custom_properties.contains_key(INTEGRITY_KEY));
    }

    #[test]
    fn pinned_mismatch_rejects_the_refresh() {
        let record = Record::new("a");
        let digest = record_digest(&record);

        let good = source(serde_json::json!({
            PROP_VERIFY_INTEGRITY: true,
            PROP_PINNED_DIGESTS: {"a": digest},
        }));
        assert!(verify_records(&good, vec![record.clone()]).is_ok());

        let bad = source(serde_json::json!({
            PROP_VERIFY_INTEGRITY: true,
            PROP_PINNED_DIGESTS: {"a": "deadbeef"},
        }));
        assert!(verify_records(&bad, vec![record.clone()]).is_err());

        let unpinned = source(serde_json::json!({PROP_VERIFY_INTEGRITY: true}));
        assert!(verify_records(&unpinned, vec![record]).is_err());
    }
}
