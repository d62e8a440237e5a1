//! Resolution of secret references in source properties.
//!
//! Source properties may contain objects of the form
//! `{"secretRef": {"name": "...", "key": "...", "namespace": "..."}}`.
//! Before properties reach a provider the whole tree is walked and every
//! reference replaced with its materialised value. A missing secret is a
//! hard error at plugin init and a logged warning during hot reload.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// An opaque reference to a secret value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    pub name: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Materialises secret references.
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, secret: &SecretRef) -> Result<String, CoreError>;
}

/// Resolves `{name, key}` to the environment variable `NAME_KEY`
/// (uppercased, `-` mapped to `_`).
#[derive(Debug, Default)]
pub struct EnvSecretResolver;

impl SecretResolver for EnvSecretResolver {
    fn resolve(&self, secret: &SecretRef) -> Result<String, CoreError> {
        let var = format!("{}_{}", secret.name, secret.key)
            .to_uppercase()
            .replace('-', "_");
        std::env::var(&var).map_err(|_| CoreError::SecretMissing {
            name: secret.name.clone(),
            key: secret.key.clone(),
        })
    }
}

/// Resolves `{name, key}` to the file `<dir>/<name>/<key>`, the layout of a
/// mounted cluster secret volume.
#[derive(Debug)]
pub struct MountedSecretResolver {
    dir: PathBuf,
}

impl MountedSecretResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        MountedSecretResolver { dir: dir.into() }
    }
}

impl SecretResolver for MountedSecretResolver {
    fn resolve(&self, secret: &SecretRef) -> Result<String, CoreError> {
        let path = self.dir.join(&secret.name).join(&secret.key);
        std::fs::read_to_string(&path)
            .map(|s| s.trim_end_matches('\n').to_string())
            .map_err(|_| CoreError::SecretMissing {
                name: secret.name.clone(),
                key: secret.key.clone(),
            })
    }
}

fn as_secret_ref(value: &serde_json::Value) -> Option<SecretRef> {
    let obj = value.as_object()?;
    if obj.len() != 1 {
        return None;
    }
    serde_json::from_value(obj.get("secretRef")?.clone()).ok()
}

fn resolve_value(
    value: &mut serde_json::Value,
    resolver: &dyn SecretResolver,
) -> Result<(), CoreError> {
    if let Some(secret) = as_secret_ref(value) {
        *value = serde_json::Value::String(resolver.resolve(&secret)?);
        return Ok(());
    }
    match value {
        serde_json::Value::Object(map) => {
            for v in map.values_mut() {
                resolve_value(v, resolver)?;
            }
        }
        serde_json::Value::Array(items) => {
            for v in items.iter_mut() {
                resolve_value(v, resolver)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Walks a property map and substitutes every secret reference in place.
pub fn resolve_properties(
    properties: &mut BTreeMap<String, serde_json::Value>,
    resolver: &dyn SecretResolver,
) -> Result<(), CoreError> {
    for value in properties.values_mut() {
        resolve_value(value, resolver)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedResolver;

    impl SecretResolver for FixedResolver {
        fn resolve(&self, secret: &SecretRef) -> Result<String, CoreError> {
            if secret.name == "hf" && secret.key == "token" {
                Ok("tok-123".into())
            } else {
                Err(CoreError::SecretMissing {
                    name: secret.name.clone(),
                    key: secret.key.clone(),
                })
            }
        }
    }

    #[test]
    fn substitutes_nested_refs() {
        let mut props: BTreeMap<String, serde_json::Value> = BTreeMap::new();
        props.insert("url".into(), json!("https://example.com"));
        props.insert(
            "auth".into(),
            json!({"headers": {"token": {"secretRef": {"name": "hf", "key": "token"}}}}),
        );
        resolve_properties(&mut props, &FixedResolver).unwrap();
        assert_eq!(props["auth"]["headers"]["token"], json!("tok-123"));
        assert_eq!(props["url"], json!("https://example.com"));
    }

    #[test]
    fn missing_secret_is_an_error() {
        let mut props: BTreeMap<String, serde_json::Value> = BTreeMap::new();
        props.insert(
            "token".into(),
            json!({"secretRef": {"name": "nope", "key": "k"}}),
        );
        let err = resolve_properties(&mut props, &FixedResolver).unwrap_err();
        assert!(matches!(err, CoreError::SecretMissing { .. }));
    }

    #[test]
    fn mounted_resolver_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("hf")).unwrap();
        std::fs::write(dir.path().join("hf/token"), "tok-9\n").unwrap();
        let resolver = MountedSecretResolver::new(dir.path());
        let value = resolver
            .resolve(&SecretRef {
                name: "hf".into(),
                key: "token".into(),
                namespace: None,
            })
            .unwrap();
        assert_eq!(value, "tok-9");
    }
}
