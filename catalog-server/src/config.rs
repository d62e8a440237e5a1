//! Server settings.
//!
//! Settings load from a TOML file, then environment variables override the
//! documented knobs (`CATALOG_*`, `DATABASE_*`). Durations parse from
//! `"30s"`-style strings. `Settings::validate` runs before the server is
//! built; a failure there is a fatal init error and exits non-zero.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! timeout = "30s"
//!
//! [config_store]
//! mode = "file"                # file | k8s | none
//! path = "sources.yaml"
//!
//! [auth]
//! mode = "header"              # header | jwt
//! operator_role = "operator"
//!
//! [tenancy]
//! mode = "single"              # single | namespace
//!
//! [governance]
//! config_path = "governance.yaml"
//! policies_path = "policies.yaml"
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Parses `500ms`, `30s`, `5m`, `2h` style durations.
pub fn parse_duration(raw: &str) -> anyhow::Result<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        anyhow::bail!("empty duration");
    }
    let (value, unit) = raw.split_at(raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len()));
    let value: u64 = value.parse().map_err(|_| anyhow::anyhow!("bad duration '{raw}'"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => anyhow::bail!("bad duration '{raw}'"),
    }
}

mod duration_string {
    use super::parse_duration;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{}s", d.as_secs()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    #[serde(with = "duration_string")]
    pub timeout: Duration,
    /// Grace period for in-flight requests on shutdown.
    #[serde(with = "duration_string")]
    pub shutdown_grace: Duration,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            host: "127.0.0.1".into(),
            port: 8080,
            timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(30),
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigStoreMode {
    File,
    K8s,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigStoreSettings {
    pub mode: ConfigStoreMode,
    /// Path of the `sources.yaml` document (file mode); in `none` mode it
    /// seeds the in-memory store when present.
    pub path: String,
    /// Cluster object name and data key (k8s mode).
    pub object_name: String,
    pub object_key: String,
    pub namespace: String,
    /// Revisions kept for rollback.
    pub revision_ring: usize,
}

impl Default for ConfigStoreSettings {
    fn default() -> Self {
        ConfigStoreSettings {
            mode: ConfigStoreMode::File,
            path: "sources.yaml".into(),
            object_name: "catalog-sources".into(),
            object_key: "sources.yaml".into(),
            namespace: "default".into(),
            revision_ring: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Header,
    Jwt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub mode: AuthMode,
    /// Header carrying the caller's role in header mode.
    pub role_header: String,
    /// Header carrying the caller's identity, used for audit attribution.
    pub principal_header: String,
    /// Role value that grants operator rights.
    pub operator_role: String,
    /// HS256 shared secret; ignored when a public key is configured.
    pub jwt_secret: Option<String>,
    /// Path of an RS256 public key PEM.
    pub jwt_public_key_path: Option<String>,
    pub jwt_issuer: Option<String>,
    pub jwt_audience: Option<String>,
    /// Claim holding the role value.
    pub jwt_role_claim: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        AuthSettings {
            mode: AuthMode::Header,
            role_header: "X-User-Role".into(),
            principal_header: "X-User-Id".into(),
            operator_role: "operator".into(),
            jwt_secret: None,
            jwt_public_key_path: None,
            jwt_issuer: None,
            jwt_audience: None,
            jwt_role_claim: "role".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenancyMode {
    Single,
    Namespace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthzMode {
    None,
    Sar,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TenancySettings {
    pub mode: TenancyMode,
}

impl Default for TenancySettings {
    fn default() -> Self {
        TenancySettings {
            mode: TenancyMode::Single,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthzSettings {
    pub mode: AuthzMode,
}

impl Default for AuthzSettings {
    fn default() -> Self {
        AuthzSettings {
            mode: AuthzMode::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// `embedded` is the bundled in-process store; other values are carried
    /// opaquely for external backends.
    #[serde(rename = "type")]
    pub db_type: String,
    pub dsn: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            db_type: "embedded".into(),
            dsn: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretResolverMode {
    Env,
    Mounted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretSettings {
    pub mode: SecretResolverMode,
    pub mount_dir: String,
}

impl Default for SecretSettings {
    fn default() -> Self {
        SecretSettings {
            mode: SecretResolverMode::Env,
            mount_dir: "/var/run/secrets/catalog".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceSettings {
    /// Governance config document (environments, trusted sources, audit
    /// retention). Empty means defaults.
    pub config_path: String,
    /// Approval policy document; hot-reloaded on SIGHUP.
    pub policies_path: String,
}

impl Default for GovernanceSettings {
    fn default() -> Self {
        GovernanceSettings {
            config_path: String::new(),
            policies_path: String::new(),
        }
    }
}

/// Top-level server settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: HttpConfig,
    pub config_store: ConfigStoreSettings,
    pub auth: AuthSettings,
    pub tenancy: TenancySettings,
    pub authz: AuthzSettings,
    pub database: DatabaseSettings,
    pub secrets: SecretSettings,
    pub governance: GovernanceSettings,
}

impl Settings {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading settings '{path}': {e}"))?;
        let mut settings: Settings = toml::from_str(&content)?;
        settings.apply_env_overrides()?;
        Ok(settings)
    }

    /// Applies the documented environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(mode) = env::var("CATALOG_CONFIG_STORE_MODE") {
            self.config_store.mode = match mode.as_str() {
                "file" => ConfigStoreMode::File,
                "k8s" => ConfigStoreMode::K8s,
                "none" => ConfigStoreMode::None,
                other => anyhow::bail!("CATALOG_CONFIG_STORE_MODE '{other}' is not one of file|k8s|none"),
            };
        }
        if let Ok(path) = env::var("CATALOG_CONFIG_STORE_PATH") {
            self.config_store.path = path;
        }
        if let Ok(mode) = env::var("CATALOG_AUTH_MODE") {
            self.auth.mode = match mode.as_str() {
                "header" => AuthMode::Header,
                "jwt" => AuthMode::Jwt,
                other => anyhow::bail!("CATALOG_AUTH_MODE '{other}' is not one of header|jwt"),
            };
        }
        if let Ok(mode) = env::var("CATALOG_TENANCY_MODE") {
            self.tenancy.mode = match mode.as_str() {
                "single" => TenancyMode::Single,
                "namespace" => TenancyMode::Namespace,
                other => anyhow::bail!("CATALOG_TENANCY_MODE '{other}' is not one of single|namespace"),
            };
        }
        if let Ok(mode) = env::var("CATALOG_AUTHZ_MODE") {
            self.authz.mode = match mode.as_str() {
                "none" => AuthzMode::None,
                "sar" => AuthzMode::Sar,
                other => anyhow::bail!("CATALOG_AUTHZ_MODE '{other}' is not one of none|sar"),
            };
        }
        if let Ok(path) = env::var("CATALOG_GOVERNANCE_CONFIG") {
            self.governance.config_path = path;
        }
        if let Ok(path) = env::var("CATALOG_GOVERNANCE_POLICIES") {
            self.governance.policies_path = path;
        }
        if let Ok(db_type) = env::var("DATABASE_TYPE") {
            self.database.db_type = db_type;
        }
        if let Ok(dsn) = env::var("DATABASE_DSN") {
            self.database.dsn = dsn;
        }
        if let Ok(host) = env::var("CATALOG_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("CATALOG_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| anyhow::anyhow!("CATALOG_PORT '{port}' is not a port number"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("server.port must not be 0");
        }
        if self.config_store.mode == ConfigStoreMode::File && self.config_store.path.is_empty() {
            anyhow::bail!("config_store.path is required in file mode");
        }
        if self.config_store.revision_ring == 0 {
            anyhow::bail!("config_store.revision_ring must be at least 1");
        }
        if self.auth.mode == AuthMode::Jwt
            && self.auth.jwt_secret.is_none()
            && self.auth.jwt_public_key_path.is_none()
        {
            anyhow::bail!("jwt auth requires auth.jwt_secret or auth.jwt_public_key_path");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_parsing() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("30x").is_err());
        assert!(parse_duration("abc").is_err());
    }

    #[test]
    fn defaults_validate() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn jwt_mode_requires_key_material() {
        let mut settings = Settings::default();
        settings.auth.mode = AuthMode::Jwt;
        assert!(settings.validate().is_err());
        settings.auth.jwt_secret = Some("secret".into());
        assert!(settings.validate().is_ok());
    }

    // One test owns every CATALOG_* variable; parallel test threads share
    // the process environment.
    #[test]
    fn env_overrides_apply_and_reject_unknown_modes() {
        let mut settings = Settings::default();
        env::set_var("CATALOG_TENANCY_MODE", "namespace");
        env::set_var("CATALOG_AUTHZ_MODE", "sar");
        env::set_var("DATABASE_TYPE", "postgres");
        settings.apply_env_overrides().unwrap();
        assert_eq!(settings.tenancy.mode, TenancyMode::Namespace);
        assert_eq!(settings.authz.mode, AuthzMode::Sar);
        assert_eq!(settings.database.db_type, "postgres");

        env::set_var("CATALOG_AUTH_MODE", "mtls");
        assert!(settings.apply_env_overrides().is_err());

        env::remove_var("CATALOG_TENANCY_MODE");
        env::remove_var("CATALOG_AUTHZ_MODE");
        env::remove_var("DATABASE_TYPE");
        env::remove_var("CATALOG_AUTH_MODE");
    }
}
