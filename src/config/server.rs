use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const ENV_PREFIX: &str = "TERRAREG_";
const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    #[default]
    Local,
    S3,
}

/// Whether the registry stores and serves module archives itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleHosting {
    #[default]
    Allow,
    /// Only hosted archives are served; git sources are never handed out.
    Enforce,
    /// Uploads are refused and downloads point at the git source.
    Disallow,
}

/// Where the catalog lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    Memory,
    File(PathBuf),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_host: String,
    pub listen_port: u16,
    /// Public base URL (e.g. "https://registry.example.com"). Used when building
    /// absolute URLs for provider binaries. Relative URLs are used when unset.
    pub public_url: Option<String>,
    pub database_url: String,

    pub storage_backend: StorageBackendKind,
    pub storage_root: PathBuf,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_prefix: Option<String>,
    pub s3_access_key_id: Option<String>,
    pub s3_secret_access_key: Option<String>,
    pub s3_force_path_style: bool,

    pub allow_module_hosting: ModuleHosting,
    pub auto_publish_module_versions: bool,

    pub admin_authentication_token: Option<String>,
    pub upload_api_keys: Vec<String>,
    pub analytics_auth_keys: Vec<String>,
    pub allow_unauthenticated_access: bool,
    pub session_secret: Option<String>,
    pub session_ttl: u64,

    // Consumed by the external login collaborators.
    pub oidc_client_id: Option<String>,
    pub oidc_client_secret: Option<String>,
    pub oidc_issuer: Option<String>,
    pub saml_entity_id: Option<String>,
    pub saml_idp_metadata_url: Option<String>,
    pub github_client_id: Option<String>,
    pub github_client_secret: Option<String>,
    pub github_url: Option<String>,

    pub trusted_namespaces: Vec<String>,
    pub verified_module_namespaces: Vec<String>,
    pub analytics_token_phase_ii_required: bool,

    pub max_upload_size: u64,
    pub max_webhook_body_size: u64,
    pub max_extracted_file_size: u64,
    pub max_extracted_total_size: u64,

    pub request_timeout_secs: u64,
    pub import_lock_timeout_secs: u64,
    pub git_clone_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: 5000,
            public_url: None,
            database_url: "sqlite://./data/terrareg.db".to_string(),
            storage_backend: StorageBackendKind::Local,
            storage_root: PathBuf::from("./data/storage"),
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            s3_prefix: None,
            s3_access_key_id: None,
            s3_secret_access_key: None,
            s3_force_path_style: false,
            allow_module_hosting: ModuleHosting::Allow,
            auto_publish_module_versions: false,
            admin_authentication_token: None,
            upload_api_keys: Vec::new(),
            analytics_auth_keys: Vec::new(),
            allow_unauthenticated_access: true,
            session_secret: None,
            session_ttl: 3600,
            oidc_client_id: None,
            oidc_client_secret: None,
            oidc_issuer: None,
            saml_entity_id: None,
            saml_idp_metadata_url: None,
            github_client_id: None,
            github_client_secret: None,
            github_url: None,
            trusted_namespaces: Vec::new(),
            verified_module_namespaces: Vec::new(),
            analytics_token_phase_ii_required: false,
            max_upload_size: 100 * MIB,
            max_webhook_body_size: MIB,
            max_extracted_file_size: 50 * MIB,
            max_extracted_total_size: 500 * MIB,
            request_timeout_secs: 60,
            import_lock_timeout_secs: 300,
            git_clone_timeout_secs: 300,
        }
    }
}

impl ServerConfig {
    /// Builds the configuration from defaults, an optional TOML file and
    /// `TERRAREG_*` environment variables, in that order of precedence.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("failed to read {}: {e}", path.display()))
                })?;
                Self::from_toml_str(&content)?
            }
            None => Self::default(),
        };

        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("invalid config file: {e}")))
    }

    /// Applies `TERRAREG_<KEY>` overrides. Unknown variables are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            self.set(&key.to_ascii_lowercase(), &value)?;
        }
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "listen_host" => self.listen_host = value.to_string(),
            "listen_port" => self.listen_port = parse_value(key, value)?,
            "public_url" => self.public_url = non_empty(value),
            "database_url" => self.database_url = value.to_string(),
            "storage_backend" => {
                self.storage_backend = match value.to_ascii_lowercase().as_str() {
                    "local" => StorageBackendKind::Local,
                    "s3" => StorageBackendKind::S3,
                    other => {
                        return Err(Error::Config(format!("unknown storage_backend: {other}")));
                    }
                }
            }
            "storage_root" => self.storage_root = PathBuf::from(value),
            "s3_bucket" => self.s3_bucket = non_empty(value),
            "s3_region" => self.s3_region = non_empty(value),
            "s3_endpoint" => self.s3_endpoint = non_empty(value),
            "s3_prefix" => self.s3_prefix = non_empty(value),
            "s3_access_key_id" => self.s3_access_key_id = non_empty(value),
            "s3_secret_access_key" => self.s3_secret_access_key = non_empty(value),
            "s3_force_path_style" => self.s3_force_path_style = parse_bool(key, value)?,
            "allow_module_hosting" => {
                self.allow_module_hosting = match value.to_ascii_lowercase().as_str() {
                    "allow" => ModuleHosting::Allow,
                    "enforce" => ModuleHosting::Enforce,
                    "disallow" => ModuleHosting::Disallow,
                    other => {
                        return Err(Error::Config(format!(
                            "unknown allow_module_hosting: {other}"
                        )));
                    }
                }
            }
            "auto_publish_module_versions" => {
                self.auto_publish_module_versions = parse_bool(key, value)?;
            }
            "admin_authentication_token" => self.admin_authentication_token = non_empty(value),
            "upload_api_keys" => self.upload_api_keys = parse_list(value),
            "analytics_auth_keys" => self.analytics_auth_keys = parse_list(value),
            "allow_unauthenticated_access" => {
                self.allow_unauthenticated_access = parse_bool(key, value)?;
            }
            "session_secret" => self.session_secret = non_empty(value),
            "session_ttl" => self.session_ttl = parse_value(key, value)?,
            "oidc_client_id" => self.oidc_client_id = non_empty(value),
            "oidc_client_secret" => self.oidc_client_secret = non_empty(value),
            "oidc_issuer" => self.oidc_issuer = non_empty(value),
            "saml_entity_id" => self.saml_entity_id = non_empty(value),
            "saml_idp_metadata_url" => self.saml_idp_metadata_url = non_empty(value),
            "github_client_id" => self.github_client_id = non_empty(value),
            "github_client_secret" => self.github_client_secret = non_empty(value),
            "github_url" => self.github_url = non_empty(value),
            "trusted_namespaces" => self.trusted_namespaces = parse_list(value),
            "verified_module_namespaces" => self.verified_module_namespaces = parse_list(value),
            "analytics_token_phase_ii_required" => {
                self.analytics_token_phase_ii_required = parse_bool(key, value)?;
            }
            "max_upload_size" => self.max_upload_size = parse_value(key, value)?,
            "max_webhook_body_size" => self.max_webhook_body_size = parse_value(key, value)?,
            "max_extracted_file_size" => self.max_extracted_file_size = parse_value(key, value)?,
            "max_extracted_total_size" => {
                self.max_extracted_total_size = parse_value(key, value)?;
            }
            "request_timeout_secs" => self.request_timeout_secs = parse_value(key, value)?,
            "import_lock_timeout_secs" => self.import_lock_timeout_secs = parse_value(key, value)?,
            "git_clone_timeout_secs" => self.git_clone_timeout_secs = parse_value(key, value)?,
            "config" => {}
            _ => tracing::debug!("Ignoring unknown configuration variable {ENV_PREFIX}{key}"),
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        self.database_location()?;

        if self.storage_backend == StorageBackendKind::S3 && self.s3_bucket.is_none() {
            return Err(Error::Config(
                "storage_backend = \"s3\" requires s3_bucket".to_string(),
            ));
        }

        for (name, value) in [
            ("max_upload_size", self.max_upload_size),
            ("max_webhook_body_size", self.max_webhook_body_size),
            ("max_extracted_file_size", self.max_extracted_file_size),
            ("max_extracted_total_size", self.max_extracted_total_size),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }

        for entry in &self.analytics_auth_keys {
            if !entry.contains(':') {
                return Err(Error::Config(format!(
                    "analytics_auth_keys entries must be key:environment, got '{entry}'"
                )));
            }
        }

        if self.session_secret.is_none() {
            tracing::warn!("session_secret is not set; sessions will not survive a restart");
            self.session_secret = Some(crate::auth::random_secret());
        }

        if let Some(url) = &self.public_url {
            self.public_url = Some(url.trim_end_matches('/').to_string());
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.listen_host, self.listen_port).parse()
    }

    pub fn database_location(&self) -> Result<DatabaseLocation> {
        let url = self.database_url.trim();
        if url == ":memory:" || url == "sqlite://:memory:" {
            return Ok(DatabaseLocation::Memory);
        }
        if let Some(path) = url.strip_prefix("sqlite://") {
            return Ok(DatabaseLocation::File(PathBuf::from(path)));
        }
        if url.contains("://") {
            return Err(Error::Config(format!(
                "unsupported database_url '{url}': only sqlite:// is supported"
            )));
        }
        Ok(DatabaseLocation::File(PathBuf::from(url)))
    }

    /// Environment attributed to downloads authenticated with this key.
    #[must_use]
    pub fn analytics_auth_environment(&self, key: &str) -> Option<&str> {
        self.analytics_auth_keys.iter().find_map(|entry| {
            let (candidate, environment) = entry.split_once(':')?;
            (candidate == key).then_some(environment)
        })
    }

    #[must_use]
    pub fn is_verified_namespace(&self, namespace: &str) -> bool {
        self.verified_module_namespaces.iter().any(|n| n == namespace)
    }

    #[must_use]
    pub fn is_trusted_namespace(&self, namespace: &str) -> bool {
        self.trusted_namespaces.iter().any(|n| n == namespace)
    }

    /// Prefixes a path with `public_url` when one is configured.
    #[must_use]
    pub fn absolute_url(&self, path: &str) -> String {
        match &self.public_url {
            Some(base) => format!("{base}{path}"),
            None => path.to_string(),
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn import_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.import_lock_timeout_secs)
    }

    #[must_use]
    pub fn git_clone_timeout(&self) -> Duration {
        Duration::from_secs(self.git_clone_timeout_secs)
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("{key}: expected a boolean, got '{other}'"))),
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key}: invalid value '{value}'")))
}
