use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PermissionLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceType {
    #[default]
    None,
    GithubUser,
    GithubOrg,
    GitlabGroup,
}

impl NamespaceType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::GithubUser => "github_user",
            Self::GithubOrg => "github_org",
            Self::GitlabGroup => "gitlab_group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "github_user" => Some(Self::GithubUser),
            "github_org" => Some(Self::GithubOrg),
            "gitlab_group" => Some(Self::GitlabGroup),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub namespace_type: NamespaceType,
    pub created_at: DateTime<Utc>,
}

/// Git source settings of a module-provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_provider_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clone_url_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browse_url_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url_template: Option<String>,
    pub tag_format: String,
    pub path: String,
    pub archive_git_path: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            git_provider_id: None,
            clone_url_template: None,
            browse_url_template: None,
            base_url_template: None,
            tag_format: "{version}".to_string(),
            path: String::new(),
            archive_git_path: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleProvider {
    pub id: i64,
    pub namespace_id: i64,
    pub namespace: String,
    pub module: String,
    pub provider: String,
    pub verified: bool,
    pub git: GitConfig,
    pub created_at: DateTime<Utc>,
}

impl ModuleProvider {
    /// `namespace/module/provider`
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}/{}/{}", self.namespace, self.module, self.provider)
    }
}

/// Fields needed to create a module-provider.
#[derive(Debug, Clone)]
pub struct NewModuleProvider {
    pub namespace_id: i64,
    pub module: String,
    pub provider: String,
    pub verified: bool,
    pub git: GitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleVersion {
    pub id: i64,
    pub module_provider_id: i64,
    pub version: String,
    pub beta: bool,
    pub published: bool,
    pub internal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub extraction_version: i64,
    pub details_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_ext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_size: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl ModuleVersion {
    /// Visible over the unauthenticated registry protocol.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.published && !self.beta
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmoduleKind {
    Submodule,
    Example,
}

impl SubmoduleKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submodule => "submodule",
            Self::Example => "example",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submodule" => Some(Self::Submodule),
            "example" => Some(Self::Example),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submodule {
    pub id: i64,
    pub module_version_id: i64,
    pub kind: SubmoduleKind,
    pub path: String,
    pub details_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleProviderRedirect {
    pub id: i64,
    pub namespace: String,
    pub module: String,
    pub provider: String,
    pub module_provider_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitProvider {
    pub id: i64,
    pub name: String,
    pub base_url_template: String,
    pub clone_url_template: String,
    pub browse_url_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: i64,
    pub namespace_id: i64,
    pub namespace: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderVersion {
    pub id: i64,
    pub provider_id: i64,
    pub version: String,
    pub protocols: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpg_key_id: Option<i64>,
    pub shasums_url: String,
    pub shasums_signature_url: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderBinary {
    pub id: i64,
    pub provider_version_id: i64,
    pub os: String,
    pub arch: String,
    pub filename: String,
    pub download_url: String,
    pub shasum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProviderBinary {
    pub os: String,
    pub arch: String,
    pub filename: String,
    pub download_url: String,
    pub shasum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpgKey {
    pub id: i64,
    pub namespace_id: i64,
    pub key_id: String,
    pub ascii_armor: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only record of a module download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadEvent {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_provider_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_version_id: Option<i64>,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analytics_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_principal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terraform_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub tombstoned: bool,
}

#[derive(Debug, Clone)]
pub struct NewDownloadEvent {
    pub module_provider_id: i64,
    pub module_version_id: i64,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub analytics_token: Option<String>,
    pub auth_principal: Option<String>,
    pub terraform_version: Option<String>,
    pub environment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserGroup {
    pub id: i64,
    pub name: String,
    pub site_admin: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespacePermission {
    pub user_group_id: i64,
    pub user_group: String,
    pub namespace_id: i64,
    pub namespace: String,
    pub level: PermissionLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    AdminApiKey,
    Oidc,
    Saml,
    GithubOauth,
}

impl AuthMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AdminApiKey => "admin_api_key",
            Self::Oidc => "oidc",
            Self::Saml => "saml",
            Self::GithubOauth => "github_oauth",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin_api_key" => Some(Self::AdminApiKey),
            "oidc" => Some(Self::Oidc),
            "saml" => Some(Self::Saml),
            "github_oauth" => Some(Self::GithubOauth),
            _ => None,
        }
    }
}

/// Server-side session. The cookie only carries `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub external_id: String,
    pub auth_method: AuthMethod,
    pub user_groups: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub principal: String,
    pub action: String,
    pub object_type: String,
    pub object_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
}
