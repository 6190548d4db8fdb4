use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    ModuleCall, ModuleDetails, Output, ProviderRequirement, Resource, Submodule, Variable,
};

// Registry protocol

#[derive(Debug, Serialize)]
pub struct VersionEntry {
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ModuleVersionList {
    pub versions: Vec<VersionEntry>,
}

#[derive(Debug, Serialize)]
pub struct ModuleVersionsResponse {
    pub modules: Vec<ModuleVersionList>,
}

/// One module-provider at one version, as listed by search.
#[derive(Debug, Serialize)]
pub struct ModuleSummary {
    pub id: String,
    pub owner: String,
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub provider: String,
    pub description: String,
    pub source: String,
    pub published_at: Option<DateTime<Utc>>,
    pub downloads: u64,
    pub verified: bool,
    pub trusted: bool,
}

#[derive(Debug, Serialize)]
pub struct ModuleInterface {
    pub path: String,
    pub readme: String,
    pub empty: bool,
    pub inputs: Vec<Variable>,
    pub outputs: Vec<Output>,
    pub dependencies: Vec<ModuleCall>,
    pub provider_dependencies: Vec<ProviderRequirement>,
    pub resources: Vec<Resource>,
}

impl ModuleInterface {
    #[must_use]
    pub fn new(path: &str, details: ModuleDetails) -> Self {
        let empty = details.variables.is_empty()
            && details.outputs.is_empty()
            && details.resources.is_empty()
            && details.modules_called.is_empty();
        Self {
            path: path.to_string(),
            readme: details.readme_raw.unwrap_or_default(),
            empty,
            inputs: details.variables,
            outputs: details.outputs,
            dependencies: details.modules_called,
            provider_dependencies: details.providers,
            resources: details.resources,
        }
    }
}

/// Module outline: the search summary plus its parsed interface.
#[derive(Debug, Serialize)]
pub struct ModuleOutline {
    #[serde(flatten)]
    pub summary: ModuleSummary,
    pub root: ModuleInterface,
    pub submodules: Vec<ModuleInterface>,
    pub examples: Vec<ModuleInterface>,
    pub providers: Vec<String>,
    pub versions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchMeta {
    pub limit: u32,
    pub current_offset: u32,
    pub offset: u32,
    pub total_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_offset: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub meta: SearchMeta,
    pub modules: Vec<ModuleSummary>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default)]
    pub trusted_namespaces: Option<bool>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadParams {
    #[serde(default)]
    pub archive: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

#[derive(Debug, Serialize)]
pub struct ProviderVersionEntry {
    pub version: String,
    pub protocols: Vec<String>,
    pub platforms: Vec<Platform>,
}

#[derive(Debug, Serialize)]
pub struct ProviderVersionsResponse {
    pub id: String,
    pub versions: Vec<ProviderVersionEntry>,
}

#[derive(Debug, Serialize)]
pub struct GpgPublicKey {
    pub key_id: String,
    pub ascii_armor: String,
}

#[derive(Debug, Serialize)]
pub struct SigningKeys {
    pub gpg_public_keys: Vec<GpgPublicKey>,
}

#[derive(Debug, Serialize)]
pub struct ProviderDownloadResponse {
    pub protocols: Vec<String>,
    pub os: String,
    pub arch: String,
    pub filename: String,
    pub download_url: String,
    pub shasums_url: String,
    pub shasums_signature_url: String,
    pub shasum: String,
    pub signing_keys: SigningKeys,
}

// Terrareg API

#[derive(Debug, Default, Deserialize)]
pub struct PaginationParams {
    #[serde(default)]
    pub offset: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct CreateNamespaceRequest {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, rename = "type")]
    pub namespace_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateNamespaceRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, rename = "type")]
    pub namespace_type: Option<String>,
}

/// Git settings accepted on create and on `PUT …/settings`.
#[derive(Debug, Default, Deserialize)]
pub struct GitSettings {
    #[serde(default)]
    pub git_provider_id: Option<i64>,
    #[serde(default)]
    pub repo_clone_url_template: Option<String>,
    #[serde(default)]
    pub repo_browse_url_template: Option<String>,
    #[serde(default)]
    pub repo_base_url_template: Option<String>,
    #[serde(default)]
    pub git_tag_format: Option<String>,
    #[serde(default)]
    pub git_path: Option<String>,
    #[serde(default)]
    pub archive_git_path: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateModuleRequest {
    #[serde(flatten)]
    pub git: GitSettings,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModuleSettingsRequest {
    #[serde(flatten)]
    pub git: GitSettings,
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ImportRequest {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub git_tag: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PublishRequest {
    #[serde(default)]
    pub beta: Option<bool>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub status: &'static str,
    pub version: String,
    pub published: bool,
    pub beta: bool,
}

#[derive(Debug, Serialize)]
pub struct SubtreeView {
    pub kind: String,
    pub path: String,
}

impl From<Submodule> for SubtreeView {
    fn from(s: Submodule) -> Self {
        Self {
            kind: s.kind.as_str().to_string(),
            path: s.path,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserGroupRequest {
    pub name: String,
    #[serde(default)]
    pub site_admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetPermissionRequest {
    pub permission_type: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateGitProviderRequest {
    pub name: String,
    pub base_url_template: String,
    pub clone_url_template: String,
    pub browse_url_template: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateProviderRequest {
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProviderBinaryRequest {
    pub os: String,
    pub arch: String,
    pub filename: String,
    pub download_url: String,
    pub shasum: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateProviderVersionRequest {
    pub version: String,
    #[serde(default = "default_protocols")]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub gpg_key_id: Option<i64>,
    pub shasums_url: String,
    pub shasums_signature_url: String,
    #[serde(default)]
    pub binaries: Vec<ProviderBinaryRequest>,
}

fn default_protocols() -> Vec<String> {
    vec!["5.0".to_string()]
}

#[derive(Debug, Deserialize)]
pub struct CreateGpgKeyRequest {
    pub key_id: String,
    pub ascii_armor: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub authenticated: bool,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AuditHistoryResponse {
    pub events: Vec<crate::types::AuditEvent>,
    pub total: u64,
    pub offset: u32,
    pub limit: u32,
}
