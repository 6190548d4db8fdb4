//! Catalog store.
//!
//! Each aggregate is reached through its own repository trait; [`Store`]
//! bundles them so the server can hold a single `Arc<dyn Store>`.

mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::types::*;

/// Filter for module search and listing.
#[derive(Debug, Clone, Default)]
pub struct ModuleSearch {
    pub query: Option<String>,
    pub namespace: Option<String>,
    pub provider: Option<String>,
    pub verified: Option<bool>,
    /// Restrict to these namespaces (trusted-namespace filter).
    pub namespaces_in: Option<Vec<String>>,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Clone)]
pub struct SearchPage {
    pub module_providers: Vec<ModuleProvider>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveInfo {
    pub ext: String,
    pub sha256: String,
    pub size: i64,
}

/// A submodule or example parsed during import.
#[derive(Debug, Clone)]
pub struct ImportedSubtree {
    pub kind: SubmoduleKind,
    pub path: String,
    pub details: ModuleDetails,
}

/// Everything needed to persist one imported version.
#[derive(Debug, Clone)]
pub struct ModuleImport {
    pub module_provider_id: i64,
    pub version: String,
    pub beta: bool,
    pub git_sha: Option<String>,
    pub git_tag: Option<String>,
    pub git_path: Option<String>,
    pub extraction_version: i64,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub archive: Option<ArchiveInfo>,
    pub details: ModuleDetails,
    pub subtrees: Vec<ImportedSubtree>,
    /// Publish in the same savepoint (auto-publish).
    pub publish: bool,
}

/// Optional overrides applied by the publish transition.
#[derive(Debug, Clone, Default)]
pub struct PublishUpdate {
    pub beta: Option<bool>,
    pub description: Option<String>,
    pub owner: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewProviderVersion {
    pub version: String,
    pub protocols: Vec<String>,
    pub gpg_key_id: Option<i64>,
    pub shasums_url: String,
    pub shasums_signature_url: String,
}

#[derive(Debug, Clone)]
pub struct NewGitProvider {
    pub name: String,
    pub base_url_template: String,
    pub clone_url_template: String,
    pub browse_url_template: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DownloadSummary {
    pub week: u64,
    pub month: u64,
    pub year: u64,
    pub total: u64,
    /// Downloads carrying an analytics token.
    pub authenticated: u64,
    pub anonymous: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GlobalStats {
    pub namespaces: u64,
    pub modules: u64,
    pub module_versions: u64,
    pub downloads: u64,
}

/// Latest download seen for one analytics token.
#[derive(Debug, Clone, Serialize)]
pub struct TokenDownload {
    pub analytics_token: String,
    pub environment: Option<String>,
    pub terraform_version: Option<String>,
    pub module_version: String,
    pub timestamp: DateTime<Utc>,
}

/// Effective access of a set of groups on one namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupAccess {
    pub site_admin: bool,
    pub level: Option<PermissionLevel>,
}

pub trait NamespaceRepository {
    fn create_namespace(
        &self,
        name: &str,
        display_name: Option<&str>,
        namespace_type: NamespaceType,
    ) -> Result<Namespace>;
    fn get_namespace(&self, id: i64) -> Result<Option<Namespace>>;
    fn get_namespace_by_name(&self, name: &str) -> Result<Option<Namespace>>;
    fn list_namespaces(&self, offset: u32, limit: u32) -> Result<Vec<Namespace>>;
    fn update_namespace(
        &self,
        id: i64,
        display_name: Option<&str>,
        namespace_type: NamespaceType,
    ) -> Result<Namespace>;
    /// Fails with `Conflict` while the namespace owns module-providers or providers.
    fn delete_namespace(&self, id: i64) -> Result<bool>;
}

pub trait GitProviderRepository {
    fn create_git_provider(&self, provider: &NewGitProvider) -> Result<GitProvider>;
    fn get_git_provider(&self, id: i64) -> Result<Option<GitProvider>>;
    fn list_git_providers(&self) -> Result<Vec<GitProvider>>;
}

pub trait ModuleProviderRepository {
    fn create_module_provider(&self, new: &NewModuleProvider) -> Result<ModuleProvider>;
    fn get_module_provider(&self, id: i64) -> Result<Option<ModuleProvider>>;
    fn find_module_provider(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
    ) -> Result<Option<ModuleProvider>>;
    fn list_namespace_module_providers(&self, namespace_id: i64) -> Result<Vec<ModuleProvider>>;
    /// Module-providers with at least one public version matching `filter`.
    fn search_module_providers(&self, filter: &ModuleSearch) -> Result<SearchPage>;
    fn update_module_provider_settings(
        &self,
        id: i64,
        verified: bool,
        git: &GitConfig,
    ) -> Result<ModuleProvider>;
    /// Moves the module-provider and records its old address as a redirect.
    fn rename_module_provider(
        &self,
        id: i64,
        namespace_id: i64,
        module: &str,
        provider: &str,
    ) -> Result<ModuleProvider>;
    /// Cascades to versions, details, subtrees and redirects. Download rows are tombstoned.
    fn delete_module_provider(&self, id: i64) -> Result<bool>;

    fn find_redirect(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
    ) -> Result<Option<ModuleProviderRedirect>>;
    fn list_redirects(&self, module_provider_id: i64) -> Result<Vec<ModuleProviderRedirect>>;
    fn delete_redirect(&self, id: i64) -> Result<bool>;
}

pub trait ModuleVersionRepository {
    fn get_module_version(&self, module_provider_id: i64, version: &str)
    -> Result<Option<ModuleVersion>>;
    fn get_module_version_by_id(&self, id: i64) -> Result<Option<ModuleVersion>>;
    fn list_module_versions(&self, module_provider_id: i64) -> Result<Vec<ModuleVersion>>;
    fn get_module_details(&self, details_id: i64) -> Result<Option<ModuleDetails>>;
    fn list_subtrees(&self, module_version_id: i64, kind: SubmoduleKind) -> Result<Vec<Submodule>>;
    fn get_subtree(&self, module_version_id: i64, path: &str) -> Result<Option<Submodule>>;

    /// Persists a batch of imports inside one transaction, one savepoint per
    /// entry. A failing entry rolls back only its own savepoint. The outer
    /// `Result` fails only if the transaction itself cannot be opened or committed.
    fn commit_module_imports(&self, imports: &[ModuleImport]) -> Result<Vec<Result<ModuleVersion>>>;

    fn publish_module_version(&self, id: i64, update: &PublishUpdate) -> Result<ModuleVersion>;
    fn unpublish_module_version(&self, id: i64) -> Result<ModuleVersion>;
    /// Cascades to details and subtrees. Download rows are tombstoned.
    fn delete_module_version(&self, id: i64) -> Result<bool>;
}

pub trait ProviderRepository {
    fn create_provider(
        &self,
        namespace_id: i64,
        name: &str,
        description: Option<&str>,
    ) -> Result<Provider>;
    fn find_provider(&self, namespace: &str, name: &str) -> Result<Option<Provider>>;
    fn list_provider_versions(&self, provider_id: i64) -> Result<Vec<ProviderVersion>>;
    fn get_provider_version(&self, provider_id: i64, version: &str)
    -> Result<Option<ProviderVersion>>;
    fn create_provider_version(
        &self,
        provider_id: i64,
        version: &NewProviderVersion,
        binaries: &[NewProviderBinary],
    ) -> Result<ProviderVersion>;
    fn list_provider_binaries(&self, provider_version_id: i64) -> Result<Vec<ProviderBinary>>;
    fn find_provider_binary(
        &self,
        provider_version_id: i64,
        os: &str,
        arch: &str,
    ) -> Result<Option<ProviderBinary>>;
    fn find_provider_binary_by_filename(
        &self,
        provider_version_id: i64,
        filename: &str,
    ) -> Result<Option<ProviderBinary>>;
    fn upsert_provider_binary(
        &self,
        provider_version_id: i64,
        binary: &NewProviderBinary,
    ) -> Result<ProviderBinary>;

    fn create_gpg_key(&self, namespace_id: i64, key_id: &str, ascii_armor: &str) -> Result<GpgKey>;
    fn get_gpg_key(&self, id: i64) -> Result<Option<GpgKey>>;
    fn list_gpg_keys(&self, namespace_id: i64) -> Result<Vec<GpgKey>>;
}

pub trait DownloadRepository {
    fn record_download(&self, event: &NewDownloadEvent) -> Result<()>;
    fn download_summary(&self, module_provider_id: i64, now: DateTime<Utc>) -> Result<DownloadSummary>;
    fn global_stats(&self) -> Result<GlobalStats>;
    fn most_recently_published(&self) -> Result<Option<(ModuleProvider, ModuleVersion)>>;
    fn most_downloaded_this_week(&self, now: DateTime<Utc>) -> Result<Option<(ModuleProvider, u64)>>;
    fn token_downloads(&self, module_provider_id: i64) -> Result<Vec<TokenDownload>>;
}

pub trait UserGroupRepository {
    fn create_user_group(&self, name: &str, site_admin: bool) -> Result<UserGroup>;
    fn get_user_group_by_name(&self, name: &str) -> Result<Option<UserGroup>>;
    fn list_user_groups(&self) -> Result<Vec<UserGroup>>;
    fn delete_user_group(&self, id: i64) -> Result<bool>;
    fn set_namespace_permission(
        &self,
        user_group_id: i64,
        namespace_id: i64,
        level: PermissionLevel,
    ) -> Result<()>;
    fn delete_namespace_permission(&self, user_group_id: i64, namespace_id: i64) -> Result<bool>;
    fn list_group_permissions(&self, user_group_id: i64) -> Result<Vec<NamespacePermission>>;
    /// Site-admin flag and highest level over the named groups, in one query.
    fn resolve_group_access(&self, groups: &[String], namespace: Option<&str>) -> Result<GroupAccess>;
}

pub trait SessionRepository {
    fn create_session(&self, session: &Session) -> Result<()>;
    /// Expired sessions are treated as missing.
    fn get_session(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Session>>;
    fn delete_session(&self, id: &str) -> Result<bool>;
    fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize>;
}

pub trait AuditRepository {
    fn record_audit_event(&self, event: &AuditEvent) -> Result<()>;
    fn list_audit_events(&self, offset: u32, limit: u32) -> Result<(Vec<AuditEvent>, u64)>;
}

/// Store bundles every repository behind one object.
pub trait Store:
    NamespaceRepository
    + GitProviderRepository
    + ModuleProviderRepository
    + ModuleVersionRepository
    + ProviderRepository
    + DownloadRepository
    + UserGroupRepository
    + SessionRepository
    + AuditRepository
    + Send
    + Sync
{
    /// Creates the schema if missing.
    fn initialize(&self) -> Result<()>;
}
