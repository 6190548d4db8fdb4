//! Lookups shared by the registry and terrareg handlers.

use chrono::Utc;
use uuid::Uuid;

use super::AppState;
use super::dto::ModuleSummary;
use crate::auth::Principal;
use crate::error::{Error, Result};
use crate::module::git::{self, TemplateVars, expand_template};
use crate::store::Store;
use crate::types::{AuditEvent, GitProvider, ModuleProvider, ModuleVersion};

/// Finds a module-provider by address, following a rename redirect on a miss.
///
/// Redirects point at a module-provider id, so one hop always reaches the
/// current address.
pub fn resolve_module_provider(
    store: &dyn Store,
    namespace: &str,
    module: &str,
    provider: &str,
) -> Result<ModuleProvider> {
    if let Some(found) = store.find_module_provider(namespace, module, provider)? {
        return Ok(found);
    }
    let missing = || Error::not_found(format!("Module {namespace}/{module}/{provider} not found"));
    let redirect = store
        .find_redirect(namespace, module, provider)?
        .ok_or_else(missing)?;
    tracing::debug!(
        "Following redirect from {namespace}/{module}/{provider} to module provider {}",
        redirect.module_provider_id
    );
    store
        .get_module_provider(redirect.module_provider_id)?
        .ok_or_else(missing)
}

/// Exact module-provider lookup for writes; redirects are not followed.
pub fn find_module_provider(
    store: &dyn Store,
    namespace: &str,
    module: &str,
    provider: &str,
) -> Result<ModuleProvider> {
    store
        .find_module_provider(namespace, module, provider)?
        .ok_or_else(|| Error::not_found(format!("Module {namespace}/{module}/{provider} not found")))
}

pub fn find_version(
    store: &dyn Store,
    module_provider: &ModuleProvider,
    version: &str,
) -> Result<ModuleVersion> {
    store
        .get_module_version(module_provider.id, version)?
        .ok_or_else(|| {
            Error::not_found(format!(
                "Version {version} of {} not found",
                module_provider.address()
            ))
        })
}

pub fn git_provider_of(store: &dyn Store, module_provider: &ModuleProvider) -> Result<Option<GitProvider>> {
    match module_provider.git.git_provider_id {
        Some(id) => store.get_git_provider(id),
        None => Ok(None),
    }
}

/// Repository URL shown as the module's `source`.
#[must_use]
pub fn source_url(module_provider: &ModuleProvider, git_provider: Option<&GitProvider>) -> String {
    let base = module_provider
        .git
        .base_url_template
        .as_deref()
        .or_else(|| git_provider.map(|p| p.base_url_template.as_str()));
    match base {
        Some(template) => expand_template(template, &TemplateVars::for_module(module_provider)),
        None => git::clone_url(module_provider, git_provider).unwrap_or_default(),
    }
}

pub fn module_summary(
    state: &AppState,
    module_provider: &ModuleProvider,
    version: &ModuleVersion,
) -> Result<ModuleSummary> {
    let git_provider = git_provider_of(state.store.as_ref(), module_provider)?;
    let downloads = state
        .store
        .download_summary(module_provider.id, Utc::now())?
        .total;
    let verified =
        module_provider.verified || state.config.is_verified_namespace(&module_provider.namespace);

    Ok(ModuleSummary {
        id: format!("{}/{}", module_provider.address(), version.version),
        owner: version.owner.clone().unwrap_or_default(),
        namespace: module_provider.namespace.clone(),
        name: module_provider.module.clone(),
        version: version.version.clone(),
        provider: module_provider.provider.clone(),
        description: version.description.clone().unwrap_or_default(),
        source: source_url(module_provider, git_provider.as_ref()),
        published_at: version.published_at,
        downloads,
        verified,
        trusted: state.config.is_trusted_namespace(&module_provider.namespace),
    })
}

/// Appends an audit event; failures are logged, not returned.
pub fn audit(
    store: &dyn Store,
    principal: &Principal,
    action: &str,
    object_type: &str,
    object_id: &str,
    old_value: Option<String>,
    new_value: Option<String>,
) {
    let event = AuditEvent {
        id: Uuid::new_v4().to_string(),
        timestamp: Utc::now(),
        principal: principal.label(),
        action: action.to_string(),
        object_type: object_type.to_string(),
        object_id: object_id.to_string(),
        old_value,
        new_value,
    };
    if let Err(e) = store.record_audit_event(&event) {
        tracing::error!("Failed to record audit event {action} on {object_id}: {e}");
    }
}
