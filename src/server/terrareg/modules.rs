use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use super::namespaces::find_namespace;
use crate::auth::Auth;
use crate::error::{Error, Result};
use crate::module::{sort_descending, tag_for_version, version_from_tag};
use crate::server::AppState;
use crate::server::dto::{CreateModuleRequest, GitSettings, ModuleSettingsRequest};
use crate::server::lookup::{audit, find_module_provider, resolve_module_provider};
use crate::server::response::ApiError;
use crate::server::validation::{
    validate_module_name, validate_namespace_name, validate_provider_name,
};
use crate::storage::{copy_object, module_archive_path};
use crate::types::{GitConfig, ModuleProvider, ModuleVersion, NewModuleProvider, PermissionLevel};

/// Applies requested settings over `git`. Empty strings clear optional templates.
fn apply_git_settings(state: &AppState, git: &mut GitConfig, settings: GitSettings) -> Result<()> {
    fn template(value: String) -> Option<String> {
        let value = value.trim().to_string();
        (!value.is_empty()).then_some(value)
    }

    if let Some(id) = settings.git_provider_id {
        if state.store.get_git_provider(id)?.is_none() {
            return Err(Error::bad_request(format!("Git provider {id} does not exist")));
        }
        git.git_provider_id = Some(id);
    }
    if let Some(value) = settings.repo_clone_url_template {
        git.clone_url_template = template(value);
    }
    if let Some(value) = settings.repo_browse_url_template {
        git.browse_url_template = template(value);
    }
    if let Some(value) = settings.repo_base_url_template {
        git.base_url_template = template(value);
    }
    if let Some(format) = settings.git_tag_format {
        // The format must round-trip a version through a tag.
        let probe = tag_for_version(&format, "1.2.3")?;
        version_from_tag(&format, &probe)?;
        git.tag_format = format;
    }
    if let Some(path) = settings.git_path {
        let path = path.trim_matches('/').to_string();
        if path.split('/').any(|c| c == ".." || c == ".") {
            return Err(Error::bad_request("git_path must not contain '.' or '..' components"));
        }
        git.path = path;
    }
    if let Some(archive_git_path) = settings.archive_git_path {
        git.archive_git_path = archive_git_path;
    }
    Ok(())
}

fn settings_view(module_provider: &ModuleProvider) -> serde_json::Value {
    json!({
        "id": module_provider.address(),
        "namespace": module_provider.namespace,
        "module": module_provider.module,
        "provider": module_provider.provider,
        "verified": module_provider.verified,
        "git_provider_id": module_provider.git.git_provider_id,
        "repo_clone_url_template": module_provider.git.clone_url_template,
        "repo_browse_url_template": module_provider.git.browse_url_template,
        "repo_base_url_template": module_provider.git.base_url_template,
        "git_tag_format": module_provider.git.tag_format,
        "git_path": module_provider.git.path,
        "archive_git_path": module_provider.git.archive_git_path,
    })
}

/// POST /modules/{ns}/{mod}/{prov}/create
pub async fn create_module(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider)): Path<(String, String, String)>,
    body: axum::body::Bytes,
) -> std::result::Result<impl IntoResponse, ApiError> {
    principal.require_module_write(state.store.as_ref(), &namespace)?;
    validate_module_name(&module)?;
    validate_provider_name(&provider)?;
    let req: CreateModuleRequest = super::optional_json(&body)?;
    let ns = find_namespace(&state, &namespace)?;

    let mut git = GitConfig::default();
    apply_git_settings(&state, &mut git, req.git)?;

    let module_provider = state.store.create_module_provider(&NewModuleProvider {
        namespace_id: ns.id,
        module,
        provider,
        verified: state.config.is_verified_namespace(&ns.name),
        git,
    })?;
    tracing::info!("Created module provider {}", module_provider.address());
    audit(
        state.store.as_ref(),
        &principal,
        "MODULE_PROVIDER_CREATE",
        "module_provider",
        &module_provider.address(),
        None,
        None,
    );

    Ok((StatusCode::CREATED, Json(settings_view(&module_provider))))
}

pub(super) async fn delete_archive(state: &AppState, module_provider: &ModuleProvider, version: &ModuleVersion) {
    let Some(ext) = version.archive_ext.as_deref() else {
        return;
    };
    let path = module_archive_path(
        &module_provider.namespace,
        &module_provider.module,
        &module_provider.provider,
        &version.version,
        ext,
    );
    if let Err(e) = state.blobs.delete(&path).await {
        tracing::warn!("Failed to delete archive {path}: {e}");
    }
}

/// DELETE /modules/{ns}/{mod}/{prov}
pub async fn delete_module(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider)): Path<(String, String, String)>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    principal.require_namespace(state.store.as_ref(), &namespace, PermissionLevel::Full)?;
    let module_provider = find_module_provider(state.store.as_ref(), &namespace, &module, &provider)?;
    let versions = state.store.list_module_versions(module_provider.id)?;

    if !state.store.delete_module_provider(module_provider.id)? {
        return Err(ApiError::not_found(format!(
            "Module {} not found",
            module_provider.address()
        )));
    }
    state.latest.invalidate(module_provider.id);
    for version in &versions {
        delete_archive(&state, &module_provider, version).await;
    }

    tracing::info!("Deleted module provider {}", module_provider.address());
    audit(
        state.store.as_ref(),
        &principal,
        "MODULE_PROVIDER_DELETE",
        "module_provider",
        &module_provider.address(),
        None,
        None,
    );

    Ok(Json(json!({ "status": "deleted" })))
}

/// GET /modules/{ns}/{mod}/{prov}/settings
pub async fn get_settings(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider)): Path<(String, String, String)>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    principal.require_namespace_read(state.store.as_ref(), &namespace)?;
    let module_provider = find_module_provider(state.store.as_ref(), &namespace, &module, &provider)?;
    Ok(Json(settings_view(&module_provider)))
}

/// Moves stored archives from the old address to the new one.
async fn move_archives(
    state: &AppState,
    from: &ModuleProvider,
    to: (&str, &str, &str),
    versions: &[ModuleVersion],
) -> Result<Vec<String>> {
    let mut copied: Vec<String> = Vec::new();
    for version in versions {
        let Some(ext) = version.archive_ext.as_deref() else {
            continue;
        };
        let source = module_archive_path(&from.namespace, &from.module, &from.provider, &version.version, ext);
        let target = module_archive_path(to.0, to.1, to.2, &version.version, ext);
        if let Err(e) = copy_object(state.blobs.as_ref(), &source, &target).await {
            for path in &copied {
                let _ = state.blobs.delete(path).await;
            }
            return Err(e.into());
        }
        copied.push(target);
    }
    Ok(copied)
}

/// PUT /modules/{ns}/{mod}/{prov}/settings
///
/// The whole request is validated before anything is written, so a rejected
/// rename leaves the settings untouched too.
pub async fn update_settings(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider)): Path<(String, String, String)>,
    Json(req): Json<ModuleSettingsRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let store = state.store.as_ref();
    principal.require_namespace(store, &namespace, PermissionLevel::Full)?;
    let current = find_module_provider(store, &namespace, &module, &provider)?;

    let mut git = current.git.clone();
    apply_git_settings(&state, &mut git, req.git)?;
    let verified = req.verified.unwrap_or(current.verified);

    let target_namespace = req.namespace.unwrap_or_else(|| current.namespace.clone());
    let target_module = req.module.unwrap_or_else(|| current.module.clone());
    let target_provider = req.provider.unwrap_or_else(|| current.provider.clone());
    let renaming = target_namespace != current.namespace
        || target_module != current.module
        || target_provider != current.provider;

    if renaming {
        validate_namespace_name(&target_namespace)?;
        validate_module_name(&target_module)?;
        validate_provider_name(&target_provider)?;
        principal.require_namespace(store, &target_namespace, PermissionLevel::Full)?;
        let target_ns = find_namespace(&state, &target_namespace)?;
        if store
            .find_module_provider(&target_namespace, &target_module, &target_provider)?
            .is_some()
        {
            return Err(Error::conflict(format!(
                "Module {target_namespace}/{target_module}/{target_provider} already exists"
            ))
            .into());
        }

        let versions = store.list_module_versions(current.id)?;
        let copied = move_archives(
            &state,
            &current,
            (&target_namespace, &target_module, &target_provider),
            &versions,
        )
        .await?;

        let renamed = match store.rename_module_provider(current.id, target_ns.id, &target_module, &target_provider) {
            Ok(renamed) => renamed,
            Err(e) => {
                for path in &copied {
                    let _ = state.blobs.delete(path).await;
                }
                return Err(e.into());
            }
        };
        for version in &versions {
            delete_archive(&state, &current, version).await;
        }
        tracing::info!("Renamed {} to {}", current.address(), renamed.address());
        audit(
            store,
            &principal,
            "MODULE_PROVIDER_RENAME",
            "module_provider",
            &renamed.address(),
            Some(current.address()),
            Some(renamed.address()),
        );
    }

    let updated = store.update_module_provider_settings(current.id, verified, &git)?;
    audit(
        store,
        &principal,
        "MODULE_PROVIDER_UPDATE_SETTINGS",
        "module_provider",
        &updated.address(),
        serde_json::to_string(&current.git).ok(),
        serde_json::to_string(&updated.git).ok(),
    );

    Ok(Json(settings_view(&updated)))
}

/// GET /modules/{ns}/{mod}/{prov}/versions
pub async fn list_versions(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider)): Path<(String, String, String)>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let module_provider =
        resolve_module_provider(state.store.as_ref(), &namespace, &module, &provider)?;
    principal.require_namespace_read(state.store.as_ref(), &module_provider.namespace)?;

    let mut versions = state.store.list_module_versions(module_provider.id)?;
    sort_descending(&mut versions);
    Ok(Json(versions))
}

/// GET /modules/{ns}/{mod}/{prov}/redirects
pub async fn list_redirects(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider)): Path<(String, String, String)>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    principal.require_namespace_read(state.store.as_ref(), &namespace)?;
    let module_provider = find_module_provider(state.store.as_ref(), &namespace, &module, &provider)?;
    Ok(Json(state.store.list_redirects(module_provider.id)?))
}

/// DELETE /modules/{ns}/{mod}/{prov}/redirects/{id}
pub async fn delete_redirect(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider, redirect_id)): Path<(String, String, String, i64)>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let store = state.store.as_ref();
    principal.require_namespace(store, &namespace, PermissionLevel::Full)?;
    let module_provider = find_module_provider(store, &namespace, &module, &provider)?;

    let redirect = store
        .list_redirects(module_provider.id)?
        .into_iter()
        .find(|r| r.id == redirect_id)
        .ok_or_else(|| ApiError::not_found(format!("Redirect {redirect_id} not found")))?;
    store.delete_redirect(redirect.id)?;
    audit(
        store,
        &principal,
        "MODULE_PROVIDER_REDIRECT_DELETE",
        "module_provider_redirect",
        &format!("{}/{}/{}", redirect.namespace, redirect.module, redirect.provider),
        None,
        None,
    );

    Ok(Json(json!({ "status": "deleted" })))
}
