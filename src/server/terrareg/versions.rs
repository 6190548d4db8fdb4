use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use super::modules::delete_archive;
use super::optional_json;
use super::spool::spool_multipart_file;
use crate::auth::Auth;
use crate::module::{GitImportRequest, ImportOutcome, ImportStatus};
use crate::server::AppState;
use crate::server::dto::{ImportRequest, ImportResponse, PublishRequest, SubtreeView};
use crate::server::lookup::{audit, find_module_provider, find_version, resolve_module_provider};
use crate::server::response::ApiError;
use crate::server::validation::validate_version;
use crate::store::PublishUpdate;
use crate::types::{PermissionLevel, SubmoduleKind};

fn import_response(outcome: &ImportOutcome) -> ImportResponse {
    ImportResponse {
        status: match outcome.status {
            ImportStatus::Imported => "imported",
            ImportStatus::Unchanged => "unchanged",
        },
        version: outcome.version.version.clone(),
        published: outcome.version.published,
        beta: outcome.version.beta,
    }
}

/// POST /modules/{ns}/{mod}/{prov}/{ver}/upload
pub async fn upload(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider, version)): Path<(String, String, String, String)>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    validate_version(&version)?;
    let module_provider =
        resolve_module_provider(state.store.as_ref(), &namespace, &module, &provider)?;
    principal.require_module_write(state.store.as_ref(), &module_provider.namespace)?;

    let spooled = spool_multipart_file(&mut multipart, "file", state.config.max_upload_size).await?;
    tracing::debug!(
        "Spooled {} byte upload for {}/{}",
        spooled.size,
        module_provider.address(),
        version
    );
    let outcome = state
        .importer
        .import_upload(&module_provider, &version, spooled.path())
        .await?;

    audit(
        state.store.as_ref(),
        &principal,
        "MODULE_VERSION_UPLOAD",
        "module_version",
        &format!("{}/{}", module_provider.address(), version),
        None,
        None,
    );
    Ok(Json(import_response(&outcome)))
}

/// POST /modules/{ns}/{mod}/{prov}/import
pub async fn import(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let module_provider =
        resolve_module_provider(state.store.as_ref(), &namespace, &module, &provider)?;
    principal.require_module_write(state.store.as_ref(), &module_provider.namespace)?;
    let req: ImportRequest = optional_json(&body)?;
    if req.version.is_none() && req.git_tag.is_none() {
        return Err(ApiError::bad_request("Either version or git_tag is required"));
    }
    if let Some(version) = req.version.as_deref() {
        validate_version(version)?;
    }

    let outcome = state
        .importer
        .import_git(
            &module_provider,
            &GitImportRequest {
                version: req.version,
                git_tag: req.git_tag,
            },
        )
        .await?;

    if outcome.status == ImportStatus::Imported {
        audit(
            state.store.as_ref(),
            &principal,
            "MODULE_VERSION_INDEX",
            "module_version",
            &format!("{}/{}", module_provider.address(), outcome.version.version),
            None,
            None,
        );
    }
    Ok(Json(import_response(&outcome)))
}

/// GET /modules/{ns}/{mod}/{prov}/{ver}
///
/// Unlike the registry protocol this shows unpublished and beta versions.
pub async fn get_version(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider, version)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store.as_ref();
    let module_provider = resolve_module_provider(store, &namespace, &module, &provider)?;
    principal.require_namespace_read(store, &module_provider.namespace)?;
    let module_version = find_version(store, &module_provider, &version)?;

    let mut subtrees: Vec<SubtreeView> = Vec::new();
    for kind in [SubmoduleKind::Submodule, SubmoduleKind::Example] {
        subtrees.extend(
            store
                .list_subtrees(module_version.id, kind)?
                .into_iter()
                .map(SubtreeView::from),
        );
    }

    Ok(Json(json!({
        "module_provider": module_provider.address(),
        "version": module_version,
        "subtrees": subtrees,
    })))
}

/// POST /modules/{ns}/{mod}/{prov}/{ver}/publish
pub async fn publish(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider, version)): Path<(String, String, String, String)>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store.as_ref();
    principal.require_module_write(store, &namespace)?;
    let req: PublishRequest = optional_json(&body)?;
    let module_provider = find_module_provider(store, &namespace, &module, &provider)?;
    let module_version = find_version(store, &module_provider, &version)?;

    let published = store.publish_module_version(
        module_version.id,
        &PublishUpdate {
            beta: req.beta,
            description: req.description,
            owner: req.owner,
        },
    )?;
    state.latest.invalidate(module_provider.id);
    tracing::info!("Published {}/{}", module_provider.address(), version);
    audit(
        store,
        &principal,
        "MODULE_VERSION_PUBLISH",
        "module_version",
        &format!("{}/{}", module_provider.address(), version),
        Some(module_version.published.to_string()),
        Some(published.published.to_string()),
    );

    Ok((StatusCode::CREATED, Json(published)))
}

/// POST /modules/{ns}/{mod}/{prov}/{ver}/unpublish
pub async fn unpublish(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider, version)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store.as_ref();
    principal.require_module_write(store, &namespace)?;
    let module_provider = find_module_provider(store, &namespace, &module, &provider)?;
    let module_version = find_version(store, &module_provider, &version)?;

    let unpublished = store.unpublish_module_version(module_version.id)?;
    state.latest.invalidate(module_provider.id);
    audit(
        store,
        &principal,
        "MODULE_VERSION_UNPUBLISH",
        "module_version",
        &format!("{}/{}", module_provider.address(), version),
        Some(module_version.published.to_string()),
        Some(unpublished.published.to_string()),
    );

    Ok(Json(unpublished))
}

/// DELETE /modules/{ns}/{mod}/{prov}/{ver}/delete
pub async fn delete_version(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider, version)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store.as_ref();
    principal.require_namespace(store, &namespace, PermissionLevel::Full)?;
    let module_provider = find_module_provider(store, &namespace, &module, &provider)?;
    let module_version = find_version(store, &module_provider, &version)?;

    // An import of the same version in flight is a conflict.
    let _guard = state
        .importer
        .locks()
        .try_acquire(module_provider.id, &module_version.version)?;
    if !store.delete_module_version(module_version.id)? {
        return Err(ApiError::not_found(format!(
            "Version {version} of {} not found",
            module_provider.address()
        )));
    }
    state.latest.invalidate(module_provider.id);
    delete_archive(&state, &module_provider, &module_version).await;

    tracing::info!("Deleted {}/{}", module_provider.address(), version);
    audit(
        store,
        &principal,
        "MODULE_VERSION_DELETE",
        "module_version",
        &format!("{}/{}", module_provider.address(), version),
        None,
        None,
    );

    Ok(Json(json!({ "status": "deleted" })))
}
