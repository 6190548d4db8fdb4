use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use crate::auth::{Auth, RequireRead};
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::{
    CreateGpgKeyRequest, CreateNamespaceRequest, PaginationParams, UpdateNamespaceRequest,
};
use crate::server::lookup::audit;
use crate::server::response::ApiError;
use crate::server::validation::validate_namespace_name;
use crate::types::{Namespace, NamespaceType, PermissionLevel};

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 500;

fn parse_namespace_type(raw: Option<&str>) -> Result<NamespaceType, ApiError> {
    match raw {
        None => Ok(NamespaceType::None),
        Some(raw) => NamespaceType::parse(raw)
            .ok_or_else(|| ApiError::bad_request(format!("Unknown namespace type '{raw}'"))),
    }
}

pub(super) fn find_namespace(state: &AppState, name: &str) -> Result<Namespace, ApiError> {
    state
        .store
        .get_namespace_by_name(name)?
        .ok_or_else(|| ApiError::not_found(format!("Namespace {name} not found")))
}

/// GET /namespaces
pub async fn list_namespaces(
    _auth: RequireRead,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0);
    let namespaces = state.store.list_namespaces(offset, limit)?;
    Ok(Json(namespaces))
}

/// POST /namespaces
pub async fn create_namespace(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateNamespaceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.require_site_admin(state.store.as_ref())?;
    validate_namespace_name(&req.name)?;
    let namespace_type = parse_namespace_type(req.namespace_type.as_deref())?;

    let namespace = state.store.create_namespace(
        &req.name,
        req.display_name.as_deref(),
        namespace_type,
    )?;
    tracing::info!("Created namespace {}", namespace.name);
    audit(
        state.store.as_ref(),
        &principal,
        "NAMESPACE_CREATE",
        "namespace",
        &namespace.name,
        None,
        None,
    );

    Ok((StatusCode::CREATED, Json(namespace)))
}

/// GET /namespaces/{name}
pub async fn get_namespace(
    _auth: RequireRead,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let namespace = find_namespace(&state, &name)?;
    let modules: Vec<String> = state
        .store
        .list_namespace_module_providers(namespace.id)?
        .into_iter()
        .map(|mp| mp.address())
        .collect();

    Ok(Json(json!({
        "namespace": namespace,
        "modules": modules,
        "is_trusted": state.config.is_trusted_namespace(&name),
    })))
}

/// POST /namespaces/{name}
pub async fn update_namespace(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<UpdateNamespaceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.require_namespace(state.store.as_ref(), &name, PermissionLevel::Full)?;
    let namespace = find_namespace(&state, &name)?;
    let namespace_type = match req.namespace_type.as_deref() {
        Some(raw) => parse_namespace_type(Some(raw))?,
        None => namespace.namespace_type,
    };
    let display_name = req.display_name.or(namespace.display_name.clone());

    let updated =
        state
            .store
            .update_namespace(namespace.id, display_name.as_deref(), namespace_type)?;
    audit(
        state.store.as_ref(),
        &principal,
        "NAMESPACE_MODIFY",
        "namespace",
        &name,
        namespace.display_name,
        updated.display_name.clone(),
    );

    Ok(Json(updated))
}

/// DELETE /namespaces/{name}
pub async fn delete_namespace(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    principal.require_site_admin(state.store.as_ref())?;
    let namespace = find_namespace(&state, &name)?;

    if !state.store.delete_namespace(namespace.id)? {
        return Err(ApiError::not_found(format!("Namespace {name} not found")));
    }
    tracing::info!("Deleted namespace {name}");
    audit(
        state.store.as_ref(),
        &principal,
        "NAMESPACE_DELETE",
        "namespace",
        &name,
        None,
        None,
    );

    Ok(Json(json!({ "status": "deleted" })))
}

/// GET /namespaces/{name}/gpg-keys
pub async fn list_gpg_keys(
    _auth: RequireRead,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let namespace = find_namespace(&state, &name)?;
    Ok(Json(state.store.list_gpg_keys(namespace.id)?))
}

/// POST /namespaces/{name}/gpg-keys
pub async fn create_gpg_key(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<CreateGpgKeyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.require_namespace(state.store.as_ref(), &name, PermissionLevel::Full)?;
    let namespace = find_namespace(&state, &name)?;

    let key_id = req.key_id.trim();
    if key_id.is_empty() || !key_id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::bad_request("GPG key id must be hexadecimal").into());
    }
    if !req.ascii_armor.contains("BEGIN PGP PUBLIC KEY BLOCK") {
        return Err(Error::bad_request("ascii_armor must be an armored PGP public key").into());
    }

    let key = state
        .store
        .create_gpg_key(namespace.id, &key_id.to_ascii_uppercase(), &req.ascii_armor)?;
    audit(
        state.store.as_ref(),
        &principal,
        "GPG_KEY_CREATE",
        "gpg_key",
        &key.key_id,
        None,
        None,
    );

    Ok((StatusCode::CREATED, Json(key)))
}
