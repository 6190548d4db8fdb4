use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use serde_json::json;

use super::namespaces::find_namespace;
use crate::auth::session::{
    clear_cookie_header, create_session, session_cookie, set_cookie_header, sign_session_id,
    verify_session_cookie,
};
use crate::auth::{Auth, Principal};
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::{CreateUserGroupRequest, LoginResponse, SetPermissionRequest};
use crate::server::lookup::audit;
use crate::server::response::ApiError;
use crate::types::{AuthMethod, PermissionLevel, UserGroup};

fn find_user_group(state: &AppState, name: &str) -> Result<UserGroup, ApiError> {
    state
        .store
        .get_user_group_by_name(name)?
        .ok_or_else(|| ApiError::not_found(format!("User group {name} not found")))
}

/// GET /auth/user-groups
pub async fn list_user_groups(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    principal.require_site_admin(state.store.as_ref())?;
    let store = state.store.as_ref();

    let mut groups = Vec::new();
    for group in store.list_user_groups()? {
        let permissions = store.list_group_permissions(group.id)?;
        groups.push(json!({
            "name": group.name,
            "site_admin": group.site_admin,
            "namespace_permissions": permissions,
        }));
    }
    Ok(Json(groups))
}

/// POST /auth/user-groups
pub async fn create_user_group(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUserGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.require_site_admin(state.store.as_ref())?;
    let name = req.name.trim();
    if name.is_empty() {
        return Err(Error::bad_request("User group name is required").into());
    }

    let group = state.store.create_user_group(name, req.site_admin)?;
    audit(
        state.store.as_ref(),
        &principal,
        "USER_GROUP_CREATE",
        "user_group",
        &group.name,
        None,
        None,
    );
    Ok((StatusCode::CREATED, Json(group)))
}

/// DELETE /auth/user-groups/{group}
pub async fn delete_user_group(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path(group): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    principal.require_site_admin(state.store.as_ref())?;
    let user_group = find_user_group(&state, &group)?;

    state.store.delete_user_group(user_group.id)?;
    audit(
        state.store.as_ref(),
        &principal,
        "USER_GROUP_DELETE",
        "user_group",
        &group,
        None,
        None,
    );
    Ok(Json(json!({ "status": "deleted" })))
}

/// POST /auth/user-groups/{group}/permissions/{namespace}
pub async fn set_permission(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path((group, namespace)): Path<(String, String)>,
    Json(req): Json<SetPermissionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.require_site_admin(state.store.as_ref())?;
    let level = PermissionLevel::parse(&req.permission_type).ok_or_else(|| {
        ApiError::bad_request(format!("Unknown permission type '{}'", req.permission_type))
    })?;
    let user_group = find_user_group(&state, &group)?;
    let ns = find_namespace(&state, &namespace)?;

    state
        .store
        .set_namespace_permission(user_group.id, ns.id, level)?;
    audit(
        state.store.as_ref(),
        &principal,
        "NAMESPACE_PERMISSION_SET",
        "user_group_namespace_permission",
        &format!("{group}/{namespace}"),
        None,
        Some(level.as_str().to_string()),
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "user_group": group,
            "namespace": namespace,
            "permission_type": level.as_str(),
        })),
    ))
}

/// DELETE /auth/user-groups/{group}/permissions/{namespace}
pub async fn delete_permission(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path((group, namespace)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    principal.require_site_admin(state.store.as_ref())?;
    let user_group = find_user_group(&state, &group)?;
    let ns = find_namespace(&state, &namespace)?;

    if !state
        .store
        .delete_namespace_permission(user_group.id, ns.id)?
    {
        return Err(ApiError::not_found(format!(
            "User group {group} has no permission on {namespace}"
        )));
    }
    audit(
        state.store.as_ref(),
        &principal,
        "NAMESPACE_PERMISSION_DELETE",
        "user_group_namespace_permission",
        &format!("{group}/{namespace}"),
        None,
        None,
    );
    Ok(Json(json!({ "status": "deleted" })))
}

/// POST /auth/admin/login
///
/// Exchanges the admin API key for a session cookie.
pub async fn admin_login(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    if !matches!(principal, Principal::AdminApiKey) {
        return Err(Error::unauthorized("Admin API key required").into());
    }
    let secret = state
        .config
        .session_secret
        .as_deref()
        .ok_or_else(|| ApiError::internal("Sessions are not configured"))?;

    let session = create_session(
        state.store.as_ref(),
        "admin",
        AuthMethod::AdminApiKey,
        Vec::new(),
        state.config.session_ttl,
    )?;
    let cookie = sign_session_id(secret, &session.id)?;
    audit(
        state.store.as_ref(),
        &principal,
        "USER_LOGIN",
        "session",
        "admin",
        None,
        None,
    );

    Ok((
        [(SET_COOKIE, set_cookie_header(&cookie, state.config.session_ttl))],
        Json(LoginResponse {
            authenticated: true,
            expires_at: session.expires_at,
        }),
    ))
}

/// POST /auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = match (
        state.config.session_secret.as_deref(),
        session_cookie(&headers),
    ) {
        (Some(secret), Some(cookie)) => verify_session_cookie(secret, cookie),
        _ => None,
    };
    if let Some(id) = session_id {
        state.store.delete_session(id)?;
    }

    Ok((
        [(SET_COOKIE, clear_cookie_header())],
        Json(json!({ "authenticated": false })),
    ))
}

/// GET /auth/status
pub async fn status(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let site_admin = principal.is_site_admin(state.store.as_ref())?;
    Ok(Json(json!({
        "authenticated": principal.is_authenticated(),
        "principal": principal.label(),
        "site_admin": site_admin,
        "read_access": principal.can_read(&state.config),
    })))
}
