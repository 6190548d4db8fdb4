use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use crate::auth::{Auth, RequireRead};
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::CreateGitProviderRequest;
use crate::server::lookup::audit;
use crate::server::response::ApiError;
use crate::store::NewGitProvider;

/// GET /git_providers
pub async fn list_git_providers(
    _auth: RequireRead,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.list_git_providers()?))
}

/// POST /git_providers
pub async fn create_git_provider(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateGitProviderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    principal.require_site_admin(state.store.as_ref())?;
    let name = req.name.trim();
    if name.is_empty() {
        return Err(Error::bad_request("Git provider name is required").into());
    }
    if req.clone_url_template.trim().is_empty() {
        return Err(Error::bad_request("clone_url_template is required").into());
    }

    let git_provider = state.store.create_git_provider(&NewGitProvider {
        name: name.to_string(),
        base_url_template: req.base_url_template,
        clone_url_template: req.clone_url_template,
        browse_url_template: req.browse_url_template,
    })?;
    audit(
        state.store.as_ref(),
        &principal,
        "GIT_PROVIDER_CREATE",
        "git_provider",
        &git_provider.name,
        None,
        None,
    );

    Ok((StatusCode::CREATED, Json(git_provider)))
}
