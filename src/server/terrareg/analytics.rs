use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::{Value, json};

use crate::auth::{Auth, RequireRead};
use crate::server::AppState;
use crate::server::lookup::{module_summary, resolve_module_provider};
use crate::server::response::ApiError;

/// GET /analytics/global/stats_summary
pub async fn stats_summary(
    _auth: RequireRead,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.global_stats()?))
}

/// GET /analytics/global/most_recently_published_module_version
pub async fn most_recently_published(
    _auth: RequireRead,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let body = match state.store.most_recently_published()? {
        Some((module_provider, version)) => {
            serde_json::to_value(module_summary(&state, &module_provider, &version)?)
                .map_err(|e| ApiError::internal(e.to_string()))?
        }
        None => json!({}),
    };
    Ok(Json(body))
}

/// GET /analytics/global/most_downloaded_module_provider_this_week
pub async fn most_downloaded_this_week(
    _auth: RequireRead,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some((module_provider, downloads)) = state.store.most_downloaded_this_week(Utc::now())? else {
        return Ok(Json(json!({})));
    };

    let mut body = match state.latest.latest_public(state.store.as_ref(), module_provider.id)? {
        Some(version) => serde_json::to_value(module_summary(&state, &module_provider, &version)?)
            .map_err(|e| ApiError::internal(e.to_string()))?,
        None => json!({
            "id": module_provider.address(),
            "namespace": module_provider.namespace,
            "name": module_provider.module,
            "provider": module_provider.provider,
        }),
    };
    if let Value::Object(map) = &mut body {
        map.insert("downloads_this_week".to_string(), json!(downloads));
    }
    Ok(Json(body))
}

/// GET /analytics/{ns}/{mod}/{prov}
///
/// Latest download per analytics token, plus the period summary.
pub async fn module_token_downloads(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store.as_ref();
    let module_provider = resolve_module_provider(store, &namespace, &module, &provider)?;
    principal.require_namespace_read(store, &module_provider.namespace)?;

    let tokens = store.token_downloads(module_provider.id)?;
    let summary = store.download_summary(module_provider.id, Utc::now())?;
    Ok(Json(json!({
        "module_provider": module_provider.address(),
        "summary": summary,
        "tokens": tokens,
    })))
}
