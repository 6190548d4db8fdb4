//! Authenticated administration API under `/v1/terrareg`.

mod analytics;
mod audit;
mod auth;
mod git_providers;
mod modules;
mod namespaces;
mod providers;
mod spool;
mod versions;
mod webhooks;

use std::sync::Arc;

use axum::{
    Router,
    http::StatusCode,
    routing::{delete, get, post},
};
use serde::de::DeserializeOwned;
use tower_http::timeout::TimeoutLayer;

use super::AppState;
use crate::config::ServerConfig;
use crate::error::{Error, Result};

const MODULE: &str = "/modules/{namespace}/{module}/{provider}";
const VERSION: &str = "/modules/{namespace}/{module}/{provider}/{version}";

/// Parses an optional JSON body; an empty body yields the default.
pub(crate) fn optional_json<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| Error::bad_request(format!("Invalid JSON body: {e}")))
}

/// Uploads, imports and webhooks run for as long as the import takes.
fn import_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(&format!("{VERSION}/upload"), post(versions::upload))
        .route(&format!("{MODULE}/import"), post(versions::import))
        .route(&format!("{MODULE}/hooks/{{host}}"), post(webhooks::receive))
}

pub fn terrareg_router(config: &ServerConfig) -> Router<Arc<AppState>> {
    let routes = Router::new()
        .route(
            "/namespaces",
            get(namespaces::list_namespaces).post(namespaces::create_namespace),
        )
        .route(
            "/namespaces/{name}",
            get(namespaces::get_namespace)
                .post(namespaces::update_namespace)
                .delete(namespaces::delete_namespace),
        )
        .route(
            "/namespaces/{name}/gpg-keys",
            get(namespaces::list_gpg_keys).post(namespaces::create_gpg_key),
        )
        .route(&format!("{MODULE}/create"), post(modules::create_module))
        .route(MODULE, delete(modules::delete_module))
        .route(
            &format!("{MODULE}/settings"),
            get(modules::get_settings).put(modules::update_settings),
        )
        .route(&format!("{MODULE}/versions"), get(modules::list_versions))
        .route(&format!("{MODULE}/redirects"), get(modules::list_redirects))
        .route(
            &format!("{MODULE}/redirects/{{redirect_id}}"),
            delete(modules::delete_redirect),
        )
        .route(VERSION, get(versions::get_version))
        .route(&format!("{VERSION}/publish"), post(versions::publish))
        .route(&format!("{VERSION}/unpublish"), post(versions::unpublish))
        .route(&format!("{VERSION}/delete"), delete(versions::delete_version))
        .route(
            "/providers/{namespace}/{provider}/create",
            post(providers::create_provider),
        )
        .route(
            "/providers/{namespace}/{provider}/versions",
            post(providers::create_version),
        )
        .route(
            "/providers/{namespace}/{provider}/{version}/binaries/{os}/{arch}",
            post(providers::upload_binary),
        )
        .route(
            "/providers/{namespace}/{provider}/{version}/binaries/{filename}",
            get(providers::download_binary),
        )
        .route(
            "/git_providers",
            get(git_providers::list_git_providers).post(git_providers::create_git_provider),
        )
        .route(
            "/auth/user-groups",
            get(auth::list_user_groups).post(auth::create_user_group),
        )
        .route("/auth/user-groups/{group}", delete(auth::delete_user_group))
        .route(
            "/auth/user-groups/{group}/permissions/{namespace}",
            post(auth::set_permission).delete(auth::delete_permission),
        )
        .route("/auth/admin/login", post(auth::admin_login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/status", get(auth::status))
        .route("/audit-history", get(audit::audit_history))
        .route("/analytics/global/stats_summary", get(analytics::stats_summary))
        .route(
            "/analytics/global/most_recently_published_module_version",
            get(analytics::most_recently_published),
        )
        .route(
            "/analytics/global/most_downloaded_module_provider_this_week",
            get(analytics::most_downloaded_this_week),
        )
        .route(
            "/analytics/{namespace}/{module}/{provider}",
            get(analytics::module_token_downloads),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout(),
        ));

    routes.merge(import_routes())
}
