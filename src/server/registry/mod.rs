//! Terraform Registry Protocol v1.

mod modules;
mod providers;

use std::sync::Arc;

use axum::{Router, http::StatusCode, routing::get};
use tower_http::timeout::TimeoutLayer;

use super::AppState;
use crate::config::ServerConfig;

pub fn registry_router(config: &ServerConfig) -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/modules", get(modules::list_modules))
        .route("/v1/modules/search", get(modules::search))
        .route("/v1/modules/{namespace}", get(modules::list_namespace_modules))
        .route(
            "/v1/modules/{namespace}/{module}/{provider}",
            get(modules::get_latest),
        )
        .route(
            "/v1/modules/{namespace}/{module}/{provider}/versions",
            get(modules::list_versions),
        )
        .route(
            "/v1/modules/{namespace}/{module}/{provider}/download",
            get(modules::download_latest),
        )
        .route(
            "/v1/modules/{namespace}/{module}/{provider}/downloads/summary",
            get(modules::download_summary),
        )
        .route(
            "/v1/modules/{namespace}/{module}/{provider}/{version}",
            get(modules::get_version),
        )
        .route(
            "/v1/modules/{namespace}/{module}/{provider}/{version}/download",
            get(modules::download_version),
        )
        .route(
            "/v1/providers/{namespace}/{provider}/versions",
            get(providers::list_versions),
        )
        .route(
            "/v1/providers/{namespace}/{provider}/{version}/download/{os}/{arch}",
            get(providers::download),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout(),
        ))
}
