use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{Json, Router, routing::get};
use serde_json::{Value, json};

use super::registry::registry_router;
use super::terrareg::terrareg_router;
use crate::config::ServerConfig;
use crate::module::{ImportLocks, Importer, LatestCache};
use crate::storage::BlobStore;
use crate::store::Store;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub blobs: Arc<dyn BlobStore>,
    pub config: Arc<ServerConfig>,
    pub latest: Arc<LatestCache>,
    pub importer: Importer,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, blobs: Arc<dyn BlobStore>, config: ServerConfig) -> Self {
        let config = Arc::new(config);
        let latest = Arc::new(LatestCache::new());
        let importer = Importer::new(
            store.clone(),
            blobs.clone(),
            config.clone(),
            latest.clone(),
            ImportLocks::new(),
        );
        Self {
            store,
            blobs,
            config,
            latest,
            importer,
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn service_discovery() -> Json<Value> {
    Json(json!({
        "modules.v1": "/v1/modules/",
        "providers.v1": "/v1/providers/",
    }))
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

pub fn create_router(state: Arc<AppState>) -> Router {
    // Upload handlers enforce their own caps while streaming.
    let body_limit = usize::try_from(state.config.max_upload_size)
        .unwrap_or(usize::MAX)
        .saturating_add(64 * 1024);

    Router::new()
        .route("/health", get(health))
        .route("/.well-known/terraform.json", get(service_discovery))
        .nest("/v1/terrareg", terrareg_router(&state.config))
        .merge(registry_router(&state.config))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
