use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
};

use crate::error::Error;
use crate::server::AppState;
use crate::server::lookup::resolve_module_provider;
use crate::server::response::ApiError;
use crate::webhook::{self, WebhookDelivery, WebhookHost};

fn header<'a>(headers: &'a HeaderMap, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
}

/// POST /modules/{ns}/{mod}/{prov}/hooks/{host}
///
/// Authenticated by the payload signature rather than by API key.
pub async fn receive(
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider, host)): Path<(String, String, String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let host = WebhookHost::parse(&host)
        .ok_or_else(|| ApiError::not_found(format!("Unknown webhook host '{host}'")))?;
    if host == WebhookHost::Gitlab {
        return Err(Error::NotImplemented("GitLab webhooks are not supported".to_string()).into());
    }
    let limit = state.config.max_webhook_body_size;
    let body = axum::body::to_bytes(body, usize::try_from(limit).unwrap_or(usize::MAX))
        .await
        .map_err(|_| {
            Error::PayloadTooLarge(format!("Webhook body exceeds the maximum size of {limit} bytes"))
        })?;

    // Hooks registered before a rename keep working through its redirect.
    let module_provider =
        resolve_module_provider(state.store.as_ref(), &namespace, &module, &provider)?;
    let (event_type, signature) = match host {
        WebhookHost::Bitbucket => (
            header(&headers, &["X-Event-Key"]),
            header(&headers, &["X-Hub-Signature-256", "X-Hub-Signature"]),
        ),
        _ => (
            header(&headers, &["X-GitHub-Event"]),
            header(&headers, &["X-Hub-Signature-256"]),
        ),
    };
    let delivery = WebhookDelivery {
        host,
        event_type,
        signature,
        body: &body,
    };

    let response = webhook::dispatch(
        &state.importer,
        &state.config.upload_api_keys,
        &module_provider,
        delivery,
    )
    .await?;
    Ok(Json(response))
}
