use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};

use crate::auth::Auth;
use crate::server::AppState;
use crate::server::dto::{AuditHistoryResponse, PaginationParams};
use crate::server::response::ApiError;

const DEFAULT_PAGE_SIZE: u32 = 25;
const MAX_PAGE_SIZE: u32 = 500;

/// GET /audit-history, newest first.
pub async fn audit_history(
    Auth(principal): Auth,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    principal.require_site_admin(state.store.as_ref())?;
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0);

    let (events, total) = state.store.list_audit_events(offset, limit)?;
    Ok(Json(AuditHistoryResponse {
        events,
        total,
        offset,
        limit,
    }))
}
