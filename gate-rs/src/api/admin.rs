//! Admin API endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::access_code::{AccessCode, NewAccessCode};
use crate::engine::Engine;
use crate::error::GateError;
use crate::principal::PrincipalId;
use crate::quota::{QuotaLimits, QuotaWindow, WindowType};
use crate::session::AccessSession;

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub invalidated: bool,
}

#[derive(Debug, Serialize)]
pub struct InvalidateAllResponse {
    pub entries_dropped: usize,
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub sessions_ended: usize,
}

#[derive(Debug, Deserialize)]
pub struct SessionFilter {
    pub principal: Option<String>,
}

/// POST /api/admin/sessions/:id/terminate
pub async fn terminate_session(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<Uuid>,
) -> Result<Json<AccessSession>, GateError> {
    let session = engine.force_terminate(id).await?;
    info!(session_id = %id, "Admin terminated session");
    Ok(Json(session))
}

/// GET /api/admin/sessions - List sessions, optionally for one principal
pub async fn list_sessions(
    State(engine): State<Arc<Engine>>,
    Query(filter): Query<SessionFilter>,
) -> Result<Json<Vec<AccessSession>>, GateError> {
    let principal = filter.principal.map(PrincipalId::new);
    Ok(Json(engine.list_sessions(principal.as_ref()).await?))
}

/// POST /api/admin/principals/:id/invalidate - Drop cached permissions
pub async fn invalidate_permissions(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
) -> Json<InvalidateResponse> {
    let invalidated = engine.invalidate_permissions(&PrincipalId::new(id));
    Json(InvalidateResponse { invalidated })
}

/// POST /api/admin/permissions/invalidate - Drop every cached permission set
pub async fn invalidate_all_permissions(
    State(engine): State<Arc<Engine>>,
) -> Json<InvalidateAllResponse> {
    let entries_dropped = engine.invalidate_all_permissions();
    info!(entries_dropped, "Admin flushed permission cache");
    Json(InvalidateAllResponse { entries_dropped })
}

/// PUT /api/admin/quotas/:principal/:window - Replace one window's limits
pub async fn adjust_quota(
    State(engine): State<Arc<Engine>>,
    Path((principal, window)): Path<(String, String)>,
    Json(limits): Json<QuotaLimits>,
) -> Result<Json<QuotaWindow>, GateError> {
    let window = WindowType::from_str(&window)
        .ok_or_else(|| GateError::Validation(format!("Unknown window type: {}", window)))?;
    let updated = engine
        .adjust_quota(&PrincipalId::new(principal), window, limits)
        .await?;
    Ok(Json(updated))
}

/// GET /api/admin/quotas/:principal - All windows of a principal
pub async fn get_quota(
    State(engine): State<Arc<Engine>>,
    Path(principal): Path<String>,
) -> Result<Json<Vec<QuotaWindow>>, GateError> {
    Ok(Json(engine.quota_snapshot(&PrincipalId::new(principal)).await?))
}

/// POST /api/admin/codes - Mint an access code
pub async fn create_code(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<NewAccessCode>,
) -> Result<(StatusCode, Json<AccessCode>), GateError> {
    let code = engine.create_access_code(&req).await?;
    Ok((StatusCode::CREATED, Json(code)))
}

/// GET /api/admin/codes
pub async fn list_codes(
    State(engine): State<Arc<Engine>>,
) -> Result<Json<Vec<AccessCode>>, GateError> {
    Ok(Json(engine.list_access_codes().await?))
}

/// POST /api/admin/codes/:code/revoke
pub async fn revoke_code(
    State(engine): State<Arc<Engine>>,
    Path(code): Path<String>,
) -> Result<Json<RevokeResponse>, GateError> {
    let sessions_ended = engine.revoke_access_code(&code).await?;
    Ok(Json(RevokeResponse { sessions_ended }))
}
