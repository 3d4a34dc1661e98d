//! API request handlers

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::access_code::GuestPass;
use crate::engine::{Authorized, Engine};
use crate::error::{ErrorKind, GateError};
use crate::quota::DataMb;
use crate::session::{AccessSession, UsageReceipt};
use crate::token::IssuedToken;

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    pub fn new(msg: &str) -> Self {
        Self {
            error: msg.to_string(),
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = match self.kind() {
            ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
            ErrorKind::Authorization if self.is_quota_exceeded() => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Authorization => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(ApiError::new(&message))).into_response()
    }
}

/// Redeem request body
#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub code: String,
}

/// Refresh request body
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Usage report from the enforcement point
#[derive(Debug, Deserialize)]
pub struct UsageReport {
    pub session_id: Uuid,
    pub data_mb: DataMb,
}

/// Session status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub session: AccessSession,
    pub role: String,
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// POST /api/guest/redeem - Trade an access code for a guest session
pub async fn redeem(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<RedeemRequest>,
) -> Result<(StatusCode, Json<GuestPass>), GateError> {
    let pass = engine.redeem(&req.code).await?;
    Ok((StatusCode::CREATED, Json(pass)))
}

/// POST /api/token/refresh - New access token for a live session
pub async fn refresh(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<IssuedToken>, GateError> {
    Ok(Json(engine.refresh(&req.refresh_token).await?))
}

/// GET /api/session/status - Current session, evaluated now
pub async fn session_status(
    Extension(authorized): Extension<Authorized>,
) -> Json<StatusResponse> {
    Json(StatusResponse {
        session: authorized.session,
        role: authorized.role,
    })
}

/// POST /api/session/pause
pub async fn pause(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<AccessSession>,
) -> Result<Json<AccessSession>, GateError> {
    Ok(Json(engine.pause(session.id).await?))
}

/// POST /api/session/resume
pub async fn resume(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<AccessSession>,
) -> Result<Json<AccessSession>, GateError> {
    Ok(Json(engine.resume(session.id).await?))
}

/// POST /api/session/logout
pub async fn logout(
    State(engine): State<Arc<Engine>>,
    Extension(session): Extension<AccessSession>,
) -> Result<Json<AccessSession>, GateError> {
    Ok(Json(engine.logout(session.id).await?))
}

/// POST /api/usage - Record data transferred by a session
pub async fn report_usage(
    State(engine): State<Arc<Engine>>,
    Json(report): Json<UsageReport>,
) -> Result<Json<UsageReceipt>, GateError> {
    Ok(Json(
        engine
            .record_usage(report.session_id, report.data_mb)
            .await?,
    ))
}
