//! API Server - router and bearer-token middleware

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::api::{admin, handlers};
use crate::authz::Requirement;
use crate::engine::Engine;
use crate::error::{AuthFailure, GateError};

/// Permission required by admin routes
pub const ADMIN_PERMISSION: &str = "gate:admin";
/// Permission required to report usage
pub const USAGE_PERMISSION: &str = "usage:report";

type Request = axum::http::Request<axum::body::Body>;

fn bearer_token(headers: &HeaderMap) -> Result<String, GateError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or(GateError::auth(AuthFailure::MissingToken))
}

async fn gate(
    engine: &Engine,
    mut req: Request,
    next: Next,
    requirement: Option<Requirement>,
) -> Response {
    let token = match bearer_token(req.headers()) {
        Ok(token) => token,
        Err(e) => return e.into_response(),
    };

    match engine.authorize(&token, requirement.as_ref()).await {
        Ok(authorized) => {
            // Store the decision in request extensions for handlers
            req.extensions_mut().insert(authorized);
            next.run(req).await
        }
        Err(e) => {
            debug!(error = %e, "Request refused");
            e.into_response()
        }
    }
}

/// Any live, active session
async fn require_access(State(engine): State<Arc<Engine>>, req: Request, next: Next) -> Response {
    gate(&engine, req, next, None).await
}

async fn require_admin(State(engine): State<Arc<Engine>>, req: Request, next: Next) -> Response {
    gate(&engine, req, next, Some(Requirement::permission(ADMIN_PERMISSION))).await
}

async fn require_reporter(State(engine): State<Arc<Engine>>, req: Request, next: Next) -> Response {
    gate(
        &engine,
        req,
        next,
        Some(Requirement::permission(USAGE_PERMISSION).or_permission(ADMIN_PERMISSION)),
    )
    .await
}

/// Token and session binding only, so paused and ended sessions can still
/// be resumed or logged out
async fn require_session(
    State(engine): State<Arc<Engine>>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = match bearer_token(req.headers()) {
        Ok(token) => token,
        Err(e) => return e.into_response(),
    };

    match engine.authenticate(&token).await {
        Ok(session) => {
            req.extensions_mut().insert(session);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

/// Build the router with all routes
pub fn router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/guest/redeem", post(handlers::redeem))
        .route("/token/refresh", post(handlers::refresh));

    let status_routes = Router::new()
        .route("/session/status", get(handlers::session_status))
        .route_layer(middleware::from_fn_with_state(engine.clone(), require_access));

    let session_routes = Router::new()
        .route("/session/pause", post(handlers::pause))
        .route("/session/resume", post(handlers::resume))
        .route("/session/logout", post(handlers::logout))
        .route_layer(middleware::from_fn_with_state(engine.clone(), require_session));

    let usage_routes = Router::new()
        .route("/usage", post(handlers::report_usage))
        .route_layer(middleware::from_fn_with_state(engine.clone(), require_reporter));

    let admin_routes = Router::new()
        .route("/sessions", get(admin::list_sessions))
        .route("/sessions/:id/terminate", post(admin::terminate_session))
        .route("/principals/:id/invalidate", post(admin::invalidate_permissions))
        .route("/permissions/invalidate", post(admin::invalidate_all_permissions))
        .route("/quotas/:principal", get(admin::get_quota))
        .route("/quotas/:principal/:window", put(admin::adjust_quota))
        .route("/codes", get(admin::list_codes).post(admin::create_code))
        .route("/codes/:code/revoke", post(admin::revoke_code))
        .route_layer(middleware::from_fn_with_state(engine.clone(), require_admin));

    Router::new()
        .route("/health", get(handlers::health))
        .nest(
            "/api",
            public_routes
                .merge(status_routes)
                .merge(session_routes)
                .merge(usage_routes),
        )
        .nest("/api/admin", admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(engine)
}

/// API Server configuration
pub struct ApiServer {
    engine: Arc<Engine>,
    addr: String,
}

impl ApiServer {
    pub fn new(engine: Arc<Engine>, addr: String) -> Self {
        Self { engine, addr }
    }

    /// Start the API server
    pub async fn run(&self) -> std::io::Result<()> {
        let router = router(self.engine.clone());

        info!("Starting gate API on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
