//! HTTP gating adapter tests

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use gate_rs::access_code::NewAccessCode;
use gate_rs::api::router;
use gate_rs::clock::SystemClock;
use gate_rs::directory::StaticDirectory;
use gate_rs::principal::PrincipalId;
use gate_rs::store::Stores;
use gate_rs::{Engine, GateConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    engine: Arc<Engine>,
}

async fn setup() -> TestApp {
    let config = GateConfig::default();
    let directory = Arc::new(StaticDirectory::from_config(&config));
    directory.set_user("ops", "operator", true).await;
    let engine = Arc::new(Engine::new(
        &config,
        Stores::memory(),
        directory.clone(),
        directory,
        Arc::new(SystemClock),
    ));
    engine
        .create_access_code(&NewAccessCode {
            code: Some("GUEST001".to_string()),
            data_quota_mb: 100.0,
            time_quota_minutes: 120,
            max_uses: 5,
            valid_for_minutes: 60,
        })
        .await
        .unwrap();

    TestApp {
        router: router(engine.clone()),
        engine,
    }
}

async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn redeem(app: &TestApp) -> (String, String) {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/guest/redeem",
        None,
        Some(json!({ "code": "GUEST001" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let token = body["tokens"]["access"]["token"].as_str().unwrap().to_string();
    let session_id = body["session"]["id"].as_str().unwrap().to_string();
    (token, session_id)
}

async fn operator_token(app: &TestApp) -> String {
    let login = app
        .engine
        .open_user_session(&PrincipalId::new("ops"))
        .await
        .unwrap();
    login.tokens.access.token
}

#[tokio::test]
async fn test_health() {
    let app = setup().await;
    let (status, body) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_redeem_then_status() {
    let app = setup().await;
    let (token, session_id) = redeem(&app).await;

    let (status, body) = send(&app, Method::GET, "/api/session/status", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "guest");
    assert_eq!(body["session"]["id"], session_id.as_str());
    assert_eq!(body["session"]["status"], "active");
}

#[tokio::test]
async fn test_unknown_code_is_forbidden() {
    let app = setup().await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/guest/redeem",
        None,
        Some(json!({ "code": "WRONG" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_missing_or_bad_token_is_unauthorized() {
    let app = setup().await;
    let (status, _) = send(&app, Method::GET, "/api/session/status", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        Method::GET,
        "/api/session/status",
        Some("not-a-token"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_routes_need_admin_permission() {
    let app = setup().await;
    let (guest_token, _) = redeem(&app).await;

    let (status, _) = send(&app, Method::GET, "/api/admin/codes", Some(&guest_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let ops = operator_token(&app).await;
    let (status, body) = send(&app, Method::GET, "/api/admin/codes", Some(&ops), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["code"], "GUEST001");
    assert_eq!(body[0]["uses_remaining"], 4);
}

#[tokio::test]
async fn test_quota_exceeded_is_too_many_requests() {
    let app = setup().await;
    let (guest_token, session_id) = redeem(&app).await;
    let ops = operator_token(&app).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/usage",
        Some(&ops),
        Some(json!({ "session_id": session_id, "data_mb": 150.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["data_used"], 150.0);

    let (status, _) = send(
        &app,
        Method::GET,
        "/api/session/status",
        Some(&guest_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_guest_cannot_report_usage() {
    let app = setup().await;
    let (guest_token, session_id) = redeem(&app).await;

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/usage",
        Some(&guest_token),
        Some(json!({ "session_id": session_id, "data_mb": 1.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_pause_resume_logout() {
    let app = setup().await;
    let (token, _) = redeem(&app).await;

    let (status, body) = send(&app, Method::POST, "/api/session/pause", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "paused");

    let (status, _) = send(&app, Method::GET, "/api/session/status", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, Method::POST, "/api/session/resume", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");

    let (status, body) = send(&app, Method::POST, "/api/session/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "terminated");

    let (status, _) = send(&app, Method::GET, "/api/session/status", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_terminate_and_adjust() {
    let app = setup().await;
    let (guest_token, session_id) = redeem(&app).await;
    let ops = operator_token(&app).await;

    let uri = format!("/api/admin/sessions/{}/terminate", session_id);
    let (status, body) = send(&app, Method::POST, &uri, Some(&ops), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "terminated");
    let (status, _) = send(
        &app,
        Method::GET,
        "/api/session/status",
        Some(&guest_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &app,
        Method::PUT,
        "/api/admin/quotas/ops/daily",
        Some(&ops),
        Some(json!({ "data_mb": 250.0, "time_minutes": 90 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["limits"]["data_mb"], 250.0);
    assert_eq!(body["limits"]["time_minutes"], 90);

    let (status, _) = send(
        &app,
        Method::PUT,
        "/api/admin/quotas/ops/yearly",
        Some(&ops),
        Some(json!({ "data_mb": 250.0, "time_minutes": 90 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_quota_admin_unknown_principal_is_not_found() {
    let app = setup().await;
    let ops = operator_token(&app).await;

    let (status, _) = send(
        &app,
        Method::PUT,
        "/api/admin/quotas/no-such-user/daily",
        Some(&ops),
        Some(json!({ "data_mb": 250.0, "time_minutes": 90 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Method::GET,
        "/api/admin/quotas/no-such-user",
        Some(&ops),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_code_with_huge_validity_is_bad_request() {
    let app = setup().await;
    let ops = operator_token(&app).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/admin/codes",
        Some(&ops),
        Some(json!({
            "code": "FOREVER",
            "data_quota_mb": 100.0,
            "time_quota_minutes": 60,
            "max_uses": 1,
            "valid_for_minutes": i64::MAX,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_flush_permission_cache() {
    let app = setup().await;
    let ops = operator_token(&app).await;
    let (guest_token, _) = redeem(&app).await;
    let (status, _) = send(&app, Method::GET, "/api/session/status", Some(&guest_token), None).await;
    assert_eq!(status, StatusCode::OK);

    let uri = "/api/admin/permissions/invalidate";
    let (status, body) = send(&app, Method::POST, uri, Some(&guest_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].is_string());

    let (status, body) = send(&app, Method::POST, uri, Some(&ops), None).await;
    assert_eq!(status, StatusCode::OK);
    // The guest and the operator
    assert_eq!(body["entries_dropped"], 2);

    // Permissions are re-resolved on the next request
    let (status, _) = send(&app, Method::GET, "/api/session/status", Some(&guest_token), None).await;
    assert_eq!(status, StatusCode::OK);
}
