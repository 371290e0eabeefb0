mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{test_config, MockBackend, RecordingTransport, ADMIN, MEMBER};
use searchbot_kernel::{ManualClock, SystemClock};
use searchbot_server::auth::AuthGate;
use searchbot_server::build_app_with;
use serde_json::{json, Value};
use tower::util::ServiceExt;

async fn app() -> (Router, Arc<RecordingTransport>, MockBackend) {
    let (mock, url) = MockBackend::start().await;
    let transport = Arc::new(RecordingTransport::default());
    let app = build_app_with(test_config(&url), transport.clone(), Arc::new(SystemClock))
        .await
        .unwrap();
    (app, transport, mock)
}

fn token_for(user_id: i64) -> String {
    let cfg = test_config("http://unused");
    AuthGate::new(&cfg.auth, &cfg.backend.jwt_secret, Arc::new(ManualClock::default()))
        .issue_token(user_id, 5)
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn admin_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn healthz_ok() {
    let (app, _, _) = app().await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn webhook_rejects_wrong_secret() {
    let (app, transport, _) = app().await;
    let update = json!({
        "update_id": 1,
        "message": {"from": {"id": MEMBER}, "chat": {"id": 10}, "text": "/help"}
    });
    let mut request = post_json("/telegram/webhook", &update);
    request
        .headers_mut()
        .insert("x-telegram-bot-api-secret-token", "wrong".parse().unwrap());

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "unauthorized");
    assert_eq!(transport.count(), 0);
}

#[tokio::test]
async fn webhook_accepts_update_and_replies() {
    let (app, transport, _) = app().await;
    let update = json!({
        "update_id": 2,
        "message": {"from": {"id": MEMBER, "first_name": "Ada"}, "chat": {"id": 10}, "text": "/start"}
    });
    let mut request = post_json("/telegram/webhook", &update);
    request
        .headers_mut()
        .insert("x-telegram-bot-api-secret-token", "hook-secret".parse().unwrap());

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "ok"}));

    // handling runs on a spawned task
    for _ in 0..50 {
        if transport.count() > 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    let reply = transport.last();
    assert_eq!(reply.chat_id, 10);
    assert!(reply.text.starts_with("Welcome, Ada!"));
}

#[tokio::test]
async fn job_callback_for_unknown_job_is_dropped() {
    let (app, transport, _) = app().await;
    let response = app
        .oneshot(post_json(
            "/v1/job-callback",
            &json!({"job_id": "job-nobody", "status": "completed"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"status": "dropped", "reason": "unknown_job"})
    );
    assert_eq!(transport.count(), 0);
}

#[tokio::test]
async fn job_callback_requires_job_id() {
    let (app, _, _) = app().await;
    let response = app
        .oneshot(post_json(
            "/v1/job-callback",
            &json!({"job_id": "  ", "status": "completed"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_routes_require_admin_token() {
    let (app, _, _) = app().await;

    let missing = app
        .clone()
        .oneshot(admin_request("GET", "/admin/users", None))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let forged = app
        .clone()
        .oneshot(admin_request("GET", "/admin/users", Some("a.b.c")))
        .await
        .unwrap();
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);

    let member = token_for(MEMBER);
    let forbidden = app
        .oneshot(admin_request("GET", "/admin/stats", Some(&member)))
        .await
        .unwrap();
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_can_manage_users() {
    let (app, _, _) = app().await;
    let token = token_for(ADMIN);

    let added = app
        .clone()
        .oneshot(admin_request("POST", "/admin/users/4242", Some(&token)))
        .await
        .unwrap();
    assert_eq!(added.status(), StatusCode::OK);
    assert_eq!(body_json(added).await["success"], true);

    let users = app
        .clone()
        .oneshot(admin_request("GET", "/admin/users", Some(&token)))
        .await
        .unwrap();
    let users = body_json(users).await;
    assert_eq!(users["allow_all"], false);
    let ids: Vec<i64> = users["users"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|u| u["user_id"].as_i64())
        .collect();
    assert_eq!(ids, vec![ADMIN, MEMBER, 4242]);
    assert_eq!(users["users"][0]["is_admin"], true);

    let admin_removal = app
        .clone()
        .oneshot(admin_request("DELETE", &format!("/admin/users/{ADMIN}"), Some(&token)))
        .await
        .unwrap();
    assert_eq!(body_json(admin_removal).await["success"], false);

    let removed = app
        .clone()
        .oneshot(admin_request("DELETE", "/admin/users/4242", Some(&token)))
        .await
        .unwrap();
    assert_eq!(body_json(removed).await["success"], true);

    let stats = app
        .oneshot(admin_request("GET", "/admin/stats", Some(&token)))
        .await
        .unwrap();
    let stats = body_json(stats).await;
    assert_eq!(stats["authorized_users"], 2);
    assert_eq!(stats["admin_users"], 1);
    assert_eq!(stats["counters"]["searches"], 0);
}
