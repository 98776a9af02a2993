//! End-to-end HTTP tests against the full router, over in-memory backends.

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use deskline::api;
use deskline::models::Role;

use common::{harness, harness_with, Harness, PASSWORD};

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn request(method: Method, uri: &str, auth: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn login(app: &Router, email: &str, password: &str) -> (StatusCode, Value) {
    send(
        app,
        request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": email, "password": password })),
        ),
    )
    .await
}

fn app(h: &Harness) -> Router {
    api::router(h.state.clone())
}

// -- Sessions --

#[tokio::test]
async fn test_register_login_profile_logout() {
    let h = harness();
    let app = app(&h);

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({
                "email": "New.Customer@Example.com",
                "password": PASSWORD,
                "full_name": "New Customer"
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["role"], "user");
    assert_eq!(body["data"]["email"], "new.customer@example.com");
    assert!(body["data"].get("password_hash").is_none());

    let (status, body) = login(&app, "new.customer@example.com", PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["token_type"], "Bearer");
    assert!(body["data"]["refresh_token"].is_string());
    let bearer = format!("Bearer {}", body["data"]["access_token"].as_str().unwrap());

    let (status, body) = send(
        &app,
        request(Method::GET, "/api/user/profile", Some(&bearer), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["full_name"], "New Customer");
    assert!(body["data"]["last_login_at"].is_string());

    let (status, _) = send(
        &app,
        request(Method::POST, "/api/auth/logout", Some(&bearer), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // The token is still within its lifetime but is now on the ledger.
    let (status, body) = send(
        &app,
        request(Method::GET, "/api/user/profile", Some(&bearer), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], true);
    assert_eq!(body["message"], "Invalid or expired token");
    assert_eq!(h.store.revocation_count().await, 1);
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let h = harness();
    let app = app(&h);
    h.account("taken@example.com", Role::User).await;

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({
                "email": "TAKEN@example.com",
                "password": PASSWORD,
                "full_name": "Someone"
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "Email already registered");
}

#[tokio::test]
async fn test_wrong_password_and_unknown_email_look_the_same() {
    let h = harness();
    let app = app(&h);
    h.account("agent@example.com", Role::Agent).await;

    let (wrong_status, wrong) = login(&app, "agent@example.com", "not-the-password").await;
    let (unknown_status, unknown) = login(&app, "ghost@example.com", PASSWORD).await;
    assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong["message"], unknown["message"]);
}

#[tokio::test]
async fn test_login_throttle_rejects_attempt_after_limit() {
    let h = harness_with(|key| match key {
        "DESKLINE_LOGIN_MAX_ATTEMPTS" => Some("3".to_string()),
        _ => None,
    });
    let app = app(&h);
    h.account("agent@example.com", Role::Agent).await;

    for _ in 0..3 {
        let (status, _) = login(&app, "agent@example.com", "wrong-password").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // Even the right password is refused once the window is exhausted.
    let resp = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "agent@example.com", "password": PASSWORD })),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        resp.headers().get(header::RETRY_AFTER).unwrap().to_str().unwrap(),
        "900"
    );

    // Another account is unaffected.
    h.account("other@example.com", Role::Agent).await;
    let (status, _) = login(&app, "other@example.com", PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_successful_login_resets_throttle() {
    let h = harness_with(|key| match key {
        "DESKLINE_LOGIN_MAX_ATTEMPTS" => Some("3".to_string()),
        _ => None,
    });
    let app = app(&h);
    h.account("agent@example.com", Role::Agent).await;

    login(&app, "agent@example.com", "wrong-password").await;
    login(&app, "agent@example.com", "wrong-password").await;
    let (status, _) = login(&app, "agent@example.com", PASSWORD).await;
    assert_eq!(status, StatusCode::OK);

    // The counter starts over, so two more misses are still answered normally.
    login(&app, "agent@example.com", "wrong-password").await;
    let (status, _) = login(&app, "agent@example.com", "wrong-password").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_fails_closed_when_store_is_down() {
    let h = harness();
    let app = app(&h);
    h.account("agent@example.com", Role::Agent).await;
    h.store.set_offline(true);

    let (status, _) = login(&app, "agent@example.com", PASSWORD).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_login_without_cache_still_issues_access_token() {
    let h = harness();
    let app = app(&h);
    h.account("agent@example.com", Role::Agent).await;
    h.cache.set_offline(true);

    let (status, body) = login(&app, "agent@example.com", PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["access_token"].is_string());
    assert!(body["data"]["refresh_token"].is_null());
}

#[tokio::test]
async fn test_refresh_rotates_token() {
    let h = harness();
    let app = app(&h);
    let user = h.account("customer@example.com", Role::User).await;

    let (_, body) = login(&app, "customer@example.com", PASSWORD).await;
    let refresh_token = body["data"]["refresh_token"].as_str().unwrap().to_string();
    let refresh = |token: &str| {
        request(
            Method::POST,
            "/api/auth/refresh",
            None,
            Some(json!({ "user_id": user.id, "refresh_token": token })),
        )
    };

    let (status, body) = send(&app, refresh(&refresh_token)).await;
    assert_eq!(status, StatusCode::OK);
    let rotated = body["data"]["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(rotated, refresh_token);

    // The presented token was consumed.
    let (status, _) = send(&app, refresh(&refresh_token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app, refresh(&rotated)).await;
    assert_eq!(status, StatusCode::OK);
}

// -- Role gates --

#[tokio::test]
async fn test_route_groups_admit_only_their_roles() {
    let h = harness();
    let app = app(&h);
    let customer = h.identity("customer@example.com", Role::User).await;
    let agent = h.identity("agent@example.com", Role::Agent).await;
    let admin = h.identity("admin@example.com", Role::Admin).await;

    let cases = [
        ("/api/agent/conversations", h.bearer(customer), StatusCode::UNAUTHORIZED),
        ("/api/agent/conversations", h.bearer(admin), StatusCode::UNAUTHORIZED),
        ("/api/agent/conversations", h.bearer(agent), StatusCode::OK),
        ("/api/user/conversations", h.bearer(agent), StatusCode::UNAUTHORIZED),
        ("/api/user/conversations", h.bearer(customer), StatusCode::OK),
        ("/api/admin/users", h.bearer(agent), StatusCode::UNAUTHORIZED),
        ("/api/admin/users", h.bearer(admin), StatusCode::OK),
        ("/api/user/profile", h.bearer(admin), StatusCode::OK),
    ];
    for (uri, bearer, expected) in cases {
        let (status, _) = send(&app, request(Method::GET, uri, Some(&bearer), None)).await;
        assert_eq!(status, expected, "{} as {}", uri, bearer);
    }

    let (status, body) = send(&app, request(Method::GET, "/api/agent/conversations", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Authorization header required");
}

#[tokio::test]
async fn test_unknown_route_uses_error_shape() {
    let h = harness();
    let (status, body) = send(&app(&h), request(Method::GET, "/api/nope", None, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], true);
}

// -- Conversations --

#[tokio::test]
async fn test_conversation_lifecycle_over_http() {
    let h = harness();
    let app = app(&h);
    let customer = h.bearer(h.identity("customer@example.com", Role::User).await);
    let agent = h.bearer(h.identity("agent@example.com", Role::Agent).await);
    let admin = h.bearer(h.identity("admin@example.com", Role::Admin).await);

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/user/channels",
            Some(&customer),
            Some(json!({ "message": "  where is my parcel?  " })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["channel"]["status"], "open");
    assert_eq!(body["data"]["message"]["message"], "where is my parcel?");
    let id = body["data"]["channel"]["id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        request(Method::GET, "/api/agent/channels/available", Some(&agent), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    // Not yet assigned, so invisible to the agent.
    let detail_uri = format!("/api/agent/channels/{}", id);
    let (status, _) = send(&app, request(Method::GET, &detail_uri, Some(&agent), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        request(
            Method::PATCH,
            &format!("/api/agent/channels/{}/assign", id),
            Some(&agent),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "assigned");

    let (status, body) = send(
        &app,
        request(Method::GET, "/api/agent/conversations?status=assigned", Some(&agent), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["data"][0]["unread_count"], 1);

    let (status, body) = send(&app, request(Method::GET, &detail_uri, Some(&agent), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["messages"].as_array().unwrap().len(), 1);

    let (status, body) = send(
        &app,
        request(Method::GET, "/api/agent/channels/stats", Some(&agent), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["assigned"], 1);
    assert_eq!(body["data"]["unread"], 0);

    let (status, _) = send(
        &app,
        request(
            Method::POST,
            &format!("/api/agent/channels/{}/messages", id),
            Some(&agent),
            Some(json!({ "message": "It ships tomorrow." })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Admins observe but cannot post.
    let (status, _) = send(
        &app,
        request(Method::GET, &format!("/api/conversations/{}", id), Some(&admin), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        request(Method::GET, "/api/user/conversations", Some(&customer), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["unread_count"], 1);
    assert_eq!(body["data"][0]["last_message"]["message"], "It ships tomorrow.");

    let (status, _) = send(
        &app,
        request(
            Method::POST,
            &format!("/api/agent/channels/{}/close", id),
            Some(&agent),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        request(
            Method::POST,
            &format!("/api/user/channels/{}/messages", id),
            Some(&customer),
            Some(json!({ "message": "thanks" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_reassignment_requires_active_agent() {
    let h = harness();
    let app = app(&h);
    let customer = h.identity("customer@example.com", Role::User).await;
    let other_customer = h.identity("other@example.com", Role::User).await;
    let agent = h.identity("agent@example.com", Role::Agent).await;
    let admin = h.bearer(h.identity("admin@example.com", Role::Admin).await);
    let (channel, _) = h
        .state
        .desk
        .create_channel(customer, None, "hello")
        .await
        .unwrap();
    let uri = format!("/api/admin/channels/{}/assign", channel.id);

    let (status, _) = send(
        &app,
        request(
            Method::PATCH,
            &uri,
            Some(&admin),
            Some(json!({ "agent_id": other_customer.user_id })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        request(
            Method::PATCH,
            &uri,
            Some(&admin),
            Some(json!({ "agent_id": agent.user_id })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["assigned_agent_id"], agent.user_id);
}

#[tokio::test]
async fn test_bad_path_id_and_query_are_validation_errors() {
    let h = harness();
    let app = app(&h);
    let agent = h.bearer(h.identity("agent@example.com", Role::Agent).await);

    let (status, body) = send(
        &app,
        request(Method::GET, "/api/agent/channels/abc", Some(&agent), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], true);

    let (status, _) = send(
        &app,
        request(Method::GET, "/api/agent/conversations?offset=-5", Some(&agent), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        request(Method::GET, "/api/agent/conversations?status=pending", Some(&agent), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_body_is_validation_error() {
    let h = harness();
    let app = app(&h);
    let customer = h.bearer(h.identity("customer@example.com", Role::User).await);

    let (status, body) = send(
        &app,
        request(Method::POST, "/api/user/channels", Some(&customer), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Invalid request body"));
}
