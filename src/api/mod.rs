use std::sync::Arc;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    middleware,
    routing::{get, patch, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::middleware::auth::{
    require_admin, require_agent, require_any, require_staff, require_user,
};
use crate::AppState;

pub mod auth;
pub mod conversations;
pub mod users;

// ── Response envelope ────────────────────────────────────────

pub fn ok<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<Value>) {
    (StatusCode::CREATED, ok(data))
}

/// Unwrap a JSON body, reporting a malformed one in the standard error shape.
pub fn body<T: DeserializeOwned>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| AppError::validation(format!("Invalid request body: {}", e.body_text())))
}

pub fn parse_id(raw: &str) -> Result<i64, AppError> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::validation("id must be a positive integer"))
}

/// Build the `/api` router. Each route group sits behind the gate for the
/// roles it admits.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let public = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh));

    let session = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/user/profile", get(auth::profile))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_any));

    let customer = Router::new()
        .route("/user/channels", post(conversations::create_channel))
        .route("/user/conversations", get(conversations::customer_conversations))
        .route("/user/channels/:id", get(conversations::channel_detail))
        .route("/user/channels/:id/messages", post(conversations::send_message))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_user));

    let agent = Router::new()
        .route("/agent/conversations", get(conversations::agent_conversations))
        .route("/agent/channels/available", get(conversations::available_channels))
        .route("/agent/channels/stats", get(conversations::agent_stats))
        .route("/agent/channels/:id", get(conversations::channel_detail))
        .route("/agent/channels/:id/assign", patch(conversations::claim_channel))
        .route("/agent/channels/:id/close", post(conversations::close_channel))
        .route("/agent/channels/:id/messages", post(conversations::send_message))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_agent));

    let admin = Router::new()
        .route("/admin/users", get(users::list_users).post(users::create_user))
        .route("/admin/channels/available", get(conversations::available_channels))
        .route("/admin/channels/:id/assign", patch(conversations::assign_channel))
        .route("/admin/channels/:id/close", post(conversations::close_channel))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let staff = Router::new()
        .route("/conversations/:id", get(conversations::channel_detail))
        .route_layer(middleware::from_fn_with_state(state, require_staff));

    Router::new()
        .merge(public)
        .merge(session)
        .merge(customer)
        .merge(agent)
        .merge(admin)
        .merge(staff)
        .fallback(fallback_404)
}

async fn fallback_404() -> AppError {
    AppError::NotFound("Route not found".to_string())
}

/// Full application router with shared state applied: `/api` plus health.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .nest("/api", api_router(state.clone()))
        .with_state(state)
}
