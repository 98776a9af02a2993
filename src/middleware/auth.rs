//! Role gates for route groups.
//!
//! Each gate reads the bearer token, checks the revocation ledger, then
//! verifies the signature against only the roles the group admits. On
//! success an [`AuthContext`] is inserted into the request extensions.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::errors::AppError;
use crate::models::{Identity, Role};
use crate::AppState;

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub identity: Identity,
    /// The raw bearer string, kept for logout.
    pub token: String,
}

/// `Authorization: Bearer <token>`. Anything else is `Unauthorized`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AppError::Unauthorized)
}

async fn authorize(
    state: &AppState,
    mut req: Request,
    next: Next,
    roles: &[Role],
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers())?.to_string();
    let identity = state.tokens.authenticate(&token, roles).await?;
    req.extensions_mut().insert(AuthContext { identity, token });
    Ok(next.run(req).await)
}

pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    authorize(&state, req, next, &[Role::Admin]).await
}

pub async fn require_agent(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    authorize(&state, req, next, &[Role::Agent]).await
}

pub async fn require_user(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    authorize(&state, req, next, &[Role::User]).await
}

/// Admins and agents.
pub async fn require_staff(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    authorize(&state, req, next, &[Role::Admin, Role::Agent]).await
}

pub async fn require_any(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    authorize(&state, req, next, &Role::ALL).await
}
