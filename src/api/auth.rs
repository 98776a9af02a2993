use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{body, created, ok};
use crate::accounts::{create_account, NewAccount};
use crate::auth::password::{verify_nothing_blocking, verify_password_blocking};
use crate::errors::AppError;
use crate::middleware::auth::AuthContext;
use crate::middleware::rate_limit::login_key;
use crate::models::{Role, User};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub user_id: i64,
    pub refresh_token: String,
}

#[derive(Deserialize, Default)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub access_token: String,
    pub token_type: &'static str,
    /// Unix seconds.
    pub expires_at: i64,
    pub expires_in: i64,
    /// Absent when the cache store could not record one.
    pub refresh_token: Option<String>,
    pub user: User,
}

async fn open_session(state: &AppState, user: User) -> Result<SessionResponse, AppError> {
    let issued = state.tokens.issue(user.id, user.role)?;
    let refresh_token = match state.tokens.issue_refresh(user.id).await {
        Ok(token) => Some(token),
        Err(e) => {
            tracing::warn!(user_id = user.id, error = %e, "refresh token not stored");
            None
        }
    };
    Ok(SessionResponse {
        access_token: issued.token,
        token_type: "Bearer",
        expires_at: issued.expires_at.timestamp(),
        expires_in: (issued.expires_at - Utc::now()).num_seconds().max(0),
        refresh_token,
        user,
    })
}

// ── Handlers ─────────────────────────────────────────────────

/// Self-registration always creates a customer account.
pub async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = body(payload)?;
    let user = create_account(
        state.store.as_ref(),
        NewAccount {
            email: req.email,
            password: req.password,
            full_name: req.full_name,
            role: Role::User,
        },
    )
    .await?;
    Ok(created(user))
}

/// Every attempt counts against the account's window; a success resets it.
pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = body(payload)?;
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || req.password.is_empty() {
        return Err(AppError::validation("email and password are required"));
    }

    let key = login_key(&email);
    let decision = state.limiter.check_and_increment(&key).await;
    if decision.limited {
        tracing::warn!(email = %email, attempts = decision.count, "login throttled");
        return Err(AppError::RateLimited {
            retry_after_secs: state.limiter.window().as_secs(),
        });
    }

    let Some(user) = state
        .store
        .find_user_by_email(&email)
        .await
        .map_err(AppError::unavailable)?
    else {
        verify_nothing_blocking(req.password).await?;
        return Err(AppError::InvalidCredentials);
    };

    if !verify_password_blocking(req.password, user.password_hash.clone()).await? {
        return Err(AppError::InvalidCredentials);
    }
    if !user.is_active {
        return Err(AppError::Forbidden("Account is disabled".to_string()));
    }

    state.limiter.reset(&key).await;
    if let Err(e) = state.store.record_login(user.id).await {
        tracing::warn!(user_id = user.id, error = %e, "failed to record login time");
    }
    tracing::info!(user_id = user.id, role = %user.role, "login succeeded");

    Ok(ok(open_session(&state, user).await?))
}

/// Exchange a refresh token for a new session. The presented token is
/// consumed.
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = body(payload)?;
    let consumed = state
        .tokens
        .consume_refresh(req.user_id, &req.refresh_token)
        .await
        .map_err(AppError::unavailable)?;
    if !consumed {
        return Err(AppError::InvalidToken);
    }

    let user = state
        .store
        .get_user(req.user_id)
        .await
        .map_err(AppError::unavailable)?
        .filter(|u| u.is_active)
        .ok_or(AppError::InvalidToken)?;

    Ok(ok(open_session(&state, user).await?))
}

/// Revokes the presented access token for the rest of its lifetime, and the
/// refresh token too when one is supplied.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    payload: Option<Json<LogoutRequest>>,
) -> Result<impl IntoResponse, AppError> {
    state
        .tokens
        .revoke_access(&auth.token, &[auth.identity.role])
        .await?;

    let req = payload.map(|Json(r)| r).unwrap_or_default();
    if let Some(refresh_token) = req.refresh_token.filter(|t| !t.is_empty()) {
        if let Err(e) = state
            .tokens
            .revoke_refresh(auth.identity.user_id, &refresh_token)
            .await
        {
            tracing::warn!(user_id = auth.identity.user_id, error = %e, "refresh token not revoked");
        }
    }

    Ok(ok(serde_json::json!({ "message": "Successfully logged out" })))
}

pub async fn profile(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .store
        .get_user(auth.identity.user_id)
        .await
        .map_err(AppError::unavailable)?
        .ok_or_else(|| AppError::not_found("User"))?;
    Ok(ok(user))
}
