use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::auth::TokenError;

/// Every token verification failure is reported to clients with this one
/// message, so a response never reveals which signing domain was tried.
const TOKEN_REJECTED: &str = "Invalid or expired token";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing or malformed authorization header")]
    Unauthorized,

    #[error("invalid token")]
    InvalidToken,

    #[error("expired token")]
    ExpiredToken,

    #[error("token role mismatch")]
    RoleMismatch,

    #[error("revoked token")]
    RevokedToken,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn not_found(what: &str) -> Self {
        AppError::NotFound(format!("{} not found", what))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    /// Relational store failure on a path that must fail closed.
    pub fn unavailable(e: anyhow::Error) -> Self {
        AppError::DependencyUnavailable(e.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized
            | AppError::InvalidToken
            | AppError::ExpiredToken
            | AppError::RoleMismatch
            | AppError::RevokedToken
            | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::DependencyUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Unauthorized => "Authorization header required".to_string(),
            AppError::InvalidToken
            | AppError::ExpiredToken
            | AppError::RoleMismatch
            | AppError::RevokedToken => TOKEN_REJECTED.to_string(),
            AppError::InvalidCredentials => "Invalid email or password".to_string(),
            AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::Validation(msg) => msg.clone(),
            AppError::RateLimited { .. } => {
                "Too many failed attempts. Please try again later.".to_string()
            }
            AppError::DependencyUnavailable(_) => "Service temporarily unavailable".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Invalid => AppError::InvalidToken,
            TokenError::Expired => AppError::ExpiredToken,
            TokenError::RoleMismatch => AppError::RoleMismatch,
            TokenError::Revoked => AppError::RevokedToken,
            TokenError::Unavailable(e) => AppError::unavailable(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::DependencyUnavailable(e) => {
                tracing::error!(error = %e, "dependency unavailable");
            }
            AppError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
            }
            AppError::InvalidToken
            | AppError::ExpiredToken
            | AppError::RoleMismatch
            | AppError::RevokedToken => {
                tracing::debug!(reason = %self, "token rejected");
            }
            _ => {}
        }

        let body = Json(json!({
            "error": true,
            "message": self.client_message(),
        }));

        let mut response = (self.status(), body).into_response();

        if let AppError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
        }

        response
    }
}
