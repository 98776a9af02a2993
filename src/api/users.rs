use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use super::{body, created, ok};
use crate::accounts::{create_account, NewAccount};
use crate::errors::AppError;
use crate::models::Role;
use crate::AppState;

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: String,
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let users = state
        .store
        .list_users()
        .await
        .map_err(AppError::unavailable)?;
    Ok(ok(users))
}

/// Admins create accounts of any role, including other admins and agents.
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = body(payload)?;
    let role = Role::parse(&req.role)
        .ok_or_else(|| AppError::validation("Invalid role. Must be admin, agent, or user"))?;
    let user = create_account(
        state.store.as_ref(),
        NewAccount {
            email: req.email,
            password: req.password,
            full_name: req.full_name,
            role,
        },
    )
    .await?;
    Ok(created(user))
}
