//! Account creation shared by self-registration, the admin API and the CLI.

use crate::auth::password::{hash_password_blocking, MIN_PASSWORD_LEN};
use crate::errors::AppError;
use crate::models::{NewUser, Role, User};
use crate::mutations::DEFAULT_TENANT_ID;
use crate::store::SupportStore;

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: Role,
}

fn validate(account: &NewAccount) -> Result<(), AppError> {
    let email = account.email.trim();
    let well_formed = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !well_formed {
        return Err(AppError::validation("a valid email is required"));
    }
    if account.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if account.full_name.trim().is_empty() {
        return Err(AppError::validation("full_name is required"));
    }
    Ok(())
}

/// Store failures fail closed with `DependencyUnavailable`.
pub async fn create_account(
    store: &dyn SupportStore,
    account: NewAccount,
) -> Result<User, AppError> {
    validate(&account)?;
    let password_hash = hash_password_blocking(account.password.clone()).await?;
    let new_user = NewUser {
        tenant_id: DEFAULT_TENANT_ID,
        email: account.email.trim().to_lowercase(),
        password_hash,
        full_name: account.full_name.trim().to_string(),
        role: account.role,
    };
    let user = store
        .create_user(&new_user)
        .await
        .map_err(AppError::unavailable)?
        .ok_or_else(|| AppError::Conflict("Email already registered".to_string()))?;
    tracing::info!(user_id = user.id, role = %user.role, "account created");
    Ok(user)
}
