use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::role::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub tenant_id: i64,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub tenant_id: i64,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub role: Role,
}

/// The customer fields embedded in conversation rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerSummary {
    pub id: i64,
    pub full_name: String,
    pub email: String,
}

impl CustomerSummary {
    /// Placeholder for channels whose customer row is gone.
    pub fn unknown(id: i64) -> Self {
        Self {
            id,
            full_name: "Unknown".to_string(),
            email: "unknown@email.com".to_string(),
        }
    }
}

impl From<&User> for CustomerSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            full_name: user.full_name.clone(),
            email: user.email.clone(),
        }
    }
}
