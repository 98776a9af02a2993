use serde::{Deserialize, Serialize};
use std::fmt;

/// The three trust domains. Each role has its own signing secret, so a role is
/// never inferred from anything but the secret that verified the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Agent,
    User,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Agent, Role::User];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "agent" => Some(Role::Agent),
            "user" => Some(Role::User),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Agent => "agent",
            Role::User => "user",
        }
    }

    /// Access token lifetime. Admin sessions are the shortest-lived,
    /// customer sessions the longest.
    pub fn token_lifetime(&self) -> chrono::Duration {
        match self {
            Role::Admin => chrono::Duration::hours(2),
            Role::Agent => chrono::Duration::hours(10),
            Role::User => chrono::Duration::hours(24),
        }
    }

    /// The conversation party this role reads as, if any. Admins are
    /// observers and never acknowledge messages.
    pub fn viewer(&self) -> Option<Viewer> {
        match self {
            Role::Agent => Some(Viewer::Agent),
            Role::User => Some(Viewer::Customer),
            Role::Admin => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verified actor. An id is only meaningful together with its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: i64,
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: i64, role: Role) -> Self {
        Self { user_id, role }
    }
}

/// One side of a conversation, used to scope unread counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Viewer {
    Agent,
    Customer,
}

impl Viewer {
    /// Key segment. Matches the role name of the reading party.
    pub fn as_str(&self) -> &'static str {
        match self {
            Viewer::Agent => "agent",
            Viewer::Customer => "user",
        }
    }
}
