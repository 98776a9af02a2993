use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::role::Viewer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    Customer,
    Agent,
}

impl SenderType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "customer" => Some(SenderType::Customer),
            "agent" => Some(SenderType::Agent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::Customer => "customer",
            SenderType::Agent => "agent",
        }
    }

    /// Messages a viewer has not yet read are the ones the other party wrote.
    pub fn unread_for(viewer: Viewer) -> Self {
        match viewer {
            Viewer::Agent => SenderType::Customer,
            Viewer::Customer => SenderType::Agent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub channel_id: i64,
    pub sender_type: SenderType,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
