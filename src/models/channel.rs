use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Open,
    Assigned,
    Closed,
}

impl ChannelStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(ChannelStatus::Open),
            "assigned" => Some(ChannelStatus::Assigned),
            "closed" => Some(ChannelStatus::Closed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Open => "open",
            ChannelStatus::Assigned => "assigned",
            ChannelStatus::Closed => "closed",
        }
    }
}

/// A customer support conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub tenant_id: i64,
    pub customer_id: i64,
    pub status: ChannelStatus,
    /// 0 while unassigned.
    pub assigned_agent_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Channel {
    pub fn is_closed(&self) -> bool {
        self.status == ChannelStatus::Closed
    }

    pub fn is_assigned_to(&self, agent_id: i64) -> bool {
        agent_id != 0 && self.assigned_agent_id == agent_id
    }
}

/// Status filter accepted by the conversation list endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Only(ChannelStatus),
}

impl StatusFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "" | "all" => Some(StatusFilter::All),
            other => ChannelStatus::parse(other).map(StatusFilter::Only),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusFilter::All => "all",
            StatusFilter::Only(status) => status.as_str(),
        }
    }

    pub fn matches(&self, status: ChannelStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(wanted) => *wanted == status,
        }
    }
}
