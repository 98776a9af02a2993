//! Read-model payloads. Everything here round-trips through the cache store
//! as JSON, so every type is both `Serialize` and `Deserialize`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::channel::{Channel, ChannelStatus};
use super::message::Message;
use super::user::CustomerSummary;

/// One row of a conversation list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: i64,
    pub tenant_id: i64,
    pub customer_id: i64,
    pub customer_name: String,
    pub customer_email: String,
    pub status: ChannelStatus,
    pub assigned_agent_id: i64,
    pub last_message: Option<Message>,
    pub unread_count: i64,
}

impl ConversationSummary {
    pub fn compose(
        channel: &Channel,
        customer: &CustomerSummary,
        last_message: Option<Message>,
        unread_count: i64,
    ) -> Self {
        Self {
            id: channel.id,
            tenant_id: channel.tenant_id,
            customer_id: channel.customer_id,
            customer_name: customer.full_name.clone(),
            customer_email: customer.email.clone(),
            status: channel.status,
            assigned_agent_id: channel.assigned_agent_id,
            last_message,
            unread_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationPage {
    pub data: Vec<ConversationSummary>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelView {
    pub id: i64,
    pub tenant_id: i64,
    pub customer_id: i64,
    pub customer_name: String,
    pub customer_email: String,
    pub status: ChannelStatus,
    pub assigned_agent_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDetail {
    pub channel: ChannelView,
    pub messages: Vec<Message>,
}

impl ChannelDetail {
    pub fn compose(channel: &Channel, customer: &CustomerSummary, messages: Vec<Message>) -> Self {
        Self {
            channel: ChannelView {
                id: channel.id,
                tenant_id: channel.tenant_id,
                customer_id: channel.customer_id,
                customer_name: customer.full_name.clone(),
                customer_email: customer.email.clone(),
                status: channel.status,
                assigned_agent_id: channel.assigned_agent_id,
                created_at: channel.created_at,
                updated_at: channel.updated_at,
            },
            messages,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableChannel {
    pub id: i64,
    pub tenant_id: i64,
    pub customer_id: i64,
    pub customer_name: String,
    pub customer_email: String,
    pub status: ChannelStatus,
}

impl AvailableChannel {
    pub fn compose(channel: &Channel, customer: &CustomerSummary) -> Self {
        Self {
            id: channel.id,
            tenant_id: channel.tenant_id,
            customer_id: channel.customer_id,
            customer_name: customer.full_name.clone(),
            customer_email: customer.email.clone(),
            status: channel.status,
        }
    }
}

/// Channel counts by status for one agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCounts {
    pub open: i64,
    pub assigned: i64,
    pub closed: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStats {
    pub open: i64,
    pub assigned: i64,
    pub closed: i64,
    pub total: i64,
    pub unread: i64,
}

impl AgentStats {
    pub fn from_counts(counts: ChannelCounts, unread: i64) -> Self {
        Self {
            open: counts.open,
            assigned: counts.assigned,
            closed: counts.closed,
            total: counts.open + counts.assigned + counts.closed,
            unread,
        }
    }
}
