//! Cache key layout for every read model.
//!
//! Parameterized families share a prefix that ends in `:` before the glob, so
//! a sweep for agent 7 never touches agent 70.

use crate::models::{Role, StatusFilter, Viewer};

pub const AVAILABLE_CHANNELS: &str = "channels:available";

pub fn agent_conversations(agent_id: i64, status: StatusFilter, limit: i64, offset: i64) -> String {
    format!(
        "agent:conversations:{}:{}:{}:{}",
        agent_id,
        status.as_str(),
        limit,
        offset
    )
}

pub fn agent_conversations_pattern(agent_id: i64) -> String {
    format!("agent:conversations:{}:*", agent_id)
}

pub fn customer_conversations(
    customer_id: i64,
    status: StatusFilter,
    limit: i64,
    offset: i64,
) -> String {
    format!(
        "user:conversations:{}:{}:{}:{}",
        customer_id,
        status.as_str(),
        limit,
        offset
    )
}

pub fn customer_conversations_pattern(customer_id: i64) -> String {
    format!("user:conversations:{}:*", customer_id)
}

pub fn channel_detail(channel_id: i64, role: Role, viewer_id: i64) -> String {
    format!("channel:{}:role:{}:user:{}", channel_id, role.as_str(), viewer_id)
}

/// Every role/viewer variant of one channel's detail view.
pub fn channel_detail_pattern(channel_id: i64) -> String {
    format!("channel:{}:role:*", channel_id)
}

pub fn agent_stats(agent_id: i64) -> String {
    format!("agent:stats:{}", agent_id)
}

pub fn last_message(channel_id: i64) -> String {
    format!("channel:lastmessage:{}", channel_id)
}

pub fn unread_count(channel_id: i64, viewer: Viewer) -> String {
    format!("unread:channel:{}:{}", channel_id, viewer.as_str())
}
