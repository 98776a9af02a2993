//! Relational store boundary. Postgres is the source of truth in production;
//! the in-memory store backs tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::views::ChannelCounts;
use crate::models::{Channel, CustomerSummary, Message, NewUser, SenderType, StatusFilter, User};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Which side of the conversation a channel listing is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelScope {
    Agent(i64),
    Customer(i64),
}

/// Result of an assignment: the updated row plus who held it before (0 when
/// it was unassigned).
#[derive(Debug, Clone)]
pub struct Assignment {
    pub channel: Channel,
    pub previous_agent_id: i64,
}

#[async_trait]
pub trait SupportStore: Send + Sync {
    // -- Users --

    /// Returns `None` when the email is already registered.
    async fn create_user(&self, user: &NewUser) -> anyhow::Result<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn get_user(&self, id: i64) -> anyhow::Result<Option<User>>;
    async fn list_users(&self) -> anyhow::Result<Vec<User>>;
    async fn record_login(&self, id: i64) -> anyhow::Result<()>;
    async fn customer_summary(&self, id: i64) -> anyhow::Result<Option<CustomerSummary>>;

    // -- Channels --

    /// Channel and first message are written in one transaction.
    async fn create_channel(
        &self,
        tenant_id: i64,
        customer_id: i64,
        first_message: &str,
    ) -> anyhow::Result<(Channel, Message)>;
    async fn get_channel(&self, id: i64) -> anyhow::Result<Option<Channel>>;
    /// Returns `None` if the channel is missing or closed. With `claim` set
    /// the write only lands while the channel is unassigned or already held
    /// by `agent_id`; a channel held by someone else also yields `None`.
    async fn assign_channel(
        &self,
        id: i64,
        agent_id: i64,
        claim: bool,
    ) -> anyhow::Result<Option<Assignment>>;
    /// Returns `None` if the channel is missing or already closed.
    async fn close_channel(&self, id: i64) -> anyhow::Result<Option<Channel>>;
    /// Newest first.
    async fn list_channels(
        &self,
        scope: ChannelScope,
        filter: StatusFilter,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Channel>>;
    async fn count_channels(&self, scope: ChannelScope, filter: StatusFilter)
        -> anyhow::Result<i64>;
    /// Open, unassigned channels, oldest first.
    async fn list_available_channels(&self) -> anyhow::Result<Vec<Channel>>;
    async fn agent_channel_counts(&self, agent_id: i64) -> anyhow::Result<ChannelCounts>;

    // -- Messages --

    /// Appends the message and bumps the channel's `updated_at`.
    async fn insert_message(
        &self,
        channel_id: i64,
        sender: SenderType,
        body: &str,
    ) -> anyhow::Result<Message>;
    /// Oldest first.
    async fn list_messages(&self, channel_id: i64) -> anyhow::Result<Vec<Message>>;
    async fn last_message(&self, channel_id: i64) -> anyhow::Result<Option<Message>>;
    async fn count_unread(&self, channel_id: i64, sender: SenderType) -> anyhow::Result<i64>;
    /// Marks every unread message from `sender` as read. Returns rows changed.
    async fn mark_read(&self, channel_id: i64, sender: SenderType) -> anyhow::Result<u64>;
    /// Unread customer messages across all channels assigned to the agent.
    async fn agent_unread_total(&self, agent_id: i64) -> anyhow::Result<i64>;
}

/// Persisted set of revoked access tokens, keyed by token fingerprint.
#[async_trait]
pub trait RevocationLedger: Send + Sync {
    async fn revoke(&self, fingerprint: &str, expires_at: DateTime<Utc>) -> anyhow::Result<()>;
    /// Entries past their expiry no longer count.
    async fn is_revoked(&self, fingerprint: &str) -> anyhow::Result<bool>;
    async fn purge_expired(&self) -> anyhow::Result<u64>;
}
