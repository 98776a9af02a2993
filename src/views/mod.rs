//! Cached read models.
//!
//! Every view is compute-on-miss, serve-on-hit, populate-with-TTL. Cache
//! failures degrade to recomputation; relational failures surface as
//! `DependencyUnavailable`.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::CacheClient;
use crate::errors::AppError;
use crate::invalidation::{Invalidator, MutationEvent};
use crate::models::views::{
    AgentStats, AvailableChannel, ChannelDetail, ConversationPage, ConversationSummary,
    Pagination,
};
use crate::models::{Channel, CustomerSummary, Identity, Message, Role, SenderType, StatusFilter, Viewer};
use crate::store::{ChannelScope, SupportStore};

pub mod keys;

pub const DEFAULT_PAGE_LIMIT: i64 = 10;
pub const MAX_PAGE_LIMIT: i64 = 100;

#[derive(Debug, Clone, Copy)]
pub struct ViewTtls {
    pub agent_conversations: Duration,
    pub customer_conversations: Duration,
    pub channel_detail: Duration,
    pub available_channels: Duration,
    pub agent_stats: Duration,
    pub last_message: Duration,
    pub unread_count: Duration,
}

impl Default for ViewTtls {
    fn default() -> Self {
        Self {
            agent_conversations: Duration::from_secs(30),
            customer_conversations: Duration::from_secs(30),
            channel_detail: Duration::from_secs(10),
            available_channels: Duration::from_secs(15),
            agent_stats: Duration::from_secs(20),
            last_message: Duration::from_secs(10),
            unread_count: Duration::from_secs(5),
        }
    }
}

/// Validated list parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationQuery {
    pub status: StatusFilter,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ConversationQuery {
    fn default() -> Self {
        Self {
            status: StatusFilter::All,
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl ConversationQuery {
    pub fn parse(
        status: Option<&str>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Self, AppError> {
        let status = match status {
            None => StatusFilter::All,
            Some(raw) => StatusFilter::parse(raw.trim()).ok_or_else(|| {
                AppError::validation("status must be one of all, open, assigned, closed")
            })?,
        };
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
        let offset = offset.unwrap_or(0);
        if offset < 0 {
            return Err(AppError::validation("offset must not be negative"));
        }
        Ok(Self {
            status,
            limit,
            offset,
        })
    }
}

/// Whether `identity` may see `channel` at all. Agents see channels assigned
/// to them, customers their own, admins everything.
pub fn visible_to(channel: &Channel, identity: Identity) -> bool {
    match identity.role {
        Role::Admin => true,
        Role::Agent => channel.is_assigned_to(identity.user_id),
        Role::User => channel.customer_id == identity.user_id,
    }
}

#[derive(Clone)]
pub struct ReadModels {
    store: Arc<dyn SupportStore>,
    cache: CacheClient,
    invalidator: Invalidator,
    ttls: ViewTtls,
}

impl ReadModels {
    pub fn new(
        store: Arc<dyn SupportStore>,
        cache: CacheClient,
        invalidator: Invalidator,
        ttls: ViewTtls,
    ) -> Self {
        Self {
            store,
            cache,
            invalidator,
            ttls,
        }
    }

    pub async fn agent_conversations(
        &self,
        agent_id: i64,
        query: ConversationQuery,
    ) -> Result<ConversationPage, AppError> {
        let key = keys::agent_conversations(agent_id, query.status, query.limit, query.offset);
        self.conversations(
            key,
            ChannelScope::Agent(agent_id),
            Viewer::Agent,
            query,
            self.ttls.agent_conversations,
        )
        .await
    }

    pub async fn customer_conversations(
        &self,
        customer_id: i64,
        query: ConversationQuery,
    ) -> Result<ConversationPage, AppError> {
        let key =
            keys::customer_conversations(customer_id, query.status, query.limit, query.offset);
        self.conversations(
            key,
            ChannelScope::Customer(customer_id),
            Viewer::Customer,
            query,
            self.ttls.customer_conversations,
        )
        .await
    }

    async fn conversations(
        &self,
        key: String,
        scope: ChannelScope,
        viewer: Viewer,
        query: ConversationQuery,
        ttl: Duration,
    ) -> Result<ConversationPage, AppError> {
        if let Some(page) = self.cache.get_json::<ConversationPage>(&key).await {
            return Ok(page);
        }

        let channels = self
            .store
            .list_channels(scope, query.status, query.limit, query.offset)
            .await
            .map_err(AppError::unavailable)?;
        let total = self
            .store
            .count_channels(scope, query.status)
            .await
            .map_err(AppError::unavailable)?;

        let mut data = Vec::with_capacity(channels.len());
        for channel in &channels {
            let customer = self.customer(channel.customer_id).await?;
            let last = self.last_message(channel.id).await?;
            let unread = self.unread_count(channel.id, viewer).await?;
            data.push(ConversationSummary::compose(channel, &customer, last, unread));
        }

        let page = ConversationPage {
            data,
            pagination: Pagination {
                total,
                limit: query.limit,
                offset: query.offset,
            },
        };
        self.cache.set_json(&key, &page, ttl).await;
        Ok(page)
    }

    /// Reading as an agent or customer acknowledges the other party's
    /// messages. The acknowledgement happens on a miss only; a cached view
    /// was built by a read that already acknowledged.
    pub async fn channel_detail(
        &self,
        identity: Identity,
        channel_id: i64,
    ) -> Result<ChannelDetail, AppError> {
        let key = keys::channel_detail(channel_id, identity.role, identity.user_id);
        if let Some(detail) = self.cache.get_json::<ChannelDetail>(&key).await {
            return Ok(detail);
        }

        let channel = self
            .store
            .get_channel(channel_id)
            .await
            .map_err(AppError::unavailable)?
            .filter(|c| visible_to(c, identity))
            .ok_or_else(|| AppError::not_found("Channel"))?;

        if let Some(viewer) = identity.role.viewer() {
            let acknowledged = self
                .store
                .mark_read(channel.id, SenderType::unread_for(viewer))
                .await
                .map_err(AppError::unavailable)?;
            if acknowledged > 0 {
                tracing::debug!(
                    channel_id = channel.id,
                    viewer = viewer.as_str(),
                    count = acknowledged,
                    "messages marked read"
                );
                self.invalidator
                    .apply(&MutationEvent::MessagesRead {
                        channel_id: channel.id,
                        reader: viewer,
                        agent_id: channel.assigned_agent_id,
                        customer_id: channel.customer_id,
                    })
                    .await;
            }
        }

        let messages = self
            .store
            .list_messages(channel.id)
            .await
            .map_err(AppError::unavailable)?;
        let customer = self.customer(channel.customer_id).await?;
        let detail = ChannelDetail::compose(&channel, &customer, messages);
        self.cache
            .set_json(&key, &detail, self.ttls.channel_detail)
            .await;
        Ok(detail)
    }

    pub async fn available_channels(&self) -> Result<Vec<AvailableChannel>, AppError> {
        if let Some(list) = self
            .cache
            .get_json::<Vec<AvailableChannel>>(keys::AVAILABLE_CHANNELS)
            .await
        {
            return Ok(list);
        }

        let channels = self
            .store
            .list_available_channels()
            .await
            .map_err(AppError::unavailable)?;
        let mut list = Vec::with_capacity(channels.len());
        for channel in &channels {
            let customer = self.customer(channel.customer_id).await?;
            list.push(AvailableChannel::compose(channel, &customer));
        }
        self.cache
            .set_json(keys::AVAILABLE_CHANNELS, &list, self.ttls.available_channels)
            .await;
        Ok(list)
    }

    pub async fn agent_stats(&self, agent_id: i64) -> Result<AgentStats, AppError> {
        let key = keys::agent_stats(agent_id);
        if let Some(stats) = self.cache.get_json::<AgentStats>(&key).await {
            return Ok(stats);
        }

        let counts = self
            .store
            .agent_channel_counts(agent_id)
            .await
            .map_err(AppError::unavailable)?;
        let unread = self
            .store
            .agent_unread_total(agent_id)
            .await
            .map_err(AppError::unavailable)?;
        let stats = AgentStats::from_counts(counts, unread);
        self.cache.set_json(&key, &stats, self.ttls.agent_stats).await;
        Ok(stats)
    }

    /// `Ok(None)` for a channel with no messages. That answer is cached too.
    pub async fn last_message(&self, channel_id: i64) -> Result<Option<Message>, AppError> {
        let key = keys::last_message(channel_id);
        if let Some(cached) = self.cache.get_json::<Option<Message>>(&key).await {
            return Ok(cached);
        }
        let last = self
            .store
            .last_message(channel_id)
            .await
            .map_err(AppError::unavailable)?;
        self.cache.set_json(&key, &last, self.ttls.last_message).await;
        Ok(last)
    }

    /// Messages authored by the other party that `viewer` has not read.
    pub async fn unread_count(&self, channel_id: i64, viewer: Viewer) -> Result<i64, AppError> {
        let key = keys::unread_count(channel_id, viewer);
        if let Some(count) = self.cache.get_json::<i64>(&key).await {
            return Ok(count);
        }
        let count = self
            .store
            .count_unread(channel_id, SenderType::unread_for(viewer))
            .await
            .map_err(AppError::unavailable)?;
        self.cache.set_json(&key, &count, self.ttls.unread_count).await;
        Ok(count)
    }

    async fn customer(&self, customer_id: i64) -> Result<CustomerSummary, AppError> {
        Ok(self
            .store
            .customer_summary(customer_id)
            .await
            .map_err(AppError::unavailable)?
            .unwrap_or_else(|| CustomerSummary::unknown(customer_id)))
    }
}
