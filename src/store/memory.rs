//! In-memory relational store.
//!
//! All tables live behind one `tokio::sync::RwLock`, so every operation is
//! atomic with respect to the others, which is the same guarantee the
//! Postgres backend gets from its transactions. State is lost on restart.
//!
//! [`MemoryStore::set_offline`] makes every call fail, standing in for an
//! unreachable database in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{Assignment, ChannelScope, RevocationLedger, SupportStore};
use crate::models::views::ChannelCounts;
use crate::models::{
    Channel, ChannelStatus, CustomerSummary, Message, NewUser, SenderType, StatusFilter, User,
};

#[derive(Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    channels: BTreeMap<i64, Channel>,
    messages: BTreeMap<i64, Message>,
    revoked: HashMap<String, DateTime<Utc>>,
    next_user: i64,
    next_channel: i64,
    next_message: i64,
}

impl Tables {
    fn scoped(&self, scope: ChannelScope, filter: StatusFilter) -> impl Iterator<Item = &Channel> {
        self.channels.values().filter(move |c| {
            let owned = match scope {
                ChannelScope::Agent(id) => c.assigned_agent_id == id,
                ChannelScope::Customer(id) => c.customer_id == id,
            };
            owned && filter.matches(c.status)
        })
    }

    fn append_message(&mut self, channel_id: i64, sender: SenderType, body: &str) -> Message {
        self.next_message += 1;
        let now = Utc::now();
        let message = Message {
            id: self.next_message,
            channel_id,
            sender_type: sender,
            message: body.to_string(),
            is_read: false,
            created_at: now,
            updated_at: now,
        };
        self.messages.insert(message.id, message.clone());
        message
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    offline: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            anyhow::bail!("relational store unreachable");
        }
        Ok(())
    }

    /// Number of ledger rows, expired ones included.
    pub async fn revocation_count(&self) -> usize {
        self.tables.read().await.revoked.len()
    }
}

#[async_trait]
impl SupportStore for MemoryStore {
    async fn create_user(&self, user: &NewUser) -> anyhow::Result<Option<User>> {
        self.check()?;
        let mut t = self.tables.write().await;
        let email = user.email.to_lowercase();
        if t.users.values().any(|u| u.email == email) {
            return Ok(None);
        }
        t.next_user += 1;
        let now = Utc::now();
        let created = User {
            id: t.next_user,
            tenant_id: user.tenant_id,
            email,
            password_hash: user.password_hash.clone(),
            full_name: user.full_name.clone(),
            phone: None,
            avatar: None,
            role: user.role,
            is_active: true,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        t.users.insert(created.id, created.clone());
        Ok(Some(created))
    }

    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        self.check()?;
        let email = email.to_lowercase();
        let t = self.tables.read().await;
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn get_user(&self, id: i64) -> anyhow::Result<Option<User>> {
        self.check()?;
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn list_users(&self) -> anyhow::Result<Vec<User>> {
        self.check()?;
        Ok(self.tables.read().await.users.values().cloned().collect())
    }

    async fn record_login(&self, id: i64) -> anyhow::Result<()> {
        self.check()?;
        let mut t = self.tables.write().await;
        if let Some(user) = t.users.get_mut(&id) {
            let now = Utc::now();
            user.last_login_at = Some(now);
            user.updated_at = now;
        }
        Ok(())
    }

    async fn customer_summary(&self, id: i64) -> anyhow::Result<Option<CustomerSummary>> {
        self.check()?;
        Ok(self
            .tables
            .read()
            .await
            .users
            .get(&id)
            .map(CustomerSummary::from))
    }

    async fn create_channel(
        &self,
        tenant_id: i64,
        customer_id: i64,
        first_message: &str,
    ) -> anyhow::Result<(Channel, Message)> {
        self.check()?;
        let mut t = self.tables.write().await;
        t.next_channel += 1;
        let now = Utc::now();
        let channel = Channel {
            id: t.next_channel,
            tenant_id,
            customer_id,
            status: ChannelStatus::Open,
            assigned_agent_id: 0,
            created_at: now,
            updated_at: now,
        };
        t.channels.insert(channel.id, channel.clone());
        let message = t.append_message(channel.id, SenderType::Customer, first_message);
        Ok((channel, message))
    }

    async fn get_channel(&self, id: i64) -> anyhow::Result<Option<Channel>> {
        self.check()?;
        Ok(self.tables.read().await.channels.get(&id).cloned())
    }

    async fn assign_channel(
        &self,
        id: i64,
        agent_id: i64,
        claim: bool,
    ) -> anyhow::Result<Option<Assignment>> {
        self.check()?;
        let mut t = self.tables.write().await;
        let Some(channel) = t.channels.get_mut(&id) else {
            return Ok(None);
        };
        if channel.is_closed() {
            return Ok(None);
        }
        if claim && channel.assigned_agent_id != 0 && channel.assigned_agent_id != agent_id {
            return Ok(None);
        }
        let previous_agent_id = channel.assigned_agent_id;
        channel.assigned_agent_id = agent_id;
        channel.status = ChannelStatus::Assigned;
        channel.updated_at = Utc::now();
        Ok(Some(Assignment {
            channel: channel.clone(),
            previous_agent_id,
        }))
    }

    async fn close_channel(&self, id: i64) -> anyhow::Result<Option<Channel>> {
        self.check()?;
        let mut t = self.tables.write().await;
        match t.channels.get_mut(&id) {
            Some(channel) if !channel.is_closed() => {
                channel.status = ChannelStatus::Closed;
                channel.updated_at = Utc::now();
                Ok(Some(channel.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list_channels(
        &self,
        scope: ChannelScope,
        filter: StatusFilter,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Channel>> {
        self.check()?;
        let t = self.tables.read().await;
        let mut rows: Vec<Channel> = t.scoped(scope, filter).cloned().collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_channels(
        &self,
        scope: ChannelScope,
        filter: StatusFilter,
    ) -> anyhow::Result<i64> {
        self.check()?;
        let t = self.tables.read().await;
        Ok(t.scoped(scope, filter).count() as i64)
    }

    async fn list_available_channels(&self) -> anyhow::Result<Vec<Channel>> {
        self.check()?;
        let t = self.tables.read().await;
        Ok(t.channels
            .values()
            .filter(|c| c.status == ChannelStatus::Open && c.assigned_agent_id == 0)
            .cloned()
            .collect())
    }

    async fn agent_channel_counts(&self, agent_id: i64) -> anyhow::Result<ChannelCounts> {
        self.check()?;
        let t = self.tables.read().await;
        let mut counts = ChannelCounts::default();
        for channel in t.scoped(ChannelScope::Agent(agent_id), StatusFilter::All) {
            match channel.status {
                ChannelStatus::Open => counts.open += 1,
                ChannelStatus::Assigned => counts.assigned += 1,
                ChannelStatus::Closed => counts.closed += 1,
            }
        }
        Ok(counts)
    }

    async fn insert_message(
        &self,
        channel_id: i64,
        sender: SenderType,
        body: &str,
    ) -> anyhow::Result<Message> {
        self.check()?;
        let mut t = self.tables.write().await;
        if !t.channels.contains_key(&channel_id) {
            anyhow::bail!("channel {} does not exist", channel_id);
        }
        let message = t.append_message(channel_id, sender, body);
        if let Some(channel) = t.channels.get_mut(&channel_id) {
            channel.updated_at = message.created_at;
        }
        Ok(message)
    }

    async fn list_messages(&self, channel_id: i64) -> anyhow::Result<Vec<Message>> {
        self.check()?;
        let t = self.tables.read().await;
        Ok(t.messages
            .values()
            .filter(|m| m.channel_id == channel_id)
            .cloned()
            .collect())
    }

    async fn last_message(&self, channel_id: i64) -> anyhow::Result<Option<Message>> {
        self.check()?;
        let t = self.tables.read().await;
        Ok(t.messages
            .values()
            .rev()
            .find(|m| m.channel_id == channel_id)
            .cloned())
    }

    async fn count_unread(&self, channel_id: i64, sender: SenderType) -> anyhow::Result<i64> {
        self.check()?;
        let t = self.tables.read().await;
        Ok(t.messages
            .values()
            .filter(|m| m.channel_id == channel_id && m.sender_type == sender && !m.is_read)
            .count() as i64)
    }

    async fn mark_read(&self, channel_id: i64, sender: SenderType) -> anyhow::Result<u64> {
        self.check()?;
        let mut t = self.tables.write().await;
        let now = Utc::now();
        let mut changed = 0;
        for message in t.messages.values_mut() {
            if message.channel_id == channel_id && message.sender_type == sender && !message.is_read
            {
                message.is_read = true;
                message.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn agent_unread_total(&self, agent_id: i64) -> anyhow::Result<i64> {
        self.check()?;
        let t = self.tables.read().await;
        let owned: Vec<i64> = t
            .scoped(ChannelScope::Agent(agent_id), StatusFilter::All)
            .map(|c| c.id)
            .collect();
        Ok(t.messages
            .values()
            .filter(|m| {
                owned.contains(&m.channel_id)
                    && m.sender_type == SenderType::Customer
                    && !m.is_read
            })
            .count() as i64)
    }
}

#[async_trait]
impl RevocationLedger for MemoryStore {
    async fn revoke(&self, fingerprint: &str, expires_at: DateTime<Utc>) -> anyhow::Result<()> {
        self.check()?;
        let mut t = self.tables.write().await;
        let entry = t.revoked.entry(fingerprint.to_string()).or_insert(expires_at);
        if *entry < expires_at {
            *entry = expires_at;
        }
        Ok(())
    }

    async fn is_revoked(&self, fingerprint: &str) -> anyhow::Result<bool> {
        self.check()?;
        let t = self.tables.read().await;
        Ok(t.revoked
            .get(fingerprint)
            .is_some_and(|expires_at| *expires_at > Utc::now()))
    }

    async fn purge_expired(&self) -> anyhow::Result<u64> {
        self.check()?;
        let mut t = self.tables.write().await;
        let now = Utc::now();
        let before = t.revoked.len();
        t.revoked.retain(|_, expires_at| *expires_at > now);
        Ok((before - t.revoked.len()) as u64)
    }
}
