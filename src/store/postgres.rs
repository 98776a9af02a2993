use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{Assignment, ChannelScope, RevocationLedger, SupportStore};
use crate::models::views::ChannelCounts;
use crate::models::{
    Channel, ChannelStatus, CustomerSummary, Message, NewUser, Role, SenderType, StatusFilter,
    User,
};

const USER_COLUMNS: &str = "id, tenant_id, email, password_hash, full_name, phone, avatar, role, \
                            is_active, last_login_at, created_at, updated_at";
const CHANNEL_COLUMNS: &str =
    "id, tenant_id, customer_id, status, assigned_agent_id, created_at, updated_at";
const MESSAGE_COLUMNS: &str =
    "id, channel_id, sender_type, message, is_read, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Wait for in-flight queries and close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// -- Row types --
// Enum columns come back as TEXT and are converted explicitly.

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    tenant_id: i64,
    email: String,
    password_hash: String,
    full_name: String,
    phone: Option<String>,
    avatar: Option<String>,
    role: String,
    is_active: bool,
    last_login_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> anyhow::Result<Self> {
        let role = Role::parse(&row.role)
            .ok_or_else(|| anyhow::anyhow!("user {} has unknown role '{}'", row.id, row.role))?;
        Ok(User {
            id: row.id,
            tenant_id: row.tenant_id,
            email: row.email,
            password_hash: row.password_hash,
            full_name: row.full_name,
            phone: row.phone,
            avatar: row.avatar,
            role,
            is_active: row.is_active,
            last_login_at: row.last_login_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ChannelRow {
    id: i64,
    tenant_id: i64,
    customer_id: i64,
    status: String,
    assigned_agent_id: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ChannelRow> for Channel {
    type Error = anyhow::Error;

    fn try_from(row: ChannelRow) -> anyhow::Result<Self> {
        let status = ChannelStatus::parse(&row.status).ok_or_else(|| {
            anyhow::anyhow!("channel {} has unknown status '{}'", row.id, row.status)
        })?;
        Ok(Channel {
            id: row.id,
            tenant_id: row.tenant_id,
            customer_id: row.customer_id,
            status,
            assigned_agent_id: row.assigned_agent_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AssignmentRow {
    id: i64,
    tenant_id: i64,
    customer_id: i64,
    status: String,
    assigned_agent_id: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    previous_agent_id: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    channel_id: i64,
    sender_type: String,
    message: String,
    is_read: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> anyhow::Result<Self> {
        let sender_type = SenderType::parse(&row.sender_type).ok_or_else(|| {
            anyhow::anyhow!("message {} has unknown sender '{}'", row.id, row.sender_type)
        })?;
        Ok(Message {
            id: row.id,
            channel_id: row.channel_id,
            sender_type,
            message: row.message,
            is_read: row.is_read,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn convert<R, T>(rows: Vec<R>) -> anyhow::Result<Vec<T>>
where
    T: TryFrom<R, Error = anyhow::Error>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn scope_clause(scope: ChannelScope) -> (&'static str, i64) {
    match scope {
        ChannelScope::Agent(id) => ("assigned_agent_id", id),
        ChannelScope::Customer(id) => ("customer_id", id),
    }
}

fn status_bind(filter: StatusFilter) -> Option<&'static str> {
    match filter {
        StatusFilter::All => None,
        StatusFilter::Only(status) => Some(status.as_str()),
    }
}

#[async_trait]
impl SupportStore for PgStore {
    // -- User Operations --

    async fn create_user(&self, user: &NewUser) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"INSERT INTO users (tenant_id, email, password_hash, full_name, role)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (email) DO NOTHING
               RETURNING {USER_COLUMNS}"#
        ))
        .bind(user.tenant_id)
        .bind(user.email.to_lowercase())
        .bind(&user.password_hash)
        .bind(&user.full_name)
        .bind(user.role.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn get_user(&self, id: i64) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn list_users(&self) -> anyhow::Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        convert(rows)
    }

    async fn record_login(&self, id: i64) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET last_login_at = NOW(), updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn customer_summary(&self, id: i64) -> anyhow::Result<Option<CustomerSummary>> {
        let row = sqlx::query_as::<_, (i64, String, String)>(
            "SELECT id, full_name, email FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, full_name, email)| CustomerSummary {
            id,
            full_name,
            email,
        }))
    }

    // -- Channel Operations --

    async fn create_channel(
        &self,
        tenant_id: i64,
        customer_id: i64,
        first_message: &str,
    ) -> anyhow::Result<(Channel, Message)> {
        let mut tx = self.pool.begin().await?;

        let channel = sqlx::query_as::<_, ChannelRow>(&format!(
            r#"INSERT INTO channels (tenant_id, customer_id, status, assigned_agent_id)
               VALUES ($1, $2, 'open', 0)
               RETURNING {CHANNEL_COLUMNS}"#
        ))
        .bind(tenant_id)
        .bind(customer_id)
        .fetch_one(&mut *tx)
        .await?;

        let message = sqlx::query_as::<_, MessageRow>(&format!(
            r#"INSERT INTO messages (channel_id, sender_type, message)
               VALUES ($1, 'customer', $2)
               RETURNING {MESSAGE_COLUMNS}"#
        ))
        .bind(channel.id)
        .bind(first_message)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((Channel::try_from(channel)?, Message::try_from(message)?))
    }

    async fn get_channel(&self, id: i64) -> anyhow::Result<Option<Channel>> {
        let row = sqlx::query_as::<_, ChannelRow>(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Channel::try_from).transpose()
    }

    async fn assign_channel(
        &self,
        id: i64,
        agent_id: i64,
        claim: bool,
    ) -> anyhow::Result<Option<Assignment>> {
        // The CTE locks the row and captures the previous holder in the same
        // statement, so concurrent reassignments cannot lose a previous agent.
        let row = sqlx::query_as::<_, AssignmentRow>(
            r#"WITH prev AS (
                   SELECT id, assigned_agent_id FROM channels
                   WHERE id = $1 AND status <> 'closed'
                     AND (NOT $3 OR assigned_agent_id IN (0, $2))
                   FOR UPDATE
               )
               UPDATE channels c
               SET assigned_agent_id = $2, status = 'assigned', updated_at = NOW()
               FROM prev
               WHERE c.id = prev.id
               RETURNING c.id, c.tenant_id, c.customer_id, c.status, c.assigned_agent_id,
                         c.created_at, c.updated_at, prev.assigned_agent_id AS previous_agent_id"#,
        )
        .bind(id)
        .bind(agent_id)
        .bind(claim)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let previous_agent_id = row.previous_agent_id;
            let channel = Channel::try_from(ChannelRow {
                id: row.id,
                tenant_id: row.tenant_id,
                customer_id: row.customer_id,
                status: row.status,
                assigned_agent_id: row.assigned_agent_id,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })?;
            Ok(Assignment {
                channel,
                previous_agent_id,
            })
        })
        .transpose()
    }

    async fn close_channel(&self, id: i64) -> anyhow::Result<Option<Channel>> {
        let row = sqlx::query_as::<_, ChannelRow>(&format!(
            r#"UPDATE channels SET status = 'closed', updated_at = NOW()
               WHERE id = $1 AND status <> 'closed'
               RETURNING {CHANNEL_COLUMNS}"#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Channel::try_from).transpose()
    }

    async fn list_channels(
        &self,
        scope: ChannelScope,
        filter: StatusFilter,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Channel>> {
        let (column, owner) = scope_clause(scope);
        let rows = sqlx::query_as::<_, ChannelRow>(&format!(
            r#"SELECT {CHANNEL_COLUMNS} FROM channels
               WHERE {column} = $1 AND ($2::TEXT IS NULL OR status = $2)
               ORDER BY id DESC
               LIMIT $3 OFFSET $4"#
        ))
        .bind(owner)
        .bind(status_bind(filter))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        convert(rows)
    }

    async fn count_channels(
        &self,
        scope: ChannelScope,
        filter: StatusFilter,
    ) -> anyhow::Result<i64> {
        let (column, owner) = scope_clause(scope);
        let count = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM channels WHERE {column} = $1 AND ($2::TEXT IS NULL OR status = $2)"
        ))
        .bind(owner)
        .bind(status_bind(filter))
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn list_available_channels(&self) -> anyhow::Result<Vec<Channel>> {
        let rows = sqlx::query_as::<_, ChannelRow>(&format!(
            r#"SELECT {CHANNEL_COLUMNS} FROM channels
               WHERE status = 'open' AND assigned_agent_id = 0
               ORDER BY id ASC"#
        ))
        .fetch_all(&self.pool)
        .await?;
        convert(rows)
    }

    async fn agent_channel_counts(&self, agent_id: i64) -> anyhow::Result<ChannelCounts> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM channels WHERE assigned_agent_id = $1 GROUP BY status",
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = ChannelCounts::default();
        for (status, n) in rows {
            match ChannelStatus::parse(&status) {
                Some(ChannelStatus::Open) => counts.open = n,
                Some(ChannelStatus::Assigned) => counts.assigned = n,
                Some(ChannelStatus::Closed) => counts.closed = n,
                None => tracing::warn!(status = %status, "ignoring unknown channel status"),
            }
        }
        Ok(counts)
    }

    // -- Message Operations --

    async fn insert_message(
        &self,
        channel_id: i64,
        sender: SenderType,
        body: &str,
    ) -> anyhow::Result<Message> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, MessageRow>(&format!(
            r#"INSERT INTO messages (channel_id, sender_type, message)
               VALUES ($1, $2, $3)
               RETURNING {MESSAGE_COLUMNS}"#
        ))
        .bind(channel_id)
        .bind(sender.as_str())
        .bind(body)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE channels SET updated_at = NOW() WHERE id = $1")
            .bind(channel_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Message::try_from(row)
    }

    async fn list_messages(&self, channel_id: i64) -> anyhow::Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE channel_id = $1 ORDER BY id ASC"
        ))
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?;
        convert(rows)
    }

    async fn last_message(&self, channel_id: i64) -> anyhow::Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE channel_id = $1 ORDER BY id DESC LIMIT 1"
        ))
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Message::try_from).transpose()
    }

    async fn count_unread(&self, channel_id: i64, sender: SenderType) -> anyhow::Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM messages WHERE channel_id = $1 AND sender_type = $2 AND is_read = FALSE",
        )
        .bind(channel_id)
        .bind(sender.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn mark_read(&self, channel_id: i64, sender: SenderType) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"UPDATE messages SET is_read = TRUE, updated_at = NOW()
               WHERE channel_id = $1 AND sender_type = $2 AND is_read = FALSE"#,
        )
        .bind(channel_id)
        .bind(sender.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn agent_unread_total(&self, agent_id: i64) -> anyhow::Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM messages m
               JOIN channels c ON c.id = m.channel_id
               WHERE c.assigned_agent_id = $1
                 AND m.sender_type = 'customer'
                 AND m.is_read = FALSE"#,
        )
        .bind(agent_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl RevocationLedger for PgStore {
    async fn revoke(&self, fingerprint: &str, expires_at: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO revoked_tokens (fingerprint, expires_at) VALUES ($1, $2)
               ON CONFLICT (fingerprint)
               DO UPDATE SET expires_at = GREATEST(revoked_tokens.expires_at, EXCLUDED.expires_at)"#,
        )
        .bind(fingerprint)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_revoked(&self, fingerprint: &str) -> anyhow::Result<bool> {
        let revoked = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM revoked_tokens WHERE fingerprint = $1 AND expires_at > NOW())",
        )
        .bind(fingerprint)
        .fetch_one(&self.pool)
        .await?;
        Ok(revoked)
    }

    async fn purge_expired(&self) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
