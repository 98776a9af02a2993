use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

use super::{CacheStore, SCAN_PAGE};

/// Redis-backed cache store. The connection manager reconnects on its own,
/// so one handle is built at startup and cloned per call.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

fn millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

impl RedisCache {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value = redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis(ttl))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<u64> {
        let mut conn = self.conn.clone();
        let removed = redis::cmd("DEL")
            .arg(key)
            .query_async::<_, u64>(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn increment(&self, key: &str) -> anyhow::Result<i64> {
        let mut conn = self.conn.clone();
        let count = redis::cmd("INCR")
            .arg(key)
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let applied = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async::<_, bool>(&mut conn)
            .await?;
        Ok(applied)
    }

    async fn increment_window(&self, key: &str, window: Duration) -> anyhow::Result<i64> {
        let mut conn = self.conn.clone();
        // Atomic INCR + PEXPIRE on first hit
        let script = redis::Script::new(
            r#"
            local current = redis.call("INCR", KEYS[1])
            if current == 1 then
                redis.call("PEXPIRE", KEYS[1], ARGV[1])
            end
            return current
        "#,
        );
        let count: i64 = script
            .key(key)
            .arg(millis(window))
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn scan(&self, cursor: u64, pattern: &str) -> anyhow::Result<(u64, Vec<String>)> {
        // SCAN rather than KEYS so a sweep never blocks the server.
        let mut conn = self.conn.clone();
        let page = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_PAGE)
            .query_async::<_, (u64, Vec<String>)>(&mut conn)
            .await?;
        Ok(page)
    }

    async fn publish(&self, channel: &str, payload: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }
}
