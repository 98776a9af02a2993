//! Cache store abstraction and the fail-open client wrapped around it.
//!
//! The store itself is a shared external service (Redis in production). Every
//! call made through [`CacheClient`] is bounded by a short timeout. Reads that
//! fail are reported as misses and writes that fail are logged and dropped:
//! every cached value carries a finite TTL, so a lost write or a lost
//! invalidation only ever costs staleness up to that TTL.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub mod memory;
pub mod redis_store;

pub use memory::MemoryCache;
pub use redis_store::RedisCache;

/// Keys requested per scan page.
pub const SCAN_PAGE: usize = 200;

/// Operations required from the cache store collaborator.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;

    /// Returns the number of keys removed (0 or 1).
    async fn delete(&self, key: &str) -> anyhow::Result<u64>;

    async fn increment(&self, key: &str) -> anyhow::Result<i64>;

    /// Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<bool>;

    /// Increment, and set `window` as the TTL only when this increment created
    /// the key. Must be atomic for a single key.
    async fn increment_window(&self, key: &str, window: Duration) -> anyhow::Result<i64>;

    /// One page of a glob-style (`*`, `?`) cursor scan over live keys. Start
    /// at cursor 0; a returned cursor of 0 ends the scan. A page may be empty
    /// and a key may repeat across pages.
    async fn scan(&self, cursor: u64, pattern: &str) -> anyhow::Result<(u64, Vec<String>)>;

    async fn keys(&self, pattern: &str) -> anyhow::Result<Vec<String>> {
        let mut cursor = 0;
        let mut found = Vec::new();
        loop {
            let (next, batch) = self.scan(cursor, pattern).await?;
            found.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        found.sort();
        found.dedup();
        Ok(found)
    }

    async fn publish(&self, channel: &str, payload: &str) -> anyhow::Result<()>;
}

/// Shared handle used by the read models, the invalidator, the rate limiter
/// and the token service. Cheap to clone.
#[derive(Clone)]
pub struct CacheClient {
    store: Arc<dyn CacheStore>,
    timeout: Duration,
}

impl CacheClient {
    pub fn new(store: Arc<dyn CacheStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "cache {} timed out after {}ms",
                op,
                self.timeout.as_millis()
            )),
        }
    }

    // ── Fail-open view operations ────────────────────────────

    /// `None` is a miss. An unreachable store or an undecodable payload is
    /// also a miss. A cached zero or a cached JSON `null` comes back as
    /// `Some`, so callers can tell "never computed" from "computed as empty".
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.bounded("get", self.store.get(key)).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "failed to serialize cache value");
                return;
            }
        };
        if let Err(e) = self.bounded("set", self.store.set(key, &json, ttl)).await {
            tracing::warn!(key = %key, error = %e, "cache populate failed");
        }
    }

    /// Deleting a key that is already gone is a no-op.
    pub async fn delete(&self, key: &str) {
        if let Err(e) = self.bounded("delete", self.store.delete(key)).await {
            tracing::warn!(key = %key, error = %e, "cache delete failed");
        }
    }

    /// Delete every key matching `pattern`, one scan page at a time. The
    /// timeout applies per page, so a large keyspace is swept to the end.
    /// Returns how many were removed.
    pub async fn delete_matching(&self, pattern: &str) -> usize {
        let mut cursor = 0;
        let mut removed = 0;
        loop {
            let (next, batch) = match self.bounded("scan", self.store.scan(cursor, pattern)).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(pattern = %pattern, removed, error = %e, "cache sweep failed");
                    return removed;
                }
            };
            for key in &batch {
                match self.bounded("delete", self.store.delete(key)).await {
                    Ok(n) => removed += n as usize,
                    Err(e) => tracing::warn!(key = %key, error = %e, "cache sweep delete failed"),
                }
            }
            if next == 0 {
                return removed;
            }
            cursor = next;
        }
    }

    pub async fn publish(&self, channel: &str, payload: &str) {
        if let Err(e) = self.bounded("publish", self.store.publish(channel, payload)).await {
            tracing::warn!(channel = %channel, error = %e, "publish failed");
        }
    }

    // ── Fallible operations ──────────────────────────────────
    // Session state needs to know when the store is down.

    pub async fn try_get(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.bounded("get", self.store.get(key)).await
    }

    pub async fn try_set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        self.bounded("set", self.store.set(key, value, ttl)).await
    }

    pub async fn try_delete(&self, key: &str) -> anyhow::Result<u64> {
        self.bounded("delete", self.store.delete(key)).await
    }

    pub async fn increment_window(&self, key: &str, window: Duration) -> anyhow::Result<i64> {
        self.bounded("incr", self.store.increment_window(key, window))
            .await
    }
}
