use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::{CacheStore, SCAN_PAGE};

/// Entry stored in the DashMap with an optional expiry timestamp.
#[derive(Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// A message sent through [`CacheStore::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub channel: String,
    pub payload: String,
}

/// In-process cache store for tests and single-node development.
///
/// TTLs are honoured lazily on read, like Redis' passive expiry, and a sweep
/// can be triggered with `evict_expired()`. Uses tokio's clock so paused-time
/// tests can advance past a TTL.
#[derive(Clone)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    published: broadcast::Sender<Published>,
    offline: Arc<AtomicBool>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        let (published, _) = broadcast::channel(256);
        Self {
            entries: Arc::new(DashMap::new()),
            published,
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// While offline every store call fails, like a Redis that stopped
    /// answering.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            anyhow::bail!("cache store unreachable");
        }
        Ok(())
    }

    /// Receive everything published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Published> {
        self.published.subscribe()
    }

    /// Remove all expired entries.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before - self.entries.len()
    }

    /// Current number of entries, expired ones included until evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_live(now) {
                return Some(entry.value.clone());
            }
            // expired; drop the ref before removing
            drop(entry);
            self.entries.remove(key);
        }
        None
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.check()?;
        Ok(self.live_value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        self.check()?;
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<u64> {
        self.check()?;
        let now = Instant::now();
        Ok(match self.entries.remove(key) {
            Some((_, entry)) if entry.is_live(now) => 1,
            _ => 0,
        })
    }

    async fn increment(&self, key: &str) -> anyhow::Result<i64> {
        self.check()?;
        bump(&self.entries, key, None)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        self.check()?;
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment_window(&self, key: &str, window: Duration) -> anyhow::Result<i64> {
        self.check()?;
        bump(&self.entries, key, Some(window))
    }

    /// Keys are visited in slot order and the cursor is the next slot, so
    /// deleting between pages never shifts a key past the cursor.
    async fn scan(&self, cursor: u64, pattern: &str) -> anyhow::Result<(u64, Vec<String>)> {
        self.check()?;
        let now = Instant::now();
        let mut matches: Vec<(u64, String)> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_live(now) && glob_match(pattern, entry.key()))
            .map(|entry| (slot(entry.key()), entry.key().clone()))
            .filter(|(slot, _)| *slot >= cursor)
            .collect();
        matches.sort();

        // a page never splits a slot
        let mut end = matches.len().min(SCAN_PAGE);
        while end < matches.len() && matches[end].0 == matches[end - 1].0 {
            end += 1;
        }
        let next = matches.get(end).map_or(0, |(slot, _)| *slot);
        matches.truncate(end);
        Ok((next, matches.into_iter().map(|(_, key)| key).collect()))
    }

    async fn publish(&self, channel: &str, payload: &str) -> anyhow::Result<()> {
        self.check()?;
        // No subscribers is not an error.
        let _ = self.published.send(Published {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }
}

/// Stable scan position for a key. Never 0, which marks a finished scan.
fn slot(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish().max(1)
}

/// INCR under the entry lock. With `window`, the TTL is set only when the
/// counter is created, mirroring the Lua script used against Redis.
fn bump(
    entries: &DashMap<String, CacheEntry>,
    key: &str,
    window: Option<Duration>,
) -> anyhow::Result<i64> {
    let now = Instant::now();
    let mut entry = entries.entry(key.to_string()).or_insert_with(|| CacheEntry {
        value: "0".to_string(),
        expires_at: None,
    });
    if !entry.is_live(now) {
        *entry = CacheEntry {
            value: "0".to_string(),
            expires_at: None,
        };
    }

    let current: i64 = entry
        .value
        .parse()
        .map_err(|_| anyhow::anyhow!("value at '{}' is not an integer", key))?;
    let next = current + 1;
    entry.value = next.to_string();
    if next == 1 {
        if let Some(window) = window {
            entry.expires_at = Some(now + window);
        }
    }
    Ok(next)
}

/// Redis-style glob: `*` matches any run, `?` matches one character.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut resume = 0usize;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            resume = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            resume += 1;
            ti = resume;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("channel:5:*", "channel:5:role:agent:user:2"));
        assert!(!glob_match("channel:5:*", "channel:55:role:agent:user:2"));
        assert!(!glob_match("channel:5:*", "channel:lastmessage:5"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "abbc"));
        assert!(glob_match("a*b*c", "a-x-b-y-c"));
        assert!(!glob_match("abc", "abcd"));
    }

    #[tokio::test]
    async fn test_scan_pages_survive_deletes_between_pages() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(60);
        for i in 0..(SCAN_PAGE + 30) {
            cache.set(&format!("k:{}", i), "v", ttl).await.unwrap();
        }
        cache.set("other", "v", ttl).await.unwrap();

        let (next, first) = cache.scan(0, "k:*").await.unwrap();
        assert_eq!(first.len(), SCAN_PAGE);
        assert_ne!(next, 0);
        for key in &first {
            cache.delete(key).await.unwrap();
        }
        let (next, rest) = cache.scan(next, "k:*").await.unwrap();
        assert_eq!(next, 0);
        assert_eq!(rest.len(), 30);
        assert!(rest.iter().all(|k| !first.contains(k)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_secs(5)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.keys("*").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_window_sets_ttl_once() {
        let cache = MemoryCache::new();
        let window = Duration::from_secs(60);
        assert_eq!(cache.increment_window("c", window).await.unwrap(), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        // Second hit must not extend the window.
        assert_eq!(cache.increment_window("c", window).await.unwrap(), 2);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.increment_window("c", window).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_increment_rejects_non_integer() {
        let cache = MemoryCache::new();
        cache.set("k", "\"text\"", Duration::from_secs(5)).await.unwrap();
        assert!(cache.increment("k").await.is_err());
    }

    #[tokio::test]
    async fn test_expire_missing_key() {
        let cache = MemoryCache::new();
        assert!(!cache.expire("nope", Duration::from_secs(1)).await.unwrap());
        cache.increment("k").await.unwrap();
        assert!(cache.expire("k", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let cache = MemoryCache::new();
        let mut rx = cache.subscribe();
        cache.publish("channel:1", "{}").await.unwrap();
        let got = rx.recv().await.unwrap();
        assert_eq!(got.channel, "channel:1");
        assert_eq!(got.payload, "{}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_expired() {
        let cache = MemoryCache::new();
        cache.set("a", "1", Duration::from_secs(1)).await.unwrap();
        cache.set("b", "1", Duration::from_secs(10)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_offline_fails_every_call() {
        let cache = MemoryCache::new();
        cache.set("a", "1", Duration::from_secs(10)).await.unwrap();
        cache.set_offline(true);
        assert!(cache.get("a").await.is_err());
        assert!(cache.increment_window("n", Duration::from_secs(1)).await.is_err());
        cache.set_offline(false);
        assert_eq!(cache.get("a").await.unwrap().as_deref(), Some("1"));
    }
}
