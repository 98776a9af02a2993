use std::time::Duration;

use crate::cache::CacheClient;

/// Outcome of one counted attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub limited: bool,
    pub count: i64,
}

/// Fixed-window counter over the cache store.
///
/// The window starts at the first counted attempt and is not extended by
/// later ones. Once the count passes `max_attempts`, every further attempt in
/// the window is limited.
///
/// Supported window formats: "1s", "1m", "1h", "1d".
#[derive(Clone)]
pub struct RateLimiter {
    cache: CacheClient,
    max_attempts: i64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(cache: CacheClient, max_attempts: i64, window: Duration) -> Self {
        Self {
            cache,
            max_attempts,
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count this attempt. An unreachable cache store fails open: the attempt
    /// is allowed and logged.
    pub async fn check_and_increment(&self, key: &str) -> RateDecision {
        match self.cache.increment_window(key, self.window).await {
            Ok(count) => RateDecision {
                limited: count > self.max_attempts,
                count,
            },
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "rate limiter unavailable, allowing attempt");
                RateDecision {
                    limited: false,
                    count: 0,
                }
            }
        }
    }

    pub async fn reset(&self, key: &str) {
        self.cache.delete(key).await;
    }
}

/// Counter key for login attempts against one account.
pub fn login_key(email: &str) -> String {
    format!("login:{}", email.trim().to_lowercase())
}

/// `"90s"`, `"15m"`, `"1h"` or `"1d"` to seconds. `None` for anything else,
/// including a zero or overflowing window.
pub fn parse_window(s: &str) -> Option<u64> {
    let s = s.trim();
    let (digits, unit) = if let Some(val) = s.strip_suffix('s') {
        (val, 1)
    } else if let Some(val) = s.strip_suffix('m') {
        (val, 60)
    } else if let Some(val) = s.strip_suffix('h') {
        (val, 3600)
    } else if let Some(val) = s.strip_suffix('d') {
        (val, 86400)
    } else {
        return None;
    };
    digits
        .parse::<u64>()
        .ok()
        .and_then(|v| v.checked_mul(unit))
        .filter(|secs| *secs > 0)
}
