//! Background job: purge expired entries from the revocation ledger.
//!
//! Runs hourly. A revoked token whose natural expiry has passed is rejected
//! by signature validation anyway, so its ledger row is dead weight.

use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use crate::auth::TokenService;

pub const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Spawn the background cleanup task. Call this once at startup.
pub fn spawn(tokens: Arc<TokenService>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(PURGE_INTERVAL); // every hour
        loop {
            interval.tick().await;
            if let Err(e) = purge_revocations(&tokens).await {
                tracing::error!(error = %e, "revocation purge failed");
            }
        }
    })
}

pub async fn purge_revocations(tokens: &TokenService) -> anyhow::Result<u64> {
    let purged = tokens.purge_expired_revocations().await?;
    if purged > 0 {
        tracing::info!(rows = purged, "purged expired revocation entries");
    }
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenSecrets;
    use crate::cache::{CacheClient, MemoryCache};
    use crate::store::{MemoryStore, RevocationLedger};

    #[tokio::test]
    async fn test_purge_drops_only_expired_entries() {
        let store = Arc::new(MemoryStore::new());
        let secrets = TokenSecrets {
            admin: "a-secret".into(),
            agent: "b-secret".into(),
            user: "c-secret".into(),
        };
        let cache = CacheClient::new(Arc::new(MemoryCache::new()), Duration::from_millis(250));
        let tokens = TokenService::new(&secrets, "deskline-test", cache, store.clone()).unwrap();

        let now = chrono::Utc::now();
        store.revoke("stale", now - chrono::Duration::minutes(1)).await.unwrap();
        store.revoke("live", now + chrono::Duration::hours(1)).await.unwrap();

        assert_eq!(purge_revocations(&tokens).await.unwrap(), 1);
        assert_eq!(store.revocation_count().await, 1);
        assert!(store.is_revoked("live").await.unwrap());
    }
}
