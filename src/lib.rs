//! Deskline: support-chat backend library, shared by the server binary and
//! the integration tests in `tests/`.

use std::sync::Arc;

pub mod accounts;
pub mod api;
pub mod auth;
pub mod cache;
pub mod cli;
pub mod config;
pub mod errors;
pub mod invalidation;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod mutations;
pub mod notification;
pub mod store;
pub mod views;

use auth::TokenService;
use cache::{CacheClient, CacheStore};
use invalidation::Invalidator;
use middleware::rate_limit::RateLimiter;
use mutations::SupportDesk;
use notification::ChangeNotifier;
use store::{RevocationLedger, SupportStore};
use views::{ReadModels, ViewTtls};

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub config: config::Config,
    pub store: Arc<dyn SupportStore>,
    pub tokens: Arc<TokenService>,
    pub limiter: RateLimiter,
    pub views: ReadModels,
    pub desk: SupportDesk,
}

impl AppState {
    /// Wire every service around one relational store and one cache store.
    /// Fails if the signing secrets are unusable.
    pub fn build<S>(
        config: config::Config,
        store: Arc<S>,
        cache_store: Arc<dyn CacheStore>,
    ) -> anyhow::Result<Self>
    where
        S: SupportStore + RevocationLedger + 'static,
    {
        let cache = CacheClient::new(cache_store, config.cache_timeout);
        let ledger: Arc<dyn RevocationLedger> = store.clone();
        let store: Arc<dyn SupportStore> = store;

        let tokens = Arc::new(TokenService::new(
            &config.secrets,
            config.token_issuer.clone(),
            cache.clone(),
            ledger,
        )?);
        let limiter = RateLimiter::new(
            cache.clone(),
            config.login_max_attempts,
            config.login_window,
        );
        let invalidator = Invalidator::new(cache.clone());
        let views = ReadModels::new(
            store.clone(),
            cache.clone(),
            invalidator.clone(),
            ViewTtls::default(),
        );
        let desk = SupportDesk::new(
            store.clone(),
            invalidator,
            ChangeNotifier::new(cache.clone()),
        );

        Ok(Self {
            config,
            store,
            tokens,
            limiter,
            views,
            desk,
        })
    }
}
