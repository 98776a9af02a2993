//! Shared wiring for the integration tests: the full service graph over the
//! in-memory store and cache, no Postgres or Redis required.

#![allow(dead_code)]

use std::sync::Arc;

use deskline::accounts::{create_account, NewAccount};
use deskline::cache::MemoryCache;
use deskline::config;
use deskline::models::{Identity, Role, User};
use deskline::store::MemoryStore;
use deskline::AppState;

pub const PASSWORD: &str = "correct-horse-battery";

pub struct Harness {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryCache>,
}

pub fn harness() -> Harness {
    harness_with(|_| None)
}

/// Same as [`harness`], with selected config keys overridden.
pub fn harness_with(get: impl Fn(&str) -> Option<String>) -> Harness {
    let cfg = config::from_lookup(get).unwrap();
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(MemoryCache::new());
    let state = Arc::new(AppState::build(cfg, store.clone(), cache.clone()).unwrap());
    Harness {
        state,
        store,
        cache,
    }
}

impl Harness {
    pub async fn account(&self, email: &str, role: Role) -> User {
        create_account(
            self.store.as_ref(),
            NewAccount {
                email: email.to_string(),
                password: PASSWORD.to_string(),
                full_name: format!("{} account", role),
                role,
            },
        )
        .await
        .unwrap()
    }

    pub async fn identity(&self, email: &str, role: Role) -> Identity {
        let user = self.account(email, role).await;
        Identity::new(user.id, role)
    }

    pub fn bearer(&self, identity: Identity) -> String {
        let issued = self
            .state
            .tokens
            .issue(identity.user_id, identity.role)
            .unwrap();
        format!("Bearer {}", issued.token)
    }
}
