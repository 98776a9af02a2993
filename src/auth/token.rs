use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::CacheClient;
use crate::models::{Identity, Role};
use crate::store::RevocationLedger;

const ACCESS_TOKEN_TYPE: &str = "access";
pub const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// One signing secret per role. Never shared between roles.
#[derive(Clone)]
pub struct TokenSecrets {
    pub admin: String,
    pub agent: String,
    pub user: String,
}

impl TokenSecrets {
    fn for_role(&self, role: Role) -> &str {
        match role {
            Role::Admin => &self.admin,
            Role::Agent => &self.agent,
            Role::User => &self.user,
        }
    }
}

impl std::fmt::Debug for TokenSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenSecrets { .. }")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub iss: String,
    #[serde(rename = "type")]
    pub token_type: String,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token")]
    Invalid,
    #[error("token expired")]
    Expired,
    #[error("token role does not match its signing domain")]
    RoleMismatch,
    #[error("token revoked")]
    Revoked,
    #[error("session state unavailable: {0}")]
    Unavailable(anyhow::Error),
}

/// Ranked so that the most informative failure across candidate roles wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Failure {
    Invalid,
    RoleMismatch,
    Expired,
}

impl From<Failure> for TokenError {
    fn from(f: Failure) -> Self {
        match f {
            Failure::Invalid => TokenError::Invalid,
            Failure::RoleMismatch => TokenError::RoleMismatch,
            Failure::Expired => TokenError::Expired,
        }
    }
}

struct RoleKeys {
    role: Role,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

/// Issues and verifies access tokens, manages refresh tokens in the cache
/// store, and consults the revocation ledger.
pub struct TokenService {
    keys: Vec<RoleKeys>,
    issuer: String,
    validation: Validation,
    cache: CacheClient,
    ledger: Arc<dyn RevocationLedger>,
}

/// SHA-256 of the bearer string. The ledger stores this, never the token.
pub fn fingerprint(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn refresh_key(user_id: i64, token: &str) -> String {
    format!("refresh:{}:{}", user_id, token)
}

impl TokenService {
    pub fn new(
        secrets: &TokenSecrets,
        issuer: impl Into<String>,
        cache: CacheClient,
        ledger: Arc<dyn RevocationLedger>,
    ) -> anyhow::Result<Self> {
        for role in Role::ALL {
            if secrets.for_role(role).trim().is_empty() {
                anyhow::bail!("signing secret for role '{}' is empty", role);
            }
        }
        if secrets.admin == secrets.agent
            || secrets.admin == secrets.user
            || secrets.agent == secrets.user
        {
            anyhow::bail!("each role must have a distinct signing secret");
        }

        let keys = Role::ALL
            .iter()
            .map(|&role| {
                let secret = secrets.for_role(role).as_bytes();
                RoleKeys {
                    role,
                    encoding: EncodingKey::from_secret(secret),
                    decoding: DecodingKey::from_secret(secret),
                }
            })
            .collect();

        let issuer = issuer.into();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iat", "nbf", "iss"]);
        validation.validate_nbf = true;
        validation.leeway = 5;

        Ok(Self {
            keys,
            issuer,
            validation,
            cache,
            ledger,
        })
    }

    fn keys_for(&self, role: Role) -> Option<&RoleKeys> {
        self.keys.iter().find(|k| k.role == role)
    }

    pub fn issue(&self, user_id: i64, role: Role) -> anyhow::Result<IssuedToken> {
        let keys = self
            .keys_for(role)
            .ok_or_else(|| anyhow::anyhow!("no signing key for role '{}'", role))?;
        let now = Utc::now();
        let expires_at = now + role.token_lifetime();
        let claims = Claims {
            user_id,
            role,
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            iss: self.issuer.clone(),
            token_type: ACCESS_TOKEN_TYPE.to_string(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)?;
        Ok(IssuedToken { token, expires_at })
    }

    /// Verify against `candidates` only, in order. The first role whose
    /// secret validates the signature and whose name matches the embedded
    /// role claim wins.
    pub fn verify(&self, token: &str, candidates: &[Role]) -> Result<Identity, TokenError> {
        self.decode_claims(token, candidates)
            .map(|claims| Identity::new(claims.user_id, claims.role))
    }

    fn decode_claims(&self, token: &str, candidates: &[Role]) -> Result<Claims, TokenError> {
        let mut worst = Failure::Invalid;
        for &role in candidates {
            let Some(keys) = self.keys_for(role) else {
                continue;
            };
            let failure = match decode::<Claims>(token, &keys.decoding, &self.validation) {
                Ok(data) if data.claims.token_type != ACCESS_TOKEN_TYPE => Failure::Invalid,
                Ok(data) if data.claims.role != role => Failure::RoleMismatch,
                Ok(data) => return Ok(data.claims),
                Err(e) => match e.kind() {
                    ErrorKind::ExpiredSignature => Failure::Expired,
                    _ => Failure::Invalid,
                },
            };
            worst = worst.max(failure);
        }
        Err(worst.into())
    }

    /// Ledger check first, then signature verification.
    pub async fn authenticate(
        &self,
        token: &str,
        candidates: &[Role],
    ) -> Result<Identity, TokenError> {
        if self.is_revoked(token).await? {
            return Err(TokenError::Revoked);
        }
        self.verify(token, candidates)
    }

    pub async fn is_revoked(&self, token: &str) -> Result<bool, TokenError> {
        self.ledger
            .is_revoked(&fingerprint(token))
            .await
            .map_err(TokenError::Unavailable)
    }

    /// Revoke until `ttl` from now.
    pub async fn revoke(&self, token: &str, ttl: chrono::Duration) -> Result<(), TokenError> {
        let expires_at = Utc::now() + ttl;
        self.ledger
            .revoke(&fingerprint(token), expires_at)
            .await
            .map_err(TokenError::Unavailable)
    }

    /// Revoke a token this service issued for the rest of its validity.
    /// Returns the identity it carried.
    pub async fn revoke_access(
        &self,
        token: &str,
        candidates: &[Role],
    ) -> Result<Identity, TokenError> {
        let claims = self.decode_claims(token, candidates)?;
        let remaining = (claims.exp - Utc::now().timestamp()).max(1);
        self.revoke(token, chrono::Duration::seconds(remaining))
            .await?;
        tracing::info!(user_id = claims.user_id, role = %claims.role, "access token revoked");
        Ok(Identity::new(claims.user_id, claims.role))
    }

    pub async fn purge_expired_revocations(&self) -> anyhow::Result<u64> {
        self.ledger.purge_expired().await
    }

    // -- Refresh tokens --

    /// 256 random bits, hex encoded, stored for seven days.
    pub async fn issue_refresh(&self, user_id: i64) -> anyhow::Result<String> {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        self.cache
            .try_set(
                &refresh_key(user_id, &token),
                &user_id.to_string(),
                REFRESH_TOKEN_TTL,
            )
            .await?;
        Ok(token)
    }

    pub async fn validate_refresh(&self, user_id: i64, token: &str) -> anyhow::Result<bool> {
        if token.is_empty() {
            return Ok(false);
        }
        Ok(self
            .cache
            .try_get(&refresh_key(user_id, token))
            .await?
            .is_some())
    }

    /// Returns whether a stored token was removed.
    pub async fn revoke_refresh(&self, user_id: i64, token: &str) -> anyhow::Result<bool> {
        Ok(self.cache.try_delete(&refresh_key(user_id, token)).await? > 0)
    }

    /// Single-use redemption: the delete is the check, so only one of any
    /// number of concurrent callers presenting the same token gets `true`.
    pub async fn consume_refresh(&self, user_id: i64, token: &str) -> anyhow::Result<bool> {
        if token.is_empty() {
            return Ok(false);
        }
        self.revoke_refresh(user_id, token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::store::MemoryStore;

    fn secrets() -> TokenSecrets {
        TokenSecrets {
            admin: "admin-secret-for-tests".into(),
            agent: "agent-secret-for-tests".into(),
            user: "user-secret-for-tests".into(),
        }
    }

    fn service() -> TokenService {
        let cache = CacheClient::new(Arc::new(MemoryCache::new()), Duration::from_millis(250));
        TokenService::new(&secrets(), "deskline-test", cache, Arc::new(MemoryStore::new()))
            .unwrap()
    }

    fn forge(secret: &str, claims: &Claims) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims_for(user_id: i64, role: Role, exp_offset: i64) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            user_id,
            role,
            exp: now + exp_offset,
            iat: now - 10,
            nbf: now - 10,
            iss: "deskline-test".into(),
            token_type: "access".into(),
        }
    }

    #[test]
    fn test_rejects_shared_or_empty_secrets() {
        let cache = CacheClient::new(Arc::new(MemoryCache::new()), Duration::from_millis(250));
        let mut shared = secrets();
        shared.agent = shared.admin.clone();
        assert!(
            TokenService::new(&shared, "i", cache.clone(), Arc::new(MemoryStore::new())).is_err()
        );

        let mut empty = secrets();
        empty.user = "  ".into();
        assert!(TokenService::new(&empty, "i", cache, Arc::new(MemoryStore::new())).is_err());
    }

    #[test]
    fn test_round_trip_per_role() {
        let svc = service();
        for role in Role::ALL {
            let issued = svc.issue(42, role).unwrap();
            let identity = svc.verify(&issued.token, &[role]).unwrap();
            assert_eq!(identity, Identity::new(42, role));
        }
    }

    #[test]
    fn test_other_roles_do_not_verify() {
        let svc = service();
        let issued = svc.issue(7, Role::User).unwrap();
        assert!(matches!(
            svc.verify(&issued.token, &[Role::Admin]),
            Err(TokenError::Invalid)
        ));
        assert!(matches!(
            svc.verify(&issued.token, &[Role::Agent, Role::Admin]),
            Err(TokenError::Invalid)
        ));
        // Listed later than a failing role still verifies.
        assert!(svc.verify(&issued.token, &[Role::Admin, Role::User]).is_ok());
    }

    #[test]
    fn test_embedded_role_must_match_secret() {
        let svc = service();
        let token = forge(&secrets().agent, &claims_for(1, Role::Admin, 3600));
        assert!(matches!(
            svc.verify(&token, &[Role::Agent]),
            Err(TokenError::RoleMismatch)
        ));
        assert!(matches!(
            svc.verify(&token, &[Role::Admin]),
            Err(TokenError::Invalid)
        ));
    }

    #[test]
    fn test_expired_token() {
        let svc = service();
        let token = forge(&secrets().user, &claims_for(1, Role::User, -600));
        assert!(matches!(
            svc.verify(&token, &[Role::Admin, Role::User]),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn test_non_access_type_is_invalid() {
        let svc = service();
        let mut claims = claims_for(1, Role::User, 3600);
        claims.token_type = "refresh".into();
        let token = forge(&secrets().user, &claims);
        assert!(matches!(
            svc.verify(&token, &[Role::User]),
            Err(TokenError::Invalid)
        ));
    }

    #[test]
    fn test_wrong_issuer_is_invalid() {
        let svc = service();
        let mut claims = claims_for(1, Role::User, 3600);
        claims.iss = "someone-else".into();
        let token = forge(&secrets().user, &claims);
        assert!(matches!(
            svc.verify(&token, &[Role::User]),
            Err(TokenError::Invalid)
        ));
    }

    #[test]
    fn test_lifetimes_follow_role() {
        let svc = service();
        let admin = svc.issue(1, Role::Admin).unwrap();
        let user = svc.issue(1, Role::User).unwrap();
        assert!(admin.expires_at < user.expires_at);
    }

    #[tokio::test]
    async fn test_revocation_is_immediate() {
        let svc = service();
        let issued = svc.issue(3, Role::Agent).unwrap();
        assert!(svc.authenticate(&issued.token, &[Role::Agent]).await.is_ok());

        svc.revoke_access(&issued.token, &[Role::Agent]).await.unwrap();
        assert!(matches!(
            svc.authenticate(&issued.token, &[Role::Agent]).await,
            Err(TokenError::Revoked)
        ));
        // Other tokens for the same actor are unaffected.
        let fresh = forge(&secrets().agent, &claims_for(3, Role::Agent, 1800));
        assert!(svc.authenticate(&fresh, &[Role::Agent]).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_token_lifecycle() {
        let svc = service();
        let token = svc.issue_refresh(5).await.unwrap();
        assert_eq!(token.len(), 64);
        assert!(svc.validate_refresh(5, &token).await.unwrap());
        assert!(!svc.validate_refresh(6, &token).await.unwrap());

        assert!(svc.revoke_refresh(5, &token).await.unwrap());
        assert!(!svc.validate_refresh(5, &token).await.unwrap());
        assert!(!svc.revoke_refresh(5, &token).await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_token_redeems_once() {
        let svc = service();
        let token = svc.issue_refresh(5).await.unwrap();

        assert!(!svc.consume_refresh(6, &token).await.unwrap());
        assert!(!svc.consume_refresh(5, "").await.unwrap());

        let (first, second) = tokio::join!(
            svc.consume_refresh(5, &token),
            svc.consume_refresh(5, &token)
        );
        let wins = [first.unwrap(), second.unwrap()]
            .iter()
            .filter(|won| **won)
            .count();
        assert_eq!(wins, 1);
        assert!(!svc.validate_refresh(5, &token).await.unwrap());
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let a = fingerprint("abc");
        assert_eq!(a.len(), 64);
        assert_eq!(a, fingerprint("abc"));
        assert_ne!(a, fingerprint("abd"));
    }
}
