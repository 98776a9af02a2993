use std::time::Duration;

use crate::auth::TokenSecrets;
use crate::middleware::rate_limit::parse_window;

const PLACEHOLDER_ADMIN_SECRET: &str = "CHANGE_ME_ADMIN_SECRET";
const PLACEHOLDER_AGENT_SECRET: &str = "CHANGE_ME_AGENT_SECRET";
const PLACEHOLDER_USER_SECRET: &str = "CHANGE_ME_USER_SECRET";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub secrets: TokenSecrets,
    pub token_issuer: String,
    /// Failed-or-not login attempts allowed per window.
    /// Set via DESKLINE_LOGIN_MAX_ATTEMPTS. Default: 5.
    pub login_max_attempts: i64,
    /// Set via DESKLINE_LOGIN_WINDOW ("15m" style). Default: 15 minutes.
    pub login_window: Duration,
    /// Upper bound on any single cache store call.
    pub cache_timeout: Duration,
    pub dashboard_origin: String,
    pub production: bool,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Build a config from any key lookup. `load()` passes the process env.
pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
    let env_mode = get("DESKLINE_ENV")
        .or_else(|| get("RUST_ENV"))
        .unwrap_or_default();
    let production = env_mode == "production";

    let secret = |var: &str, placeholder: &str| -> anyhow::Result<String> {
        match get(var).filter(|v| !v.trim().is_empty()) {
            Some(value) if value != placeholder => Ok(value),
            _ if production => anyhow::bail!(
                "{} is not set or still the insecure placeholder. \
                 Set a strong random secret before running in production.",
                var
            ),
            _ => {
                tracing::warn!(var = var, "signing secret not set, using insecure placeholder");
                Ok(placeholder.to_string())
            }
        }
    };

    let secrets = TokenSecrets {
        admin: secret("JWT_ADMIN_SECRET", PLACEHOLDER_ADMIN_SECRET)?,
        agent: secret("JWT_AGENT_SECRET", PLACEHOLDER_AGENT_SECRET)?,
        user: secret("JWT_USER_SECRET", PLACEHOLDER_USER_SECRET)?,
    };

    let login_window = match get("DESKLINE_LOGIN_WINDOW") {
        Some(raw) => parse_window(&raw).ok_or_else(|| {
            anyhow::anyhow!(
                "DESKLINE_LOGIN_WINDOW must be a positive duration like 15m, got '{}'",
                raw
            )
        })?,
        None => 15 * 60,
    };

    Ok(Config {
        port: get("DESKLINE_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(8000),
        database_url: get("DATABASE_URL")
            .unwrap_or_else(|| "postgres://localhost/deskline".into()),
        redis_url: get("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".into()),
        secrets,
        token_issuer: get("DESKLINE_TOKEN_ISSUER").unwrap_or_else(|| "deskline-backend".into()),
        login_max_attempts: get("DESKLINE_LOGIN_MAX_ATTEMPTS")
            .and_then(|v| v.parse().ok())
            .filter(|n: &i64| *n > 0)
            .unwrap_or(5),
        login_window: Duration::from_secs(login_window),
        cache_timeout: Duration::from_millis(
            get("DESKLINE_CACHE_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(250),
        ),
        dashboard_origin: get("DASHBOARD_ORIGIN")
            .unwrap_or_else(|| "http://localhost:3000".into()),
        production,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.login_max_attempts, 5);
        assert_eq!(cfg.login_window, Duration::from_secs(900));
        assert_eq!(cfg.cache_timeout, Duration::from_millis(250));
        assert_eq!(cfg.token_issuer, "deskline-backend");
        assert!(!cfg.production);
    }

    #[test]
    fn test_overrides() {
        let cfg = from_lookup(lookup(&[
            ("DESKLINE_PORT", "9100"),
            ("DESKLINE_LOGIN_MAX_ATTEMPTS", "3"),
            ("DESKLINE_LOGIN_WINDOW", "1h"),
            ("JWT_ADMIN_SECRET", "a-live-secret"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.login_max_attempts, 3);
        assert_eq!(cfg.login_window, Duration::from_secs(3600));
        assert_eq!(cfg.secrets.admin, "a-live-secret");
    }

    #[test]
    fn test_rejects_unusable_login_window() {
        for raw in ["0s", "0m", "soon", "99999999999999999999h"] {
            assert!(
                from_lookup(lookup(&[("DESKLINE_LOGIN_WINDOW", raw)])).is_err(),
                "{}",
                raw
            );
        }
    }

    #[test]
    fn test_production_rejects_placeholders() {
        assert!(from_lookup(lookup(&[("DESKLINE_ENV", "production")])).is_err());
        let ok = from_lookup(lookup(&[
            ("DESKLINE_ENV", "production"),
            ("JWT_ADMIN_SECRET", "s1"),
            ("JWT_AGENT_SECRET", "s2"),
            ("JWT_USER_SECRET", "s3"),
        ]))
        .unwrap();
        assert!(ok.production);
    }
}
