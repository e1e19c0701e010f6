use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;
use crate::projection::FirestoreConfig;
use crate::services::RetryPolicy;

/// Where bearer tokens get verified.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentitySource {
    Verifier(String),
    StaticTokens(String),
    None,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub store_timeout: Duration,
    pub retry: RetryPolicy,
    pub slug_probe_cap: u32,
    /// 0 disables the reconcile sweep.
    pub reconcile_interval_secs: u64,
    pub fanout_require_students: bool,
    pub firestore: Option<FirestoreConfig>,
    pub identity: IdentitySource,
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, AppError>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{} has an invalid value {:?}: {}", key, raw, e))),
        _ => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://course_sync.db?mode=rwc".to_string());
        let bind_addr = parse(&lookup, "BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000)))?;

        let store_timeout = Duration::from_millis(parse(&lookup, "STORE_TIMEOUT_MS", 5000u64)?);
        let max_attempts = parse(&lookup, "RETRY_MAX_ATTEMPTS", 3u32)?;
        if max_attempts == 0 {
            return Err(AppError::Config("RETRY_MAX_ATTEMPTS must be at least 1".to_string()));
        }
        let retry = RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(parse(&lookup, "RETRY_BASE_DELAY_MS", 50u64)?),
            ..RetryPolicy::default()
        };

        let identity = match (lookup("IDENTITY_VERIFY_URL"), lookup("IDENTITY_STATIC_TOKENS")) {
            (Some(url), _) if !url.trim().is_empty() => IdentitySource::Verifier(url.trim().to_string()),
            (_, Some(tokens)) if !tokens.trim().is_empty() => IdentitySource::StaticTokens(tokens),
            _ => IdentitySource::None,
        };

        Ok(Self {
            database_url,
            bind_addr,
            store_timeout,
            retry,
            slug_probe_cap: parse(&lookup, "SLUG_PROBE_CAP", 1000u32)?,
            reconcile_interval_secs: parse(&lookup, "RECONCILE_INTERVAL_SECS", 60u64)?,
            fanout_require_students: parse(&lookup, "FANOUT_REQUIRE_STUDENTS", false)?,
            firestore: FirestoreConfig::from_lookup(&lookup)?,
            identity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, AppError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:3000");
        assert_eq!(config.store_timeout, Duration::from_millis(5000));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.slug_probe_cap, 1000);
        assert_eq!(config.reconcile_interval_secs, 60);
        assert!(!config.fanout_require_students);
        assert!(config.firestore.is_none());
        assert_eq!(config.identity, IdentitySource::None);
    }

    #[test]
    fn reads_overrides() {
        let config = config(&[
            ("BIND_ADDR", "0.0.0.0:8080"),
            ("RETRY_MAX_ATTEMPTS", "5"),
            ("FANOUT_REQUIRE_STUDENTS", "true"),
            ("RECONCILE_INTERVAL_SECS", "0"),
            ("FIRESTORE_PROJECT_ID", "school"),
            ("FIRESTORE_TOKEN", "secret"),
            ("IDENTITY_STATIC_TOKENS", "abc=t1:teacher"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.fanout_require_students);
        assert_eq!(config.reconcile_interval_secs, 0);
        let firestore = config.firestore.expect("firestore config");
        assert_eq!(firestore.database, "(default)");
        assert_eq!(config.identity, IdentitySource::StaticTokens("abc=t1:teacher".to_string()));
    }

    #[test]
    fn verifier_url_wins_over_static_tokens() {
        let config = config(&[
            ("IDENTITY_VERIFY_URL", "https://auth.local/verify"),
            ("IDENTITY_STATIC_TOKENS", "abc=t1:teacher"),
        ])
        .unwrap();
        assert_eq!(config.identity, IdentitySource::Verifier("https://auth.local/verify".to_string()));
    }

    #[test]
    fn invalid_values_are_config_errors() {
        assert!(matches!(config(&[("STORE_TIMEOUT_MS", "soon")]), Err(AppError::Config(_))));
        assert!(matches!(config(&[("RETRY_MAX_ATTEMPTS", "0")]), Err(AppError::Config(_))));
        assert!(matches!(config(&[("FIRESTORE_PROJECT_ID", "school")]), Err(AppError::Config(_))));
    }
}
