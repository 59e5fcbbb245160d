pub mod duration_parser;

use anyhow::{Context as _, anyhow};
use std::time::Duration;

pub use duration_parser::parse_duration;

/// Process-wide settings read from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub discord_token: Option<String>,
    /// Upper bound for any single tracking operation, store calls included.
    pub store_timeout: Duration,
    pub scheduler_poll_interval: Duration,
    pub scheduler_max_attempts: i32,
    pub scheduler_batch_size: u64,
    pub counts_staleness: Duration,
    /// Tries per gateway event when the failure is transient.
    pub event_attempts: u32,
    /// Delay before the first retry; doubles after each one.
    pub event_retry_backoff: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            discord_token: None,
            store_timeout: Duration::from_secs(10),
            scheduler_poll_interval: Duration::from_secs(60),
            scheduler_max_attempts: 5,
            scheduler_batch_size: 100,
            counts_staleness: Duration::from_secs(4 * 3600),
            event_attempts: 4,
            event_retry_backoff: Duration::from_millis(250),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup, so tests don't have to touch the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let database_url = lookup("DATABASE_URL").ok_or_else(|| anyhow!("DATABASE_URL must be set"))?;

        let duration = |key: &str, default: Duration| -> anyhow::Result<Duration> {
            match lookup(key) {
                Some(raw) => parse_duration(&raw)
                    .ok_or_else(|| anyhow!("{key} is not a valid duration: {raw:?}")),
                None => Ok(default),
            }
        };

        let scheduler_max_attempts = match lookup("SCHEDULER_MAX_ATTEMPTS") {
            Some(raw) => raw
                .parse::<i32>()
                .with_context(|| format!("SCHEDULER_MAX_ATTEMPTS is not a number: {raw:?}"))?
                .max(1),
            None => defaults.scheduler_max_attempts,
        };

        let scheduler_batch_size = match lookup("SCHEDULER_BATCH_SIZE") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("SCHEDULER_BATCH_SIZE is not a number: {raw:?}"))?
                .max(1),
            None => defaults.scheduler_batch_size,
        };

        let event_attempts = match lookup("EVENT_ATTEMPTS") {
            Some(raw) => raw
                .parse::<u32>()
                .with_context(|| format!("EVENT_ATTEMPTS is not a number: {raw:?}"))?
                .max(1),
            None => defaults.event_attempts,
        };

        Ok(Self {
            database_url,
            discord_token: lookup("DISCORD_TOKEN"),
            store_timeout: duration("STORE_TIMEOUT", defaults.store_timeout)?,
            scheduler_poll_interval: duration(
                "SCHEDULER_POLL_INTERVAL",
                defaults.scheduler_poll_interval,
            )?,
            scheduler_max_attempts,
            scheduler_batch_size,
            counts_staleness: duration("COUNTS_STALENESS", defaults.counts_staleness)?,
            event_attempts,
            event_retry_backoff: defaults.event_retry_backoff,
        })
    }
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
    fn defaults_apply_when_only_database_url_is_set() {
        let config = AppConfig::from_lookup(lookup(&[("DATABASE_URL", "sqlite::memory:")])).unwrap();

        assert_eq!(config.store_timeout, Duration::from_secs(10));
        assert_eq!(config.scheduler_poll_interval, Duration::from_secs(60));
        assert_eq!(config.scheduler_max_attempts, 5);
        assert_eq!(config.event_attempts, 4);
        assert!(config.discord_token.is_none());
    }

    #[test]
    fn durations_use_the_short_format() {
        let config = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("SCHEDULER_POLL_INTERVAL", "1m30s"),
            ("COUNTS_STALENESS", "2h"),
        ]))
        .unwrap();

        assert_eq!(config.scheduler_poll_interval, Duration::from_secs(90));
        assert_eq!(config.counts_staleness, Duration::from_secs(7200));
    }

    #[test]
    fn event_attempts_never_drop_below_one() {
        let config = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("EVENT_ATTEMPTS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.event_attempts, 1);
    }

    #[test]
    fn missing_database_url_is_an_error() {
        assert!(AppConfig::from_lookup(lookup(&[])).is_err());
    }

    #[test]
    fn bad_duration_is_an_error() {
        let res = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("STORE_TIMEOUT", "soon"),
        ]));
        assert!(res.is_err());
    }
}
