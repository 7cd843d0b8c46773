//! Worker configuration, read from the environment.
//!
//! | variable | default |
//! |---|---|
//! | `DATABASE_URL` | required |
//! | `DATABASE_MAX_CONNECTIONS` | `10` |
//! | `REDIS_URL` | `redis://localhost:6379` |
//! | `TYPHOON_SUBMISSION_STREAM` | `typhoon:train-requests` |
//! | `TYPHOON_CONSUMER_GROUP` | `typhoon.trainer` |
//! | `TYPHOON_CONSUMER_NAME` | `consumer-<uuidv7>` |
//! | `TYPHOON_DEAD_LETTER_STREAM` | `typhoon:train-requests:dlq` |
//! | `TYPHOON_MAX_DELIVERIES` | `5` |
//! | `TYPHOON_PENDING_IDLE_MS` | `60000` |
//! | `TYPHOON_PRIORITY_STREAK_LIMIT` | `5` |
//! | `TYPHOON_IDLE_INTERVAL_MS` | `500` (also the stream read block time) |
//! | `TYPHOON_FIT_EPOCHS` | `20` |
//! | `TYPHOON_FIT_PATIENCE` | `2` |
//! | `TYPHOON_RECOVERY_MAX_ATTEMPTS` | `3` |
//! | `TYPHOON_RECOVERY_DRAIN_INTERVAL_SECS` | unset (never drain automatically) |
//! | `TYPHOON_LINEAR_TREND_MODEL_TYPE_ID` | `1` |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use typhoon_ai::FitOptions;
use typhoon_core::ModelTypeId;

use crate::ingestion::DEFAULT_MAX_DELIVERIES;
use crate::jobs::{DEFAULT_MAX_ATTEMPTS, DEFAULT_STREAK_LIMIT};

pub const DEFAULT_SUBMISSION_STREAM: &str = "typhoon:train-requests";
pub const DEFAULT_CONSUMER_GROUP: &str = "typhoon.trainer";
pub const DEFAULT_DEAD_LETTER_STREAM: &str = "typhoon:train-requests:dlq";
pub const DEFAULT_PENDING_IDLE_MS: u64 = 60_000;
const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_IDLE_INTERVAL_MS: u64 = 500;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value '{value}' for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Consumer-group settings of the submission stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    pub stream_key: String,
    pub group: String,
    pub consumer: String,
    pub dead_letter_key: String,
    pub max_deliveries: u32,
    /// Entries pending this long are reclaimed.
    pub pending_idle: Duration,
    /// `XREADGROUP BLOCK` time of one poll.
    pub block: Duration,
}

impl StreamSettings {
    pub fn new(stream_key: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            stream_key: stream_key.into(),
            group: group.into(),
            consumer: format!("consumer-{}", Uuid::now_v7()),
            dead_letter_key: DEFAULT_DEAD_LETTER_STREAM.to_string(),
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            pending_idle: Duration::from_millis(DEFAULT_PENDING_IDLE_MS),
            block: Duration::from_millis(DEFAULT_IDLE_INTERVAL_MS),
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self::new(DEFAULT_SUBMISSION_STREAM, DEFAULT_CONSUMER_GROUP)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub redis_url: String,
    pub stream: StreamSettings,
    pub streak_limit: u32,
    pub idle_interval: Duration,
    pub fit: FitOptions,
    pub recovery_max_attempts: u32,
    /// `None` disables the automatic drain.
    pub recovery_drain_interval: Option<Duration>,
    pub linear_trend_model_type_id: ModelTypeId,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let redis_url = get("REDIS_URL").unwrap_or_else(|| {
            warn!(default = DEFAULT_REDIS_URL, "REDIS_URL not set, using default");
            DEFAULT_REDIS_URL.to_string()
        });

        let mut stream = StreamSettings::new(
            get("TYPHOON_SUBMISSION_STREAM").unwrap_or_else(|| DEFAULT_SUBMISSION_STREAM.to_string()),
            get("TYPHOON_CONSUMER_GROUP").unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
        );
        if let Some(consumer) = get("TYPHOON_CONSUMER_NAME") {
            stream.consumer = consumer;
        }
        if let Some(dlq) = get("TYPHOON_DEAD_LETTER_STREAM") {
            stream.dead_letter_key = dlq;
        }
        stream.max_deliveries = parse(&get, "TYPHOON_MAX_DELIVERIES", DEFAULT_MAX_DELIVERIES)?;
        stream.pending_idle = Duration::from_millis(parse(
            &get,
            "TYPHOON_PENDING_IDLE_MS",
            DEFAULT_PENDING_IDLE_MS,
        )?);

        let idle_interval = Duration::from_millis(parse(
            &get,
            "TYPHOON_IDLE_INTERVAL_MS",
            DEFAULT_IDLE_INTERVAL_MS,
        )?);
        stream.block = idle_interval;

        let defaults = FitOptions::default();
        let drain_secs: u64 = parse(&get, "TYPHOON_RECOVERY_DRAIN_INTERVAL_SECS", 0)?;

        Ok(Self {
            database_url,
            database_max_connections: parse(
                &get,
                "DATABASE_MAX_CONNECTIONS",
                DEFAULT_MAX_CONNECTIONS,
            )?,
            redis_url,
            stream,
            streak_limit: parse(&get, "TYPHOON_PRIORITY_STREAK_LIMIT", DEFAULT_STREAK_LIMIT)?,
            idle_interval,
            fit: FitOptions {
                epochs: parse(&get, "TYPHOON_FIT_EPOCHS", defaults.epochs)?,
                patience: parse(&get, "TYPHOON_FIT_PATIENCE", defaults.patience)?,
            },
            recovery_max_attempts: parse(
                &get,
                "TYPHOON_RECOVERY_MAX_ATTEMPTS",
                DEFAULT_MAX_ATTEMPTS,
            )?,
            recovery_drain_interval: (drain_secs > 0).then(|| Duration::from_secs(drain_secs)),
            linear_trend_model_type_id: ModelTypeId(parse(
                &get,
                "TYPHOON_LINEAR_TREND_MODEL_TYPE_ID",
                1i64,
            )?),
        })
    }
}

fn parse<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
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
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config = WorkerConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://db/typhoon")]))
            .unwrap();

        assert_eq!(config.database_url, "postgres://db/typhoon");
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.stream.stream_key, "typhoon:train-requests");
        assert_eq!(config.stream.group, "typhoon.trainer");
        assert!(config.stream.consumer.starts_with("consumer-"));
        assert_eq!(config.stream.dead_letter_key, "typhoon:train-requests:dlq");
        assert_eq!(config.stream.max_deliveries, 5);
        assert_eq!(config.stream.pending_idle, Duration::from_secs(60));
        assert_eq!(config.streak_limit, 5);
        assert_eq!(config.idle_interval, Duration::from_millis(500));
        assert_eq!(config.stream.block, config.idle_interval);
        assert_eq!(config.fit, FitOptions { epochs: 20, patience: 2 });
        assert_eq!(config.recovery_max_attempts, 3);
        assert_eq!(config.recovery_drain_interval, None);
        assert_eq!(config.linear_trend_model_type_id, ModelTypeId(1));
    }

    #[test]
    fn overrides_apply() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/typhoon"),
            ("TYPHOON_CONSUMER_NAME", "trainer-a"),
            ("TYPHOON_PRIORITY_STREAK_LIMIT", "3"),
            ("TYPHOON_RECOVERY_DRAIN_INTERVAL_SECS", "30"),
            ("TYPHOON_FIT_EPOCHS", " 40 "),
        ]))
        .unwrap();

        assert_eq!(config.stream.consumer, "trainer-a");
        assert_eq!(config.streak_limit, 3);
        assert_eq!(config.recovery_drain_interval, Some(Duration::from_secs(30)));
        assert_eq!(config.fit.epochs, 40);
    }

    #[test]
    fn database_url_is_required() {
        assert_eq!(
            WorkerConfig::from_lookup(lookup(&[])),
            Err(ConfigError::Missing("DATABASE_URL"))
        );
        assert_eq!(
            WorkerConfig::from_lookup(lookup(&[("DATABASE_URL", "  ")])),
            Err(ConfigError::Missing("DATABASE_URL"))
        );
    }

    #[test]
    fn non_numeric_values_are_rejected() {
        let err = WorkerConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/typhoon"),
            ("TYPHOON_MAX_DELIVERIES", "many"),
        ]))
        .unwrap_err();

        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "TYPHOON_MAX_DELIVERIES",
                value: "many".to_string(),
            }
        );
    }
}
