// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_COMPRESSION_LEVEL, DEFAULT_DELIVERED_RETENTION_SECS, DEFAULT_HOST, DEFAULT_LOG_LEVEL,
    DEFAULT_MAX_PENDING_OUTCOMES, DEFAULT_MAX_RETRIES, DEFAULT_PARKED_OUTCOME_TTL_SECS,
    DEFAULT_PORT, DEFAULT_SINK_BACKOFF_MS,
    DEFAULT_SINK_RETRIES, DEFAULT_SINK_TIMEOUT_SECS, DEFAULT_SNAPSHOT_BUFFER_SIZE,
    DEFAULT_SNAPSHOT_INTERVAL_SECS, DEFAULT_WORKERS,
};
use crate::counter_store::BucketGranularity;
use crate::errors::ConfigError;
use crate::sink::{HttpSinkConfig, RetryStrategy};
use crate::util::non_blank;

const ENV_PREFIX: &str = "DLQ_MONITOR_";
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Static configuration of the monitoring pipeline and its agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Failed delivery attempts after which a message is dead-lettered
    pub max_retries: u32,
    pub snapshot_interval: Duration,
    pub bucket_granularity: BucketGranularity,
    /// Snapshots kept while the sink is unavailable
    pub snapshot_buffer_size: usize,
    /// Ingestion workers; events are sharded over them by resource id
    pub workers: usize,
    /// Outcomes parked per worker while waiting for their receipt
    pub max_pending_outcomes: usize,
    /// How long a parked outcome waits for its receipt
    pub parked_outcome_ttl: Duration,
    /// How long delivered markers are kept to recognize duplicates
    pub delivered_retention: Duration,
    /// Snapshots are only logged when unset
    pub sink_url: Option<String>,
    pub sink_timeout: Duration,
    pub sink_compression: bool,
    pub sink_retries: u64,
    pub sink_backoff_ms: u64,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub https_proxy: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            snapshot_interval: Duration::from_secs(DEFAULT_SNAPSHOT_INTERVAL_SECS),
            bucket_granularity: BucketGranularity::default(),
            snapshot_buffer_size: DEFAULT_SNAPSHOT_BUFFER_SIZE,
            workers: DEFAULT_WORKERS,
            max_pending_outcomes: DEFAULT_MAX_PENDING_OUTCOMES,
            parked_outcome_ttl: Duration::from_secs(DEFAULT_PARKED_OUTCOME_TTL_SECS),
            delivered_retention: Duration::from_secs(DEFAULT_DELIVERED_RETENTION_SECS),
            sink_url: None,
            sink_timeout: Duration::from_secs(DEFAULT_SINK_TIMEOUT_SECS),
            sink_compression: false,
            sink_retries: DEFAULT_SINK_RETRIES,
            sink_backoff_ms: DEFAULT_SINK_BACKOFF_MS,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            https_proxy: None,
        }
    }
}

fn var(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{name}")).ok()
}

fn parsed<T: FromStr>(name: &str, default: T) -> T {
    var(name)
        .and_then(|val| val.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl MonitorConfig {
    /// Reads `DLQ_MONITOR_*` variables. Unparsable numbers fall back to their default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let bucket_granularity = match var("BUCKET_GRANULARITY") {
            Some(val) => val.parse::<BucketGranularity>()?,
            None => defaults.bucket_granularity,
        };
        let sink_url = var("SINK_URL").and_then(|val| non_blank(Some(val.as_str())).map(str::to_string));
        let sink_compression = var("SINK_COMPRESSION")
            .map(|val| val.trim().to_lowercase() == "true")
            .unwrap_or(defaults.sink_compression);
        let https_proxy = var("PROXY_HTTPS")
            .or_else(|| env::var("HTTPS_PROXY").ok())
            .and_then(|val| non_blank(Some(val.as_str())).map(str::to_string));
        let log_level = var("LOG_LEVEL")
            .map(|val| val.trim().to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            max_retries: parsed("MAX_RETRIES", defaults.max_retries),
            snapshot_interval: Duration::from_secs(parsed(
                "SNAPSHOT_INTERVAL_SECS",
                defaults.snapshot_interval.as_secs(),
            )),
            bucket_granularity,
            snapshot_buffer_size: parsed("SNAPSHOT_BUFFER_SIZE", defaults.snapshot_buffer_size),
            workers: parsed("WORKERS", defaults.workers),
            max_pending_outcomes: parsed("MAX_PENDING_OUTCOMES", defaults.max_pending_outcomes),
            parked_outcome_ttl: Duration::from_secs(parsed(
                "PARKED_OUTCOME_TTL_SECS",
                defaults.parked_outcome_ttl.as_secs(),
            )),
            delivered_retention: Duration::from_secs(parsed(
                "DELIVERED_RETENTION_SECS",
                defaults.delivered_retention.as_secs(),
            )),
            sink_url,
            sink_timeout: Duration::from_secs(parsed(
                "SINK_TIMEOUT_SECS",
                defaults.sink_timeout.as_secs(),
            )),
            sink_compression,
            sink_retries: parsed("SINK_RETRIES", defaults.sink_retries),
            sink_backoff_ms: parsed("SINK_BACKOFF_MS", defaults.sink_backoff_ms),
            host: var("HOST").unwrap_or(defaults.host),
            port: parsed("PORT", defaults.port),
            log_level,
            https_proxy,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.snapshot_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "snapshot interval must be greater than 0".to_string(),
            ));
        }
        if self.snapshot_buffer_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "snapshot buffer size must be at least 1".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::InvalidConfig(
                "at least one worker is required".to_string(),
            ));
        }
        if self.parked_outcome_ttl.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "parked outcome ttl must be greater than 0".to_string(),
            ));
        }
        if self.sink_timeout.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "sink timeout must be greater than 0".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "port must be greater than 0".to_string(),
            ));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig("host cannot be empty".to_string()));
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn retry_strategy(&self) -> RetryStrategy {
        RetryStrategy::LinearBackoff(self.sink_retries, self.sink_backoff_ms)
    }

    /// HTTP sink settings, if a sink URL is configured.
    #[must_use]
    pub fn http_sink(&self) -> Option<HttpSinkConfig> {
        self.sink_url.as_ref().map(|url| HttpSinkConfig {
            url: url.clone(),
            timeout: self.sink_timeout,
            https_proxy: self.https_proxy.clone(),
            compression_level: self.sink_compression.then_some(DEFAULT_COMPRESSION_LEVEL),
        })
    }
}
