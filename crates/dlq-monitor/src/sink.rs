// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reporting sinks that receive snapshots.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use std::time::Duration;
use tracing::{debug, info};

use crate::counter_store::{
    MESSAGES_DEAD_LETTERED, MESSAGES_DELIVERED, MESSAGES_RECEIVED, LOGS_CREATED,
};
use crate::errors::SinkError;
use crate::snapshot::Snapshot;

/// Acknowledgement that a snapshot was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack;

#[async_trait]
pub trait ReportingSink: Send + Sync {
    /// Hands a snapshot to the downstream consumer.
    async fn publish(&self, snapshot: &Snapshot) -> Result<Ack, SinkError>;
}

/// How often a publish is attempted before the snapshot stays buffered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Up to `n` attempts back to back.
    Immediate(u64),
    /// Up to `n` attempts, waiting `attempt * delay_ms` milliseconds after each failure.
    LinearBackoff(u64, u64),
}

impl RetryStrategy {
    #[must_use]
    pub fn attempts(&self) -> u64 {
        match self {
            Self::Immediate(attempts) | Self::LinearBackoff(attempts, _) => (*attempts).max(1),
        }
    }

    /// Delay after the failed `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u64) -> Duration {
        match self {
            Self::Immediate(_) => Duration::ZERO,
            Self::LinearBackoff(_, delay_ms) => {
                Duration::from_millis(delay_ms.saturating_mul(attempt))
            }
        }
    }
}

pub struct HttpSinkConfig {
    pub url: String,
    pub timeout: Duration,
    pub https_proxy: Option<String>,
    /// zstd level; `None` sends plain JSON.
    pub compression_level: Option<i32>,
}

/// POSTs snapshots as JSON.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
    compression_level: Option<i32>,
}

impl HttpSink {
    pub fn new(config: HttpSinkConfig) -> Result<Self, SinkError> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(proxy) = &config.https_proxy {
            let proxy = reqwest::Proxy::https(proxy)
                .map_err(|e| SinkError::Unavailable(format!("Invalid proxy {proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| SinkError::Unavailable(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: config.url,
            compression_level: config.compression_level,
        })
    }

    fn encode(&self, snapshot: &Snapshot) -> Result<(HeaderMap, Vec<u8>), SinkError> {
        let body = serde_json::to_vec(snapshot).map_err(|e| SinkError::Encode(e.to_string()))?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let Some(level) = self.compression_level else {
            return Ok((headers, body));
        };
        let compressed =
            zstd::encode_all(body.as_slice(), level).map_err(|e| SinkError::Encode(e.to_string()))?;
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("zstd"));
        Ok((headers, compressed))
    }
}

#[async_trait]
impl ReportingSink for HttpSink {
    async fn publish(&self, snapshot: &Snapshot) -> Result<Ack, SinkError> {
        let (headers, body) = self.encode(snapshot)?;
        debug!(
            "Publishing snapshot {} ({} bytes) to {}",
            snapshot.sequence(),
            body.len(),
            self.url
        );

        let response = self
            .client
            .post(&self.url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(Ack);
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(SinkError::Unavailable(format!("{status}: {body}")))
        }
    }
}

/// Writes a summary of every snapshot to the log. Used when no sink URL is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl ReportingSink for LogSink {
    async fn publish(&self, snapshot: &Snapshot) -> Result<Ack, SinkError> {
        info!(
            "snapshot {}: logs_created={} received={} delivered={} dead_lettered={} records={}",
            snapshot.sequence(),
            snapshot.total(LOGS_CREATED),
            snapshot.total(MESSAGES_RECEIVED),
            snapshot.total(MESSAGES_DELIVERED),
            snapshot.total(MESSAGES_DEAD_LETTERED),
            snapshot.dead_letter_records().len()
        );
        Ok(Ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tracing_test::traced_test;

    fn empty_snapshot() -> Snapshot {
        Snapshot::new(1, 0, BTreeMap::new(), Vec::new())
    }

    #[test]
    fn test_retry_strategy() {
        assert_eq!(RetryStrategy::Immediate(3).attempts(), 3);
        assert_eq!(RetryStrategy::Immediate(0).attempts(), 1);
        assert_eq!(RetryStrategy::Immediate(3).delay_after(2), Duration::ZERO);

        let linear = RetryStrategy::LinearBackoff(4, 100);
        assert_eq!(linear.attempts(), 4);
        assert_eq!(linear.delay_after(1), Duration::from_millis(100));
        assert_eq!(linear.delay_after(3), Duration::from_millis(300));
    }

    #[test]
    fn test_compressed_encoding() {
        let sink = HttpSink::new(HttpSinkConfig {
            url: "http://localhost:1/snapshots".to_string(),
            timeout: Duration::from_secs(1),
            https_proxy: None,
            compression_level: Some(3),
        })
        .expect("sink should build");

        let (headers, body) = sink.encode(&empty_snapshot()).expect("encode failed");
        assert_eq!(headers[CONTENT_ENCODING], "zstd");

        let decoded = zstd::decode_all(body.as_slice()).expect("decode failed");
        let snapshot: Snapshot = serde_json::from_slice(&decoded).expect("json failed");
        assert_eq!(snapshot, empty_snapshot());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_log_sink_always_acks() {
        assert_eq!(LogSink.publish(&empty_snapshot()).await, Ok(Ack));
        assert!(logs_contain("snapshot 1: logs_created=0"));
    }
}
