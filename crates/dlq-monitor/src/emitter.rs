// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Buffered, retried delivery of snapshots to a [`ReportingSink`].
//!
//! ```text
//!   snapshot ─> [ oldest ... newest ] ─> publish (timeout, retry) ─> Ack ─> pop
//!                  │ full
//!                  └─> drop oldest, SnapshotDroppedWarning
//! ```
//!
//! A snapshot leaves the buffer only once the sink acknowledged it, was rejected
//! permanently, or was pushed out by a newer one.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::errors::{SinkError, SnapshotDroppedWarning};
use crate::sink::{Ack, ReportingSink, RetryStrategy};
use crate::snapshot::Snapshot;

const BUFFER_FULL_REASON: &str = "snapshot buffer full";

pub struct EmitterConfig {
    pub sink: Arc<dyn ReportingSink>,
    /// Snapshots kept while the sink is unavailable (min 1).
    pub buffer_size: usize,
    pub timeout: Duration,
    pub retry_strategy: RetryStrategy,
}

/// What a flush achieved.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EmitReport {
    pub published: Vec<u64>,
    pub dropped: Vec<SnapshotDroppedWarning>,
    /// Snapshots still buffered afterwards.
    pub pending: usize,
    pub last_error: Option<SinkError>,
    pub cancelled: bool,
}

enum PublishError {
    Cancelled,
    Sink(SinkError),
}

pub struct SnapshotEmitter {
    sink: Arc<dyn ReportingSink>,
    buffer: VecDeque<Snapshot>,
    capacity: usize,
    timeout: Duration,
    retry_strategy: RetryStrategy,
    last_error: Option<SinkError>,
}

impl SnapshotEmitter {
    #[must_use]
    pub fn new(config: EmitterConfig) -> Self {
        let capacity = config.buffer_size.max(1);
        Self {
            sink: config.sink,
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            timeout: config.timeout,
            retry_strategy: config.retry_strategy,
            last_error: None,
        }
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Buffers a snapshot, evicting the oldest one when full.
    pub fn enqueue(&mut self, snapshot: Snapshot) -> Option<SnapshotDroppedWarning> {
        let mut dropped = None;
        if self.buffer.len() >= self.capacity {
            if let Some(oldest) = self.buffer.pop_front() {
                let reason = match &self.last_error {
                    Some(e) => format!("{BUFFER_FULL_REASON} after sink error: {e}"),
                    None => BUFFER_FULL_REASON.to_string(),
                };
                dropped = Some(drop_warning(&oldest, reason));
            }
        }
        self.buffer.push_back(snapshot);
        dropped
    }

    /// Buffers `snapshot` and publishes as much of the buffer as the sink accepts.
    pub async fn emit(&mut self, snapshot: Snapshot, cancel: &CancellationToken) -> EmitReport {
        let dropped = self.enqueue(snapshot);
        let mut report = self.flush(cancel).await;
        if let Some(warning) = dropped {
            report.dropped.insert(0, warning);
        }
        report
    }

    /// Publishes buffered snapshots oldest first, stopping at the first transient failure.
    pub async fn flush(&mut self, cancel: &CancellationToken) -> EmitReport {
        let mut report = EmitReport::default();

        while let Some(front) = self.buffer.front() {
            let sequence = front.sequence();
            match self.publish_with_retry(front, cancel).await {
                Ok(Ack) => {
                    self.buffer.pop_front();
                    self.last_error = None;
                    debug!("Snapshot {} acknowledged by sink", sequence);
                    report.published.push(sequence);
                }
                Err(PublishError::Cancelled) => {
                    debug!("Emission of snapshot {} cancelled", sequence);
                    report.cancelled = true;
                    break;
                }
                Err(PublishError::Sink(e)) if !e.is_retryable() => {
                    if let Some(rejected) = self.buffer.pop_front() {
                        report.dropped.push(drop_warning(&rejected, e.to_string()));
                    }
                    report.last_error = Some(e);
                }
                Err(PublishError::Sink(e)) => {
                    error!(
                        "Failed to publish snapshot {} after {} attempts: {}",
                        sequence,
                        self.retry_strategy.attempts(),
                        e
                    );
                    self.last_error = Some(e.clone());
                    report.last_error = Some(e);
                    break;
                }
            }
        }

        report.pending = self.buffer.len();
        report
    }

    async fn publish_with_retry(
        &self,
        snapshot: &Snapshot,
        cancel: &CancellationToken,
    ) -> Result<Ack, PublishError> {
        let attempts = self.retry_strategy.attempts();
        let mut last_error = SinkError::Unavailable("no publish attempted".to_string());

        for attempt in 1..=attempts {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(PublishError::Cancelled),
                result = tokio::time::timeout(self.timeout, self.sink.publish(snapshot)) => result,
            };
            match result {
                Ok(Ok(ack)) => return Ok(ack),
                Ok(Err(e)) if !e.is_retryable() => return Err(PublishError::Sink(e)),
                Ok(Err(e)) => last_error = e,
                Err(_) => last_error = SinkError::Timeout(self.timeout),
            }
            debug!(
                "Publish attempt {}/{} for snapshot {} failed: {}",
                attempt,
                attempts,
                snapshot.sequence(),
                last_error
            );

            let delay = self.retry_strategy.delay_after(attempt);
            if attempt < attempts && !delay.is_zero() {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(PublishError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(PublishError::Sink(last_error))
    }
}

fn drop_warning(snapshot: &Snapshot, reason: String) -> SnapshotDroppedWarning {
    let warning = SnapshotDroppedWarning {
        sequence: snapshot.sequence(),
        taken_at: snapshot.taken_at(),
        reason,
    };
    warn!("{}", warning);
    warning
}
