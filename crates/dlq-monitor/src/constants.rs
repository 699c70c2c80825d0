// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Failed delivery attempts before a message is dead-lettered.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_SNAPSHOT_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_SNAPSHOT_BUFFER_SIZE: usize = 8;
pub const DEFAULT_WORKERS: usize = 4;
/// Upper bound on outcomes a single worker holds while waiting for their receipt.
pub const DEFAULT_MAX_PENDING_OUTCOMES: usize = 10_000;
pub const DEFAULT_DELIVERED_RETENTION_SECS: u64 = 3_600;
/// How long an outcome waits for its receipt before it is dropped.
pub const DEFAULT_PARKED_OUTCOME_TTL_SECS: u64 = 300;
pub const DEFAULT_SINK_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_SINK_RETRIES: u64 = 3;
pub const DEFAULT_SINK_BACKOFF_MS: u64 = 100;
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8126;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Capacity of each worker's event queue. A full queue applies backpressure to the source.
pub const WORKER_QUEUE_CAPACITY: usize = 1_024;
/// Lanes look for expired parked outcomes every TTL/2, but not more often than this.
pub const MIN_PARKED_SWEEP_INTERVAL_MS: u64 = 1_000;
/// Capacity of the notification channel.
pub const MAX_NOTIFICATIONS: usize = 100;
