// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bucketed counters.
//!
//! Every `(name, bucket)` pair owns its own atomic cell inside a sharded map, so
//! concurrent increments only contend when they hit the same shard while a bucket is
//! being created. Reads see whole increments only.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeBounds;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use ustr::{ustr, Ustr};

use crate::errors::ConfigError;

pub const LOGS_CREATED: &str = "logs_created";
pub const LOG_BYTES_CREATED: &str = "log_bytes_created";
pub const MESSAGES_RECEIVED: &str = "messages_received";
pub const MESSAGES_DELIVERED: &str = "messages_delivered";
pub const DELIVERY_FAILURES: &str = "delivery_failures";
pub const MESSAGES_DEAD_LETTERED: &str = "messages_dead_lettered";

/// Start of a time window, in Unix seconds.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::Into,
)]
#[serde(transparent)]
pub struct Bucket(i64);

impl Bucket {
    #[must_use]
    pub const fn new(start: i64) -> Self {
        Self(start)
    }

    /// The bucket of `granularity` containing `timestamp`.
    #[must_use]
    pub fn for_timestamp(timestamp: i64, granularity: BucketGranularity) -> Self {
        let width = granularity.as_secs();
        Self(timestamp.div_euclid(width) * width)
    }

    #[must_use]
    pub fn start(self) -> i64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketGranularity {
    #[default]
    Minute,
    Hour,
    Day,
}

impl BucketGranularity {
    #[must_use]
    pub const fn as_secs(self) -> i64 {
        match self {
            Self::Minute => 60,
            Self::Hour => 3_600,
            Self::Day => 86_400,
        }
    }
}

impl FromStr for BucketGranularity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "minute" => Ok(Self::Minute),
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            other => Err(ConfigError::InvalidConfig(format!(
                "Invalid bucket granularity '{other}'. Must be one of: minute, hour, day"
            ))),
        }
    }
}

#[derive(Debug, Default)]
pub struct CounterStore {
    cells: DashMap<(Ustr, Bucket), AtomicU64>,
    // Increments share it; multi-cell reads take it exclusively.
    gate: RwLock<()>,
}

impl CounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, name: &str, bucket: Bucket) {
        self.increment_by(name, bucket, 1);
    }

    /// Adds `amount` to the cell of `(name, bucket)`, creating it on first use.
    /// Cells stop at `u64::MAX` instead of wrapping.
    pub fn increment_by(&self, name: &str, bucket: Bucket, amount: u64) {
        let _shared = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        let key = (ustr(name), bucket);
        if let Some(cell) = self.cells.get(&key) {
            saturating_add(&cell, amount);
            return;
        }
        let cell = self.cells.entry(key).or_insert_with(|| AtomicU64::new(0));
        saturating_add(&cell, amount);
    }

    /// Buckets of `name` within `range`, ordered by bucket.
    pub fn snapshot(&self, name: &str, range: impl RangeBounds<Bucket>) -> Vec<(Bucket, u64)> {
        let _exclusive = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        let name = ustr(name);
        let mut buckets: Vec<(Bucket, u64)> = self
            .cells
            .iter()
            .filter(|cell| cell.key().0 == name && range.contains(&cell.key().1))
            .map(|cell| (cell.key().1, cell.value().load(Ordering::Acquire)))
            .collect();
        buckets.sort_unstable_by_key(|(bucket, _)| *bucket);
        buckets
    }

    /// Every counter, ordered by name and then bucket.
    pub fn snapshot_all(&self) -> BTreeMap<String, Vec<(Bucket, u64)>> {
        let _exclusive = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        let mut counters: BTreeMap<String, Vec<(Bucket, u64)>> = BTreeMap::new();
        for cell in &self.cells {
            let (name, bucket) = *cell.key();
            counters
                .entry(name.as_str().to_string())
                .or_default()
                .push((bucket, cell.value().load(Ordering::Acquire)));
        }
        for buckets in counters.values_mut() {
            buckets.sort_unstable_by_key(|(bucket, _)| *bucket);
        }
        counters
    }

    /// Sum of `name` over all buckets.
    pub fn total(&self, name: &str) -> u64 {
        self.snapshot(name, ..)
            .iter()
            .fold(0u64, |sum, (_, value)| sum.saturating_add(*value))
    }
}

fn saturating_add(cell: &AtomicU64, amount: u64) {
    // The closure never returns None, so the update cannot fail.
    let _ = cell.fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| {
        Some(value.saturating_add(amount))
    });
}
