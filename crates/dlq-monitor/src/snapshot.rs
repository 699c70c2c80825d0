// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::counter_store::Bucket;
use crate::dead_letter::DeadLetterRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketValue {
    pub bucket: Bucket,
    pub value: u64,
}

/// Point-in-time copy of every counter and dead-letter record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    sequence: u64,
    taken_at: i64,
    counters: BTreeMap<String, Vec<BucketValue>>,
    dead_letter_records: Vec<DeadLetterRecord>,
}

impl Snapshot {
    pub fn new(
        sequence: u64,
        taken_at: i64,
        counters: BTreeMap<String, Vec<(Bucket, u64)>>,
        dead_letter_records: Vec<DeadLetterRecord>,
    ) -> Self {
        let counters = counters
            .into_iter()
            .map(|(name, buckets)| {
                let buckets = buckets
                    .into_iter()
                    .map(|(bucket, value)| BucketValue { bucket, value })
                    .collect();
                (name, buckets)
            })
            .collect();
        Self {
            sequence,
            taken_at,
            counters,
            dead_letter_records,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn taken_at(&self) -> i64 {
        self.taken_at
    }

    pub fn counters(&self) -> &BTreeMap<String, Vec<BucketValue>> {
        &self.counters
    }

    pub fn dead_letter_records(&self) -> &[DeadLetterRecord] {
        &self.dead_letter_records
    }

    /// Sum of a counter over all buckets; 0 for unknown counters.
    pub fn total(&self, name: &str) -> u64 {
        self.counters.get(name).map_or(0, |buckets| {
            buckets
                .iter()
                .fold(0u64, |sum, b| sum.saturating_add(b.value))
        })
    }
}
