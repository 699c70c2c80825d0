// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared state the ingestion workers fold events into.
//!
//! Applying an event touches the tracker entry of its message and a handful of counter
//! cells. Workers hold the shared side of `gate` while doing so; [`Aggregator::snapshot`]
//! takes the exclusive side just long enough to copy, so a snapshot never sees a
//! transition without its counter increments.

use std::sync::{PoisonError, RwLock};

use crate::counter_store::{
    Bucket, BucketGranularity, CounterStore, DELIVERY_FAILURES, LOGS_CREATED, LOG_BYTES_CREATED,
    MESSAGES_DEAD_LETTERED, MESSAGES_DELIVERED, MESSAGES_RECEIVED,
};
use crate::dead_letter::{DeadLetterTracker, Outcome, Transition};
use crate::errors::InvalidTransitionError;
use crate::event::{Event, EventKind};
use crate::snapshot::Snapshot;
use crate::util::unix_now;

/// What applying one event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    LogCounted,
    Message(Transition),
}

#[derive(Debug)]
pub struct Aggregator {
    counters: CounterStore,
    tracker: DeadLetterTracker,
    granularity: BucketGranularity,
    gate: RwLock<()>,
}

impl Aggregator {
    #[must_use]
    pub fn new(max_retries: u32, granularity: BucketGranularity) -> Self {
        Self {
            counters: CounterStore::new(),
            tracker: DeadLetterTracker::new(max_retries),
            granularity,
            gate: RwLock::new(()),
        }
    }

    pub fn counters(&self) -> &CounterStore {
        &self.counters
    }

    pub fn tracker(&self) -> &DeadLetterTracker {
        &self.tracker
    }

    /// Routes an event to the tracker and the counters.
    ///
    /// Outcomes for messages that were never received fail with
    /// [`InvalidTransitionError::NotReceived`] and leave no trace.
    pub fn apply(&self, event: &Event) -> Result<Applied, InvalidTransitionError> {
        let _shared = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        let bucket = Bucket::for_timestamp(event.timestamp(), self.granularity);
        let id = event.resource_id();
        let at = event.timestamp();

        let transition = match event.kind() {
            EventKind::LogCreated => {
                self.counters.increment(LOGS_CREATED, bucket);
                if let Some(size) = event.size() {
                    self.counters.increment_by(LOG_BYTES_CREATED, bucket, size);
                }
                return Ok(Applied::LogCounted);
            }
            EventKind::MessageReceived => self.tracker.receive(id, at)?,
            EventKind::MessageDelivered => self.tracker.record_attempt(id, Outcome::Success, at)?,
            EventKind::DeliveryFailed => {
                let reason = event.error_reason().unwrap_or_default();
                self.tracker.record_attempt(id, Outcome::failure(reason), at)?
            }
            EventKind::MessageDeadLettered => {
                self.tracker.dead_letter(id, event.error_reason(), at)?
            }
        };

        match (&transition, event.kind()) {
            (Transition::Received, _) => self.counters.increment(MESSAGES_RECEIVED, bucket),
            (Transition::Delivered, _) => self.counters.increment(MESSAGES_DELIVERED, bucket),
            (Transition::Retrying { .. }, _) => self.counters.increment(DELIVERY_FAILURES, bucket),
            (Transition::DeadLettered(_), EventKind::DeliveryFailed) => {
                self.counters.increment(DELIVERY_FAILURES, bucket);
                self.counters.increment(MESSAGES_DEAD_LETTERED, bucket);
            }
            (Transition::DeadLettered(_), _) => {
                self.counters.increment(MESSAGES_DEAD_LETTERED, bucket)
            }
            (Transition::Duplicate, _) => {}
        }
        Ok(Applied::Message(transition))
    }

    /// Copies every counter and dead-letter record at one point in time.
    ///
    /// Only the counters and the number of finalized records are read under the
    /// exclusive gate; the records themselves are copied and ordered after it is released.
    pub fn snapshot(&self, sequence: u64) -> Snapshot {
        let (counters, finalized) = {
            let _exclusive = self.gate.write().unwrap_or_else(PoisonError::into_inner);
            (self.counters.snapshot_all(), self.tracker.finalized_len())
        };
        let records = self.tracker.dead_letter_records_prefix(finalized);
        Snapshot::new(sequence, unix_now(), counters, records)
    }
}
