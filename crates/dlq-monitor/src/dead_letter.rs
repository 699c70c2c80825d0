// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-message delivery state machine.
//!
//! ```text
//!                 success
//!   InFlight ────────────────────────────────> Delivered
//!      │ failure                                   ^
//!      v                       success             │
//!   Retrying(1) ─> Retrying(2) ─> ... ─────────────┘
//!      │                 │
//!      └─────────────────┴── attempts >= max_retries ──> DeadLettered
//! ```
//!
//! Each message id is guarded by its own map entry, so transitions of different
//! messages never wait on each other. Dead-lettered records are kept for audit and
//! never evicted; each one is also appended to an ordered store so they can be listed
//! without walking every tracked message.

use std::sync::{PoisonError, RwLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{InvalidTransitionError, TerminalState};
use crate::util::unix_now;

const BROKER_DEAD_LETTER_REASON: &str = "moved to dead-letter queue by broker";

/// Finalized audit record of a message that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub message_id: String,
    pub attempts: u32,
    pub last_error_reason: String,
    pub first_seen_at: i64,
    pub dead_lettered_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure { reason: String },
}

impl Outcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageState {
    InFlight {
        first_seen_at: i64,
    },
    Retrying {
        attempts: u32,
        last_error_reason: String,
        first_seen_at: i64,
    },
    /// Tracking state is discarded; only the terminal marker remains.
    /// `observed_at` is the local wall clock when the confirmation was applied.
    Delivered {
        at: i64,
        observed_at: i64,
    },
    DeadLettered(DeadLetterRecord),
}

impl MessageState {
    #[must_use]
    pub fn terminal(&self) -> Option<TerminalState> {
        match self {
            Self::Delivered { .. } => Some(TerminalState::Delivered),
            Self::DeadLettered(_) => Some(TerminalState::DeadLettered),
            Self::InFlight { .. } | Self::Retrying { .. } => None,
        }
    }

    /// Failed attempts recorded so far. Delivered messages report 0.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::InFlight { .. } | Self::Delivered { .. } => 0,
            Self::Retrying { attempts, .. } => *attempts,
            Self::DeadLettered(record) => record.attempts,
        }
    }

    fn progress(&self) -> Option<Progress> {
        match self {
            Self::InFlight { first_seen_at } => Some(Progress {
                attempts: 0,
                first_seen_at: *first_seen_at,
                last_error_reason: None,
            }),
            Self::Retrying {
                attempts,
                last_error_reason,
                first_seen_at,
            } => Some(Progress {
                attempts: *attempts,
                first_seen_at: *first_seen_at,
                last_error_reason: Some(last_error_reason.clone()),
            }),
            Self::Delivered { .. } | Self::DeadLettered(_) => None,
        }
    }
}

struct Progress {
    attempts: u32,
    first_seen_at: i64,
    last_error_reason: Option<String>,
}

/// Result of applying a report to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Received,
    Retrying { attempts: u32 },
    Delivered,
    DeadLettered(DeadLetterRecord),
    /// Redelivery or a report for an already terminal message; nothing changed.
    Duplicate,
}

#[derive(Debug)]
pub struct DeadLetterTracker {
    max_retries: u32,
    messages: DashMap<String, MessageState>,
    /// Append-only, in finalization order.
    finalized: RwLock<Vec<DeadLetterRecord>>,
}

impl DeadLetterTracker {
    /// `max_retries` is the number of failed attempts that dead-letters a message (min 1).
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.max(1),
            messages: DashMap::new(),
            finalized: RwLock::new(Vec::new()),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Opens tracking for a received message.
    pub fn receive(&self, message_id: &str, at: i64) -> Result<Transition, InvalidTransitionError> {
        validate_id(message_id)?;
        match self.messages.entry(message_id.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(MessageState::InFlight { first_seen_at: at });
                Ok(Transition::Received)
            }
            Entry::Occupied(entry) => match entry.get().terminal() {
                Some(state) => Err(InvalidTransitionError::AlreadyTerminal {
                    message_id: message_id.to_string(),
                    state,
                }),
                None => {
                    debug!("Message {} redelivered while in flight", message_id);
                    Ok(Transition::Duplicate)
                }
            },
        }
    }

    /// Applies a delivery outcome to a received message.
    pub fn record_attempt(
        &self,
        message_id: &str,
        outcome: Outcome,
        at: i64,
    ) -> Result<Transition, InvalidTransitionError> {
        self.record_attempt_observed(message_id, outcome, at, unix_now())
    }

    fn record_attempt_observed(
        &self,
        message_id: &str,
        outcome: Outcome,
        at: i64,
        observed_at: i64,
    ) -> Result<Transition, InvalidTransitionError> {
        validate_id(message_id)?;
        if let Outcome::Failure { reason } = &outcome {
            if reason.trim().is_empty() {
                return Err(InvalidTransitionError::MissingReason(message_id.to_string()));
            }
        }

        let mut state = self
            .messages
            .get_mut(message_id)
            .ok_or_else(|| InvalidTransitionError::NotReceived(message_id.to_string()))?;
        let Some(progress) = state.progress() else {
            warn!(
                "Ignoring duplicate {} report for {} message {}",
                outcome_label(&outcome),
                state.terminal().map_or("terminal".to_string(), |s| s.to_string()),
                message_id
            );
            return Ok(Transition::Duplicate);
        };

        match outcome {
            Outcome::Success => {
                *state = MessageState::Delivered { at, observed_at };
                debug!(
                    "Message {} delivered after {} failed attempts",
                    message_id, progress.attempts
                );
                Ok(Transition::Delivered)
            }
            Outcome::Failure { reason } => {
                let attempts = progress.attempts.saturating_add(1);
                if attempts >= self.max_retries {
                    let record = DeadLetterRecord {
                        message_id: message_id.to_string(),
                        attempts,
                        last_error_reason: reason,
                        first_seen_at: progress.first_seen_at,
                        dead_lettered_at: at,
                    };
                    info!(
                        "Message {} dead-lettered after {} attempts: {}",
                        message_id, attempts, record.last_error_reason
                    );
                    *state = MessageState::DeadLettered(record.clone());
                    self.finalize(record.clone());
                    Ok(Transition::DeadLettered(record))
                } else {
                    debug!(
                        "Message {} failed attempt {}/{}: {}",
                        message_id, attempts, self.max_retries, reason
                    );
                    *state = MessageState::Retrying {
                        attempts,
                        last_error_reason: reason,
                        first_seen_at: progress.first_seen_at,
                    };
                    Ok(Transition::Retrying { attempts })
                }
            }
        }
    }

    /// Finalizes a message the broker moved to its dead-letter queue on its own.
    pub fn dead_letter(
        &self,
        message_id: &str,
        reason: Option<&str>,
        at: i64,
    ) -> Result<Transition, InvalidTransitionError> {
        validate_id(message_id)?;
        let mut state = self
            .messages
            .get_mut(message_id)
            .ok_or_else(|| InvalidTransitionError::NotReceived(message_id.to_string()))?;
        let Some(progress) = state.progress() else {
            warn!(
                "Ignoring duplicate dead-letter report for terminal message {}",
                message_id
            );
            return Ok(Transition::Duplicate);
        };

        let last_error_reason = reason
            .map(str::to_string)
            .or(progress.last_error_reason)
            .unwrap_or_else(|| BROKER_DEAD_LETTER_REASON.to_string());
        let record = DeadLetterRecord {
            message_id: message_id.to_string(),
            attempts: progress.attempts.max(1),
            last_error_reason,
            first_seen_at: progress.first_seen_at,
            dead_lettered_at: at,
        };
        info!(
            "Message {} dead-lettered by broker after {} attempts",
            message_id, record.attempts
        );
        *state = MessageState::DeadLettered(record.clone());
        self.finalize(record.clone());
        Ok(Transition::DeadLettered(record))
    }

    // Called with the message entry still locked, so a record is listed as soon as
    // its message reads as dead-lettered.
    fn finalize(&self, record: DeadLetterRecord) {
        self.finalized
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    pub fn get(&self, message_id: &str) -> Option<MessageState> {
        self.messages.get(message_id).map(|state| state.clone())
    }

    /// Every finalized record, oldest first.
    pub fn dead_letter_records(&self) -> Vec<DeadLetterRecord> {
        self.dead_letter_records_prefix(usize::MAX)
    }

    /// Number of records finalized so far.
    pub fn finalized_len(&self) -> usize {
        self.finalized
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// The first `len` finalized records, oldest first. Records finalized later are
    /// never part of the prefix, so a length taken earlier still describes the same set.
    pub fn dead_letter_records_prefix(&self, len: usize) -> Vec<DeadLetterRecord> {
        let mut records: Vec<DeadLetterRecord> = self
            .finalized
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .take(len)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            (a.dead_lettered_at, &a.message_id).cmp(&(b.dead_lettered_at, &b.message_id))
        });
        records
    }

    /// Messages received but not yet terminal.
    pub fn in_flight(&self) -> usize {
        self.messages
            .iter()
            .filter(|state| state.terminal().is_none())
            .count()
    }

    /// Forgets delivered markers observed before `before`, in local Unix seconds.
    /// Returns how many were removed.
    pub fn evict_delivered(&self, before: i64) -> usize {
        let mut evicted = 0;
        self.messages.retain(|_, state| match state {
            MessageState::Delivered { observed_at, .. } if *observed_at < before => {
                evicted += 1;
                false
            }
            _ => true,
        });
        evicted
    }
}

fn validate_id(message_id: &str) -> Result<(), InvalidTransitionError> {
    if message_id.trim().is_empty() {
        return Err(InvalidTransitionError::EmptyMessageId);
    }
    Ok(())
}

fn outcome_label(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Success => "delivery",
        Outcome::Failure { .. } => "failure",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tracing_test::traced_test;

    #[test]
    fn test_received_then_delivered() {
        let tracker = DeadLetterTracker::new(3);
        assert_eq!(tracker.receive("m-1", 10), Ok(Transition::Received));
        assert_eq!(
            tracker.record_attempt("m-1", Outcome::Success, 11),
            Ok(Transition::Delivered)
        );
        assert!(matches!(
            tracker.get("m-1"),
            Some(MessageState::Delivered { at: 11, observed_at }) if observed_at >= unix_now() - 5
        ));
        assert!(tracker.dead_letter_records().is_empty());
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn test_three_failures_dead_letter() {
        let tracker = DeadLetterTracker::new(3);
        tracker.receive("m-1", 100).unwrap();

        assert_eq!(
            tracker.record_attempt("m-1", Outcome::failure("timeout"), 101),
            Ok(Transition::Retrying { attempts: 1 })
        );
        assert_eq!(
            tracker.record_attempt("m-1", Outcome::failure("timeout"), 102),
            Ok(Transition::Retrying { attempts: 2 })
        );
        let expected = DeadLetterRecord {
            message_id: "m-1".to_string(),
            attempts: 3,
            last_error_reason: "connection refused".to_string(),
            first_seen_at: 100,
            dead_lettered_at: 103,
        };
        assert_eq!(
            tracker.record_attempt("m-1", Outcome::failure("connection refused"), 103),
            Ok(Transition::DeadLettered(expected.clone()))
        );
        assert_eq!(tracker.dead_letter_records(), vec![expected]);
    }

    #[test]
    fn test_success_after_retries() {
        let tracker = DeadLetterTracker::new(3);
        tracker.receive("m-1", 0).unwrap();
        tracker
            .record_attempt("m-1", Outcome::failure("timeout"), 1)
            .unwrap();
        assert_eq!(tracker.get("m-1").map(|s| s.attempts()), Some(1));
        assert_eq!(
            tracker.record_attempt("m-1", Outcome::Success, 2),
            Ok(Transition::Delivered)
        );
        assert!(tracker.dead_letter_records().is_empty());
    }

    #[test]
    #[traced_test]
    fn test_duplicate_confirmation_is_noop() {
        let tracker = DeadLetterTracker::new(3);
        tracker.receive("m-1", 0).unwrap();
        tracker.record_attempt("m-1", Outcome::Success, 1).unwrap();

        assert_eq!(
            tracker.record_attempt("m-1", Outcome::Success, 2),
            Ok(Transition::Duplicate)
        );
        assert!(logs_contain("Ignoring duplicate delivery report"));
        assert!(matches!(
            tracker.get("m-1"),
            Some(MessageState::Delivered { at: 1, .. })
        ));
    }

    #[test]
    fn test_dead_lettered_record_survives_later_reports() {
        let tracker = DeadLetterTracker::new(1);
        tracker.receive("m-1", 0).unwrap();
        tracker
            .record_attempt("m-1", Outcome::failure("poison"), 1)
            .unwrap();

        assert_eq!(
            tracker.record_attempt("m-1", Outcome::Success, 2),
            Ok(Transition::Duplicate)
        );
        assert_eq!(
            tracker.dead_letter("m-1", Some("again"), 3),
            Ok(Transition::Duplicate)
        );
        assert_eq!(tracker.evict_delivered(i64::MAX), 0);

        let records = tracker.dead_letter_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attempts, 1);
        assert_eq!(records[0].last_error_reason, "poison");
    }

    #[test]
    fn test_redelivery_while_in_flight_is_duplicate() {
        let tracker = DeadLetterTracker::new(3);
        tracker.receive("m-1", 0).unwrap();
        assert_eq!(tracker.receive("m-1", 5), Ok(Transition::Duplicate));
        assert_eq!(tracker.in_flight(), 1);
    }

    #[test]
    fn test_receipt_after_terminal_is_rejected() {
        let tracker = DeadLetterTracker::new(3);
        tracker.receive("m-1", 0).unwrap();
        tracker.record_attempt("m-1", Outcome::Success, 1).unwrap();
        assert_eq!(
            tracker.receive("m-1", 2),
            Err(InvalidTransitionError::AlreadyTerminal {
                message_id: "m-1".to_string(),
                state: TerminalState::Delivered,
            })
        );
    }

    #[test]
    fn test_malformed_reports_are_rejected() {
        let tracker = DeadLetterTracker::new(3);
        assert_eq!(
            tracker.receive(" ", 0),
            Err(InvalidTransitionError::EmptyMessageId)
        );
        assert_eq!(
            tracker.record_attempt("m-1", Outcome::Success, 0),
            Err(InvalidTransitionError::NotReceived("m-1".to_string()))
        );

        tracker.receive("m-1", 0).unwrap();
        assert_eq!(
            tracker.record_attempt("m-1", Outcome::failure(""), 1),
            Err(InvalidTransitionError::MissingReason("m-1".to_string()))
        );
        assert_eq!(tracker.get("m-1"), Some(MessageState::InFlight { first_seen_at: 0 }));
    }

    #[test]
    fn test_broker_dead_letter() {
        let tracker = DeadLetterTracker::new(5);
        tracker.receive("fresh", 0).unwrap();
        tracker.receive("retried", 0).unwrap();
        tracker
            .record_attempt("retried", Outcome::failure("timeout"), 1)
            .unwrap();
        tracker
            .record_attempt("retried", Outcome::failure("throttled"), 2)
            .unwrap();

        let Ok(Transition::DeadLettered(fresh)) = tracker.dead_letter("fresh", None, 3) else {
            panic!("expected a dead-letter record");
        };
        assert_eq!(fresh.attempts, 1);
        assert_eq!(fresh.last_error_reason, BROKER_DEAD_LETTER_REASON);

        let Ok(Transition::DeadLettered(retried)) = tracker.dead_letter("retried", None, 4) else {
            panic!("expected a dead-letter record");
        };
        assert_eq!(retried.attempts, 2);
        assert_eq!(retried.last_error_reason, "throttled");

        assert_eq!(
            tracker.dead_letter("unknown", Some("x"), 5),
            Err(InvalidTransitionError::NotReceived("unknown".to_string()))
        );
    }

    #[test]
    fn test_evict_delivered() {
        let tracker = DeadLetterTracker::new(3);
        // Event times run the other way round to the local observation times.
        for (id, at, observed_at) in [("old", 100, 10), ("new", 10, 100)] {
            tracker.receive(id, 0).unwrap();
            tracker
                .record_attempt_observed(id, Outcome::Success, at, observed_at)
                .unwrap();
        }
        tracker.receive("pending", 0).unwrap();

        assert_eq!(tracker.evict_delivered(50), 1);
        assert_eq!(tracker.get("old"), None);
        assert!(tracker.get("new").is_some());
        assert!(tracker.get("pending").is_some());
    }

    #[test]
    fn test_evict_delivered_ignores_event_clock() {
        let tracker = DeadLetterTracker::new(3);
        let now = unix_now();
        tracker.receive("m-1", 1).unwrap();
        tracker.record_attempt("m-1", Outcome::Success, 2).unwrap();

        // The event timestamps are decades old but the confirmation was just observed.
        assert_eq!(tracker.evict_delivered(now - 60), 0);
        assert_eq!(
            tracker.receive("m-1", 3),
            Err(InvalidTransitionError::AlreadyTerminal {
                message_id: "m-1".to_string(),
                state: TerminalState::Delivered,
            })
        );
        assert_eq!(tracker.evict_delivered(now + 60), 1);
    }

    #[test]
    fn test_records_prefix_excludes_later_finalizations() {
        let tracker = DeadLetterTracker::new(1);
        for (id, at) in [("b", 20), ("a", 10)] {
            tracker.receive(id, 0).unwrap();
            tracker
                .record_attempt(id, Outcome::failure("poison"), at)
                .unwrap();
        }
        let len = tracker.finalized_len();
        tracker.receive("c", 0).unwrap();
        tracker.dead_letter("c", None, 5).unwrap();

        let ids = |records: Vec<DeadLetterRecord>| {
            records
                .into_iter()
                .map(|r| r.message_id)
                .collect::<Vec<_>>()
        };
        assert_eq!(len, 2);
        assert_eq!(ids(tracker.dead_letter_records_prefix(len)), vec!["a", "b"]);
        assert_eq!(ids(tracker.dead_letter_records()), vec!["c", "a", "b"]);
    }

    proptest! {
        #[test]
        fn prop_attempts_never_decrease_until_terminal(
            max_retries in 1u32..6,
            outcomes in proptest::collection::vec(any::<bool>(), 1..20)
        ) {
            let tracker = DeadLetterTracker::new(max_retries);
            tracker.receive("m", 0).unwrap();
            let mut last_attempts = 0;
            for (i, success) in outcomes.into_iter().enumerate() {
                let outcome = if success { Outcome::Success } else { Outcome::failure("err") };
                let transition = tracker.record_attempt("m", outcome, i as i64).unwrap();
                let state = tracker.get("m").unwrap();
                if let Some(terminal) = state.terminal() {
                    if terminal == TerminalState::DeadLettered {
                        prop_assert_eq!(state.attempts(), max_retries);
                    }
                    break;
                }
                prop_assert!(state.attempts() >= last_attempts);
                prop_assert!(matches!(transition, Transition::Retrying { .. }), "expected Retrying transition");
                last_attempts = state.attempts();
            }
        }
    }
}
