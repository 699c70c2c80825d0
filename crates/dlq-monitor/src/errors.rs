// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::event::EventKind;
use std::time::Duration;

/// Raw input that could not be normalized into an [`crate::event::Event`].
///
/// Malformed events are dropped with a warning; ingestion continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedEventError {
    #[error("Failed to decode raw event: {0}")]
    Decode(String),
    #[error("Unsupported {origin} event: {name}")]
    UnsupportedEvent { origin: &'static str, name: String },
    #[error("{kind} event is missing required field `{field}`")]
    MissingField {
        kind: EventKind,
        field: &'static str,
    },
    #[error("{kind} event has invalid field `{field}`: {reason}")]
    InvalidField {
        kind: EventKind,
        field: &'static str,
        reason: String,
    },
}

/// Terminal states a message can reach in the dead-letter tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum TerminalState {
    #[display("delivered")]
    Delivered,
    #[display("dead-lettered")]
    DeadLettered,
}

/// An outcome report that violates the per-message state machine.
///
/// Surfaced to the caller; never crashes the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidTransitionError {
    #[error("Message id must not be empty")]
    EmptyMessageId,
    #[error("Failure report for message {0} has no error reason")]
    MissingReason(String),
    #[error("Message {0} has not been received")]
    NotReceived(String),
    #[error("Message {message_id} is already {state}")]
    AlreadyTerminal {
        message_id: String,
        state: TerminalState,
    },
    #[error("Too many parked outcomes, rejecting {kind} for message {message_id}")]
    PendingOverflow { message_id: String, kind: EventKind },
}

/// Failure to hand a snapshot to the reporting sink.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("Sink unavailable: {0}")]
    Unavailable(String),
    #[error("Sink did not answer within {0:?}")]
    Timeout(Duration),
    #[error("Sink rejected snapshot with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("Failed to encode snapshot: {0}")]
    Encode(String),
}

impl SinkError {
    /// Transient errors are retried; the others drop the snapshot.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// A buffered snapshot that was discarded before the sink acknowledged it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Snapshot {sequence} taken at {taken_at} was dropped: {reason}")]
pub struct SnapshotDroppedWarning {
    pub sequence: u64,
    pub taken_at: i64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = MalformedEventError::MissingField {
            kind: EventKind::MessageReceived,
            field: "message_id",
        };
        assert_eq!(
            error.to_string(),
            "MessageReceived event is missing required field `message_id`"
        );

        let error = InvalidTransitionError::AlreadyTerminal {
            message_id: "m-1".to_string(),
            state: TerminalState::DeadLettered,
        };
        assert_eq!(error.to_string(), "Message m-1 is already dead-lettered");
    }

    #[test]
    fn test_sink_error_retryable() {
        assert!(SinkError::Unavailable("503".to_string()).is_retryable());
        assert!(SinkError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!SinkError::Rejected {
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!SinkError::Encode("bad".to_string()).is_retryable());
    }
}
