// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded channel on which the pipeline reports what it dropped or rejected.
//!
//! ```text
//!   workers ───── TransitionRejected ──┐
//!   dispatcher ── EventRejected ───────┼──> MPSC ──> rx (one observer)
//!   emitter ───── SnapshotDropped ─────┘
//! ```
//!
//! The pipeline never waits on the observer: when the channel is full, notifications
//! are discarded (they are logged regardless).

use tokio::sync::mpsc::{self, error::TrySendError, Sender};
use tracing::debug;

use crate::constants::MAX_NOTIFICATIONS;
use crate::errors::{InvalidTransitionError, MalformedEventError, SnapshotDroppedWarning};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    EventRejected(MalformedEventError),
    TransitionRejected(InvalidTransitionError),
    SnapshotPublished { sequence: u64 },
    SnapshotDropped(SnapshotDroppedWarning),
    /// The pipeline stopped; no further notifications follow.
    Tombstone,
}

pub struct NotificationBus {
    pub rx: mpsc::Receiver<Notification>,
}

impl NotificationBus {
    #[must_use]
    pub fn run() -> (NotificationBus, Sender<Notification>) {
        let (tx, rx) = mpsc::channel(MAX_NOTIFICATIONS);
        (NotificationBus { rx }, tx)
    }
}

/// Sends without waiting. Returns false if the notification was discarded.
pub(crate) fn notify(tx: Option<&Sender<Notification>>, notification: Notification) -> bool {
    let Some(tx) = tx else {
        return false;
    };
    match tx.try_send(notification) {
        Ok(()) => true,
        Err(TrySendError::Full(notification)) => {
            debug!("Notification channel full, discarding {:?}", notification);
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}
