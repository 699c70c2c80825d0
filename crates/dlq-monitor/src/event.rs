// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Normalization of upstream notifications.
//!
//! Upstream producers hand over [`RawEvent`]s: an undecoded JSON record plus the time it
//! arrived. [`ingest`] decodes the record into an [`UpstreamNotification`], validates the
//! fields required by its kind and produces a single internal [`Event`] type.
//!
//! ```text
//! {"source":"object_storage","event_name":"ObjectCreated:Put","bucket":"logs","key":"a.log"}
//! {"source":"queue","event_type":"delivery_failed","message_id":"m-1","error_reason":"timeout"}
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::MalformedEventError;
use crate::util::{non_blank, unix_now};

const OBJECT_CREATED_PREFIX: &str = "ObjectCreated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
pub enum EventKind {
    LogCreated,
    MessageReceived,
    MessageDelivered,
    /// One failed delivery attempt.
    DeliveryFailed,
    /// The broker moved the message to its dead-letter queue.
    MessageDeadLettered,
}

impl EventKind {
    /// Queue events carry a message id in `resource_id` and drive the dead-letter tracker.
    #[must_use]
    pub fn is_message_event(self) -> bool {
        !matches!(self, Self::LogCreated)
    }
}

/// A normalized event. Fields are fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    kind: EventKind,
    resource_id: String,
    timestamp: i64,
    size: Option<u64>,
    error_reason: Option<String>,
}

impl Event {
    pub fn new(kind: EventKind, resource_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            kind,
            resource_id: resource_id.into(),
            timestamp,
            size: None,
            error_reason: None,
        }
    }

    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn with_error_reason(mut self, reason: impl Into<String>) -> Self {
        self.error_reason = Some(reason.into());
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// `<bucket>/<key>` for created objects, the message id for queue events.
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn error_reason(&self) -> Option<&str> {
        self.error_reason.as_deref()
    }
}

/// An undecoded record as received from an upstream producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    payload: String,
    received_at: i64,
}

impl RawEvent {
    /// Wraps a payload, stamping it with the current time.
    pub fn new(payload: impl Into<String>) -> Self {
        Self::received_at(payload, unix_now())
    }

    pub fn received_at(payload: impl Into<String>, received_at: i64) -> Self {
        Self {
            payload: payload.into(),
            received_at,
        }
    }

    /// Encodes a notification the way upstream producers send it.
    pub fn from_notification(notification: &UpstreamNotification) -> Result<Self, MalformedEventError> {
        let payload = serde_json::to_string(notification)
            .map_err(|e| MalformedEventError::Decode(e.to_string()))?;
        Ok(Self::new(payload))
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn arrival(&self) -> i64 {
        self.received_at
    }
}

/// Notification shapes accepted from upstream, tagged by `source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum UpstreamNotification {
    ObjectStorage(ObjectNotification),
    Queue(QueueNotification),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectNotification {
    pub event_name: Option<String>,
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub size: Option<u64>,
    pub event_time: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEventType {
    Received,
    Delivered,
    DeliveryFailed,
    DeadLettered,
}

impl From<QueueEventType> for EventKind {
    fn from(event_type: QueueEventType) -> Self {
        match event_type {
            QueueEventType::Received => EventKind::MessageReceived,
            QueueEventType::Delivered => EventKind::MessageDelivered,
            QueueEventType::DeliveryFailed => EventKind::DeliveryFailed,
            QueueEventType::DeadLettered => EventKind::MessageDeadLettered,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueNotification {
    pub event_type: QueueEventType,
    pub queue: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<i64>,
    pub error_reason: Option<String>,
}

/// Decodes and validates a raw record.
pub fn ingest(raw: &RawEvent) -> Result<Event, MalformedEventError> {
    let notification: UpstreamNotification = serde_json::from_str(raw.payload())
        .map_err(|e| MalformedEventError::Decode(e.to_string()))?;
    normalize(notification, raw.arrival())
}

/// Validates a decoded notification. Missing timestamps are stamped with `arrival`.
pub fn normalize(
    notification: UpstreamNotification,
    arrival: i64,
) -> Result<Event, MalformedEventError> {
    match notification {
        UpstreamNotification::ObjectStorage(object) => normalize_object(object, arrival),
        UpstreamNotification::Queue(queue) => normalize_queue(queue, arrival),
    }
}

fn normalize_object(
    object: ObjectNotification,
    arrival: i64,
) -> Result<Event, MalformedEventError> {
    let kind = EventKind::LogCreated;
    let name = non_blank(object.event_name.as_deref())
        .ok_or(MalformedEventError::MissingField {
            kind,
            field: "event_name",
        })?;
    if !name.starts_with(OBJECT_CREATED_PREFIX) {
        return Err(MalformedEventError::UnsupportedEvent {
            origin: "object_storage",
            name: name.to_string(),
        });
    }
    let bucket = non_blank(object.bucket.as_deref())
        .ok_or(MalformedEventError::MissingField { kind, field: "bucket" })?;
    let key = non_blank(object.key.as_deref())
        .ok_or(MalformedEventError::MissingField { kind, field: "key" })?;
    let timestamp = timestamp_or_arrival(kind, "event_time", object.event_time, arrival)?;

    let event = Event::new(kind, format!("{bucket}/{key}"), timestamp);
    Ok(match object.size {
        Some(size) => event.with_size(size),
        None => event,
    })
}

fn normalize_queue(queue: QueueNotification, arrival: i64) -> Result<Event, MalformedEventError> {
    let kind = EventKind::from(queue.event_type);
    let message_id = non_blank(queue.message_id.as_deref()).ok_or(
        MalformedEventError::MissingField {
            kind,
            field: "message_id",
        },
    )?;
    let timestamp = timestamp_or_arrival(kind, "timestamp", queue.timestamp, arrival)?;
    let reason = non_blank(queue.error_reason.as_deref());

    let event = Event::new(kind, message_id, timestamp);
    match (kind, reason) {
        (EventKind::DeliveryFailed, None) => Err(MalformedEventError::MissingField {
            kind,
            field: "error_reason",
        }),
        (EventKind::DeliveryFailed | EventKind::MessageDeadLettered, Some(reason)) => {
            Ok(event.with_error_reason(reason))
        }
        _ => Ok(event),
    }
}

fn timestamp_or_arrival(
    kind: EventKind,
    field: &'static str,
    timestamp: Option<i64>,
    arrival: i64,
) -> Result<i64, MalformedEventError> {
    match timestamp {
        Some(ts) if ts < 0 => Err(MalformedEventError::InvalidField {
            kind,
            field,
            reason: format!("negative timestamp {ts}"),
        }),
        Some(ts) => Ok(ts),
        None => Ok(arrival),
    }
}
