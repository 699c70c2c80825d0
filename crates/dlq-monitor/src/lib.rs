// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Dead-letter monitoring pipeline.
//!
//! Object-storage creation events and message-queue notifications are normalized into
//! [`event::Event`]s, folded into bucketed counters and a per-message dead-letter state
//! machine, and periodically reported to a [`sink::ReportingSink`] as immutable
//! [`snapshot::Snapshot`]s.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod aggregator;
pub mod config;
pub mod constants;
pub mod counter_store;
pub mod dead_letter;
pub mod emitter;
pub mod errors;
pub mod event;
pub mod logger;
pub mod notifications;
pub mod pipeline;
pub mod sink;
pub mod snapshot;
pub mod source;
pub mod util;
