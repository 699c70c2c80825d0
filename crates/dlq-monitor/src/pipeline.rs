// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Task layout of a running pipeline.
//!
//! ```text
//!                    ┌─> lane 0 ─┐
//!   EventSource ─> dispatcher ─> lane 1 ─┼─> Aggregator <─ snapshot ─ emission task ─> sink
//!                    └─> lane N ─┘
//! ```
//!
//! The dispatcher normalizes raw events and shards them over the lanes by resource id,
//! so every event of one message is applied by one lane in arrival order. Outcomes that
//! overtake their receipt are parked by the lane and replayed once the receipt arrives.
//! Parked outcomes whose receipt does not show up within the configured TTL are dropped
//! and reported as [`InvalidTransitionError::NotReceived`].
//!
//! On shutdown (source exhausted or [`PipelineHandle::stop`]) the dispatcher stops
//! reading, lanes drain their queues, and the emission task publishes a final snapshot.

use fnv::FnvHasher;
use hashbrown::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::aggregator::{Aggregator, Applied};
use crate::config::MonitorConfig;
use crate::constants::{MIN_PARKED_SWEEP_INTERVAL_MS, WORKER_QUEUE_CAPACITY};
use crate::dead_letter::Transition;
use crate::emitter::{EmitReport, EmitterConfig, SnapshotEmitter};
use crate::errors::{ConfigError, InvalidTransitionError, MalformedEventError};
use crate::event::{ingest, Event};
use crate::notifications::{notify, Notification};
use crate::sink::ReportingSink;
use crate::source::EventSource;
use crate::util::unix_now;

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum PipelineStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Handle to a started pipeline.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    status: watch::Receiver<PipelineStatus>,
    status_tx: Arc<watch::Sender<PipelineStatus>>,
    shutdown: CancellationToken,
    aggregator: Arc<Aggregator>,
}

impl PipelineHandle {
    pub fn status(&self) -> PipelineStatus {
        *self.status.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.status() == PipelineStatus::Running
    }

    pub fn status_receiver(&self) -> watch::Receiver<PipelineStatus> {
        self.status.clone()
    }

    pub fn aggregator(&self) -> Arc<Aggregator> {
        Arc::clone(&self.aggregator)
    }

    /// Requests shutdown. Buffered events are still applied and a final snapshot is
    /// emitted; await [`PipelineHandle::stopped`] for completion.
    pub fn stop(&self) {
        self.status_tx.send_if_modified(|status| {
            if matches!(status, PipelineStatus::Starting | PipelineStatus::Running) {
                *status = PipelineStatus::Stopping;
                true
            } else {
                false
            }
        });
        self.shutdown.cancel();
    }

    pub async fn stopped(&self) {
        let mut status = self.status.clone();
        if status
            .wait_for(|status| *status == PipelineStatus::Stopped)
            .await
            .is_err()
        {
            debug!("Pipeline supervisor exited without reporting Stopped");
        }
    }
}

pub struct Pipeline {
    config: MonitorConfig,
    aggregator: Arc<Aggregator>,
    notifications: Option<mpsc::Sender<Notification>>,
}

impl Pipeline {
    pub fn new(config: MonitorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let aggregator = Arc::new(Aggregator::new(
            config.max_retries,
            config.bucket_granularity,
        ));
        Ok(Self {
            config,
            aggregator,
            notifications: None,
        })
    }

    #[must_use]
    pub fn with_notifications(mut self, tx: mpsc::Sender<Notification>) -> Self {
        self.notifications = Some(tx);
        self
    }

    pub fn aggregator(&self) -> Arc<Aggregator> {
        Arc::clone(&self.aggregator)
    }

    /// Spawns the pipeline tasks on the current runtime.
    pub fn start<S>(self, source: S, sink: Arc<dyn ReportingSink>) -> PipelineHandle
    where
        S: EventSource + 'static,
    {
        let (status_tx, status_rx) = watch::channel(PipelineStatus::Starting);
        let status_tx = Arc::new(status_tx);
        let shutdown = CancellationToken::new();
        let handle = PipelineHandle {
            status: status_rx,
            status_tx: Arc::clone(&status_tx),
            shutdown: shutdown.clone(),
            aggregator: Arc::clone(&self.aggregator),
        };

        let emitter = SnapshotEmitter::new(EmitterConfig {
            sink,
            buffer_size: self.config.snapshot_buffer_size,
            timeout: self.config.sink_timeout,
            retry_strategy: self.config.retry_strategy(),
        });
        let ingestion_done = CancellationToken::new();
        let emission = tokio::spawn(
            run_emission(
                Arc::clone(&self.aggregator),
                emitter,
                self.config.snapshot_interval,
                self.config.delivered_retention,
                ingestion_done.clone(),
                shutdown.clone(),
                self.notifications.clone(),
            )
            .instrument(info_span!("emission")),
        );

        tokio::spawn(async move {
            status_tx.send_if_modified(|status| {
                if *status == PipelineStatus::Starting {
                    *status = PipelineStatus::Running;
                    true
                } else {
                    false
                }
            });
            info!(
                "Pipeline running with {} lanes, max_retries={}",
                self.config.workers, self.config.max_retries
            );

            run_ingestion(
                source,
                Arc::clone(&self.aggregator),
                self.config.workers,
                ParkingLimits {
                    max_outcomes: self.config.max_pending_outcomes,
                    ttl: self.config.parked_outcome_ttl,
                },
                shutdown,
                self.notifications.clone(),
            )
            .await;

            status_tx.send_replace(PipelineStatus::Stopping);
            ingestion_done.cancel();
            if let Err(e) = emission.await {
                error!("Emission task failed: {}", e);
            }
            notify(self.notifications.as_ref(), Notification::Tombstone);
            status_tx.send_replace(PipelineStatus::Stopped);
            info!("Pipeline stopped");
        });

        handle
    }
}

fn lane_for(resource_id: &str, lanes: usize) -> usize {
    let mut hasher = FnvHasher::default();
    resource_id.hash(&mut hasher);
    (hasher.finish() % lanes as u64) as usize
}

/// Reads the source until it is exhausted or shutdown is requested, then drains the lanes.
async fn run_ingestion<S: EventSource>(
    mut source: S,
    aggregator: Arc<Aggregator>,
    workers: usize,
    parking: ParkingLimits,
    shutdown: CancellationToken,
    notifications: Option<mpsc::Sender<Notification>>,
) {
    let workers = workers.max(1);
    let mut senders = Vec::with_capacity(workers);
    let mut lanes = Vec::with_capacity(workers);
    for index in 0..workers {
        let (tx, rx) = mpsc::channel(WORKER_QUEUE_CAPACITY);
        senders.push(tx);
        let lane = Lane::new(Arc::clone(&aggregator), parking, notifications.clone());
        lanes.push(tokio::spawn(
            lane.run(rx).instrument(info_span!("lane", index)),
        ));
    }

    loop {
        let raw = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                debug!("Shutdown requested, no longer reading events");
                break;
            }
            raw = source.next_raw_event() => raw,
        };
        let Some(raw) = raw else {
            debug!("Event source exhausted");
            break;
        };

        let event = match ingest(&raw) {
            Ok(event) => event,
            Err(e) => {
                reject_event(e, notifications.as_ref());
                continue;
            }
        };
        let lane = lane_for(event.resource_id(), workers);
        if senders[lane].send(event).await.is_err() {
            error!("Lane {} is gone, stopping ingestion", lane);
            break;
        }
    }

    drop(senders);
    for (index, lane) in lanes.into_iter().enumerate() {
        if let Err(e) = lane.await {
            error!("Lane {} failed: {}", index, e);
        }
    }
}

fn reject_event(e: MalformedEventError, notifications: Option<&mpsc::Sender<Notification>>) {
    // Other object-storage events are expected on a shared notification feed.
    if matches!(e, MalformedEventError::UnsupportedEvent { .. }) {
        debug!("Dropping event: {}", e);
    } else {
        warn!("Dropping malformed event: {}", e);
    }
    notify(notifications, Notification::EventRejected(e));
}

/// Bounds on the outcomes a lane holds back while waiting for their receipt.
#[derive(Debug, Clone, Copy)]
struct ParkingLimits {
    max_outcomes: usize,
    ttl: Duration,
}

/// Applies the events of one shard in order.
struct Lane {
    aggregator: Arc<Aggregator>,
    parked: HashMap<String, Vec<(Instant, Event)>>,
    parked_count: usize,
    limits: ParkingLimits,
    notifications: Option<mpsc::Sender<Notification>>,
}

impl Lane {
    fn new(
        aggregator: Arc<Aggregator>,
        limits: ParkingLimits,
        notifications: Option<mpsc::Sender<Notification>>,
    ) -> Self {
        Self {
            aggregator,
            parked: HashMap::new(),
            parked_count: 0,
            limits,
            notifications,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Event>) {
        let period = (self.limits.ttl / 2).max(Duration::from_millis(MIN_PARKED_SWEEP_INTERVAL_MS));
        let mut sweep = tokio::time::interval(period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        sweep.tick().await;

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                _ = sweep.tick() => self.expire_parked(Instant::now()),
            }
        }
        self.discard_parked();
    }

    fn handle(&mut self, event: Event) {
        match self.aggregator.apply(&event) {
            Ok(Applied::Message(Transition::Received)) => self.replay(event.resource_id()),
            Ok(_) => {}
            Err(InvalidTransitionError::NotReceived(_)) => self.park(event),
            Err(e) => self.reject(e),
        }
    }

    fn park(&mut self, event: Event) {
        let now = Instant::now();
        if self.parked_count >= self.limits.max_outcomes {
            self.expire_parked(now);
        }
        if self.parked_count >= self.limits.max_outcomes {
            self.reject(InvalidTransitionError::PendingOverflow {
                message_id: event.resource_id().to_string(),
                kind: event.kind(),
            });
            return;
        }
        debug!(
            "Parking {} for {} until its receipt arrives",
            event.kind(),
            event.resource_id()
        );
        self.parked_count += 1;
        self.parked
            .entry(event.resource_id().to_string())
            .or_default()
            .push((now, event));
    }

    fn replay(&mut self, message_id: &str) {
        let Some(events) = self.parked.remove(message_id) else {
            return;
        };
        self.parked_count -= events.len();
        debug!("Replaying {} parked outcomes for {}", events.len(), message_id);
        for (_, event) in events {
            if let Err(e) = self.aggregator.apply(&event) {
                self.reject(e);
            }
        }
    }

    /// Drops outcomes parked for at least the TTL.
    fn expire_parked(&mut self, now: Instant) {
        let ttl = self.limits.ttl;
        let mut expired = Vec::new();
        self.parked.retain(|message_id, events| {
            let before = events.len();
            events.retain(|(parked_at, _)| now.saturating_duration_since(*parked_at) < ttl);
            if events.len() < before {
                expired.push((message_id.clone(), before - events.len()));
            }
            !events.is_empty()
        });
        if expired.is_empty() {
            return;
        }

        let count: usize = expired.iter().map(|(_, n)| n).sum();
        self.parked_count -= count;
        warn!(
            "Expired {} parked outcomes whose receipt did not arrive within {:?}",
            count, ttl
        );
        for (message_id, _) in expired {
            notify(
                self.notifications.as_ref(),
                Notification::TransitionRejected(InvalidTransitionError::NotReceived(message_id)),
            );
        }
    }

    fn reject(&self, e: InvalidTransitionError) {
        warn!("Rejected transition: {}", e);
        notify(
            self.notifications.as_ref(),
            Notification::TransitionRejected(e),
        );
    }

    fn discard_parked(&mut self) {
        if self.parked_count == 0 {
            return;
        }
        warn!(
            "Discarding {} parked outcomes whose receipt never arrived",
            self.parked_count
        );
        for (message_id, _) in self.parked.drain() {
            notify(
                self.notifications.as_ref(),
                Notification::TransitionRejected(InvalidTransitionError::NotReceived(message_id)),
            );
        }
        self.parked_count = 0;
    }
}

/// Takes a snapshot every `interval` until ingestion finished, then emits a final one.
/// Once shutdown is requested no periodic snapshot is taken; only the final one follows.
async fn run_emission(
    aggregator: Arc<Aggregator>,
    mut emitter: SnapshotEmitter,
    interval: Duration,
    delivered_retention: Duration,
    ingestion_done: CancellationToken,
    shutdown: CancellationToken,
    notifications: Option<mpsc::Sender<Notification>>,
) {
    let retention = i64::try_from(delivered_retention.as_secs()).unwrap_or(i64::MAX);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    let mut sequence = 0u64;
    loop {
        tokio::select! {
            biased;
            () = ingestion_done.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if shutdown.is_cancelled() {
            debug!("Shutdown requested, waiting for the lanes to drain");
            ingestion_done.cancelled().await;
            break;
        }
        sequence += 1;
        let snapshot = aggregator.snapshot(sequence);
        let report = emitter.emit(snapshot, &shutdown).await;
        forward_report(report, notifications.as_ref());

        let evicted = aggregator
            .tracker()
            .evict_delivered(unix_now().saturating_sub(retention));
        if evicted > 0 {
            debug!("Evicted {} delivered markers", evicted);
        }
    }

    sequence += 1;
    debug!("Emitting final snapshot {}", sequence);
    let snapshot = aggregator.snapshot(sequence);
    let report = emitter.emit(snapshot, &CancellationToken::new()).await;
    if report.pending > 0 {
        error!(
            "{} snapshots were never acknowledged by the sink",
            report.pending
        );
    }
    forward_report(report, notifications.as_ref());
}

fn forward_report(report: EmitReport, notifications: Option<&mpsc::Sender<Notification>>) {
    for warning in report.dropped {
        notify(notifications, Notification::SnapshotDropped(warning));
    }
    for sequence in report.published {
        notify(notifications, Notification::SnapshotPublished { sequence });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter_store::{BucketGranularity, MESSAGES_DELIVERED, MESSAGES_RECEIVED};
    use crate::errors::{SinkError, TerminalState};
    use crate::event::{EventKind, RawEvent};
    use crate::notifications::NotificationBus;
    use crate::sink::{Ack, LogSink, RetryStrategy};
    use crate::snapshot::Snapshot;
    use crate::source::ChannelEventSource;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const T0: i64 = 1_700_000_000;

    fn lane_with_ttl(max_parked: usize, ttl: Duration) -> (Lane, NotificationBus) {
        let (bus, tx) = NotificationBus::run();
        let aggregator = Arc::new(Aggregator::new(3, BucketGranularity::Minute));
        let limits = ParkingLimits {
            max_outcomes: max_parked,
            ttl,
        };
        (Lane::new(aggregator, limits, Some(tx)), bus)
    }

    fn lane(max_parked: usize) -> (Lane, NotificationBus) {
        lane_with_ttl(max_parked, Duration::from_secs(3_600))
    }

    /// Fails every publish and remembers which sequences it was offered.
    #[derive(Default)]
    struct UnavailableSink {
        offered: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl ReportingSink for UnavailableSink {
        async fn publish(&self, snapshot: &Snapshot) -> Result<Ack, SinkError> {
            self.offered.lock().unwrap().push(snapshot.sequence());
            Err(SinkError::Unavailable("connection refused".to_string()))
        }
    }

    async fn send_line(events: &mpsc::Sender<RawEvent>, line: &str) {
        events.send(RawEvent::new(line)).await.unwrap();
    }

    #[test]
    fn test_lane_for_is_stable_and_in_range() {
        for id in ["m-1", "m-2", "logs/a.log", ""] {
            let lane = lane_for(id, 4);
            assert!(lane < 4);
            assert_eq!(lane, lane_for(id, 4));
        }
        assert_eq!(lane_for("m-1", 1), 0);
    }

    #[test]
    fn test_lane_replays_outcome_parked_before_receipt() {
        let (mut lane, _bus) = lane(10);
        lane.handle(Event::new(EventKind::MessageDelivered, "m-1", T0 + 1));
        assert_eq!(lane.parked_count, 1);
        assert_eq!(lane.aggregator.counters().total(MESSAGES_DELIVERED), 0);

        lane.handle(Event::new(EventKind::MessageReceived, "m-1", T0));
        assert_eq!(lane.parked_count, 0);
        assert_eq!(lane.aggregator.counters().total(MESSAGES_RECEIVED), 1);
        assert_eq!(lane.aggregator.counters().total(MESSAGES_DELIVERED), 1);
    }

    #[tokio::test]
    async fn test_lane_rejects_parking_overflow() {
        let (mut lane, mut bus) = lane(1);
        lane.handle(Event::new(EventKind::MessageDelivered, "m-1", T0));
        lane.handle(Event::new(EventKind::MessageDelivered, "m-2", T0));

        assert_eq!(
            bus.rx.recv().await,
            Some(Notification::TransitionRejected(
                InvalidTransitionError::PendingOverflow {
                    message_id: "m-2".to_string(),
                    kind: EventKind::MessageDelivered,
                }
            ))
        );
        assert_eq!(lane.parked_count, 1);
    }

    #[tokio::test]
    async fn test_lane_expires_parked_outcomes() {
        let (mut lane, mut bus) = lane_with_ttl(10, Duration::ZERO);
        lane.handle(Event::new(EventKind::MessageDelivered, "m-1", T0 + 1));
        assert_eq!(lane.parked_count, 1);

        lane.expire_parked(Instant::now());
        assert_eq!(lane.parked_count, 0);
        assert!(lane.parked.is_empty());
        assert_eq!(
            bus.rx.recv().await,
            Some(Notification::TransitionRejected(
                InvalidTransitionError::NotReceived("m-1".to_string())
            ))
        );

        // The receipt arriving late no longer brings the outcome back.
        lane.handle(Event::new(EventKind::MessageReceived, "m-1", T0));
        assert_eq!(lane.aggregator.counters().total(MESSAGES_RECEIVED), 1);
        assert_eq!(lane.aggregator.counters().total(MESSAGES_DELIVERED), 0);
    }

    #[test]
    fn test_lane_keeps_outcomes_younger_than_ttl() {
        let (mut lane, _bus) = lane(10);
        lane.handle(Event::new(EventKind::MessageDelivered, "m-1", T0 + 1));
        lane.expire_parked(Instant::now());
        assert_eq!(lane.parked_count, 1);
    }

    #[tokio::test]
    async fn test_full_lane_expires_before_rejecting() {
        let (mut lane, mut bus) = lane_with_ttl(1, Duration::ZERO);
        lane.handle(Event::new(EventKind::MessageDelivered, "m-1", T0));
        lane.handle(Event::new(EventKind::MessageDelivered, "m-2", T0));

        assert_eq!(
            bus.rx.recv().await,
            Some(Notification::TransitionRejected(
                InvalidTransitionError::NotReceived("m-1".to_string())
            ))
        );
        assert_eq!(lane.parked_count, 1);
        assert!(lane.parked.contains_key("m-2"));
    }

    #[tokio::test]
    async fn test_lane_reports_orphaned_outcomes_on_drain() {
        let (lane, mut bus) = lane(10);
        let (tx, rx) = mpsc::channel(4);
        tx.send(Event::new(EventKind::MessageDelivered, "m-9", T0))
            .await
            .unwrap();
        drop(tx);
        lane.run(rx).await;

        assert_eq!(
            bus.rx.recv().await,
            Some(Notification::TransitionRejected(
                InvalidTransitionError::NotReceived("m-9".to_string())
            ))
        );
    }

    #[tokio::test]
    async fn test_stop_drains_and_reports_stopped() {
        let config = MonitorConfig {
            snapshot_interval: Duration::from_secs(3_600),
            ..Default::default()
        };
        let (mut bus, tx) = NotificationBus::run();
        let pipeline = Pipeline::new(config).unwrap().with_notifications(tx);
        let (source, events) = ChannelEventSource::new(8);
        let handle = pipeline.start(source, Arc::new(LogSink));

        events
            .send(RawEvent::new(
                r#"{"source":"queue","event_type":"received","message_id":"m-1","timestamp":1700000000}"#,
            ))
            .await
            .unwrap();
        // Wait until the event went through the lanes.
        let aggregator = handle.aggregator();
        for _ in 0..100 {
            if aggregator.counters().total(MESSAGES_RECEIVED) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        handle.stop();
        assert_ne!(handle.status(), PipelineStatus::Running);
        handle.stopped().await;
        assert_eq!(handle.status(), PipelineStatus::Stopped);
        assert_eq!(aggregator.counters().total(MESSAGES_RECEIVED), 1);

        let mut published = Vec::new();
        while let Some(notification) = bus.rx.recv().await {
            match notification {
                Notification::SnapshotPublished { sequence } => published.push(sequence),
                Notification::Tombstone => break,
                other => panic!("unexpected notification {other:?}"),
            }
        }
        assert_eq!(published, vec![1]);
        drop(events);
    }

    #[tokio::test]
    async fn test_delivered_marker_outlives_snapshot_ticks() {
        // Event timestamps lie far behind the local clock.
        let config = MonitorConfig {
            snapshot_interval: Duration::from_millis(50),
            ..Default::default()
        };
        let (mut bus, tx) = NotificationBus::run();
        let pipeline = Pipeline::new(config).unwrap().with_notifications(tx);
        let (source, events) = ChannelEventSource::new(8);
        let handle = pipeline.start(source, Arc::new(LogSink));
        let aggregator = handle.aggregator();

        send_line(&events, r#"{"source":"queue","event_type":"received","message_id":"m-1","timestamp":1700000000}"#).await;
        send_line(&events, r#"{"source":"queue","event_type":"delivered","message_id":"m-1","timestamp":1700000001}"#).await;
        for _ in 0..100 {
            if aggregator.counters().total(MESSAGES_DELIVERED) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Several snapshot ticks, each followed by an eviction pass.
        tokio::time::sleep(Duration::from_millis(200)).await;

        send_line(&events, r#"{"source":"queue","event_type":"delivered","message_id":"m-1","timestamp":1700000002}"#).await;
        send_line(&events, r#"{"source":"queue","event_type":"received","message_id":"m-1","timestamp":1700000003}"#).await;

        let expected = Notification::TransitionRejected(InvalidTransitionError::AlreadyTerminal {
            message_id: "m-1".to_string(),
            state: TerminalState::Delivered,
        });
        let rejected = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(notification) = bus.rx.recv().await {
                match notification {
                    Notification::SnapshotPublished { .. } => {}
                    other => return other,
                }
            }
            Notification::Tombstone
        })
        .await
        .expect("redelivered receipt was not rejected");
        assert_eq!(rejected, expected);

        handle.stop();
        handle.stopped().await;
        assert_eq!(aggregator.counters().total(MESSAGES_RECEIVED), 1);
        assert_eq!(aggregator.counters().total(MESSAGES_DELIVERED), 1);
        drop(events);
    }

    #[tokio::test]
    async fn test_no_periodic_snapshot_after_stop() {
        let sink = Arc::new(UnavailableSink::default());
        let emitter = SnapshotEmitter::new(EmitterConfig {
            sink: sink.clone(),
            buffer_size: 1,
            timeout: Duration::from_secs(1),
            retry_strategy: RetryStrategy::Immediate(1),
        });
        let (mut bus, tx) = NotificationBus::run();
        let ingestion_done = CancellationToken::new();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let lanes_draining = {
            let ingestion_done = ingestion_done.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                ingestion_done.cancel();
            })
        };
        run_emission(
            Arc::new(Aggregator::new(3, BucketGranularity::Minute)),
            emitter,
            Duration::from_millis(10),
            Duration::from_secs(3_600),
            ingestion_done,
            shutdown,
            Some(tx),
        )
        .await;
        lanes_draining.await.unwrap();

        assert_eq!(*sink.offered.lock().unwrap(), vec![1]);
        bus.rx.close();
        while let Some(notification) = bus.rx.recv().await {
            assert!(
                !matches!(notification, Notification::SnapshotDropped(_)),
                "unexpected {notification:?}"
            );
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = MonitorConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(Pipeline::new(config).is_err());
    }
}
