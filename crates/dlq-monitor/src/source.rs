// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Upstream producers of raw events.
//!
//! Every source yields [`RawEvent`]s one at a time; `None` means the source is exhausted
//! and the pipeline should drain and stop.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::event::RawEvent;

// Max datagram size read in one call, extra bytes of larger datagrams are discarded
const BUFFER_SIZE: usize = 8192;

#[async_trait]
pub trait EventSource: Send {
    async fn next_raw_event(&mut self) -> Option<RawEvent>;
}

/// Receives newline-separated JSON records over UDP.
pub struct UdpEventSource {
    socket: UdpSocket,
    pending: VecDeque<RawEvent>,
}

impl UdpEventSource {
    pub async fn bind(host: &str, port: u16) -> std::io::Result<Self> {
        let addr = format!("{host}:{port}");
        let socket = UdpSocket::bind(&addr).await?;
        debug!("Listening for events on {}", socket.local_addr()?);
        Ok(Self {
            socket,
            pending: VecDeque::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn split_datagram(&mut self, buf: &[u8], src: SocketAddr) {
        let received_at = crate::util::unix_now();
        let payload = String::from_utf8_lossy(buf);
        trace!("Received datagram from {}: {}", src, payload);
        self.pending.extend(
            payload
                .split('\n')
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| RawEvent::received_at(line, received_at)),
        );
    }
}

#[async_trait]
impl EventSource for UdpEventSource {
    async fn next_raw_event(&mut self) -> Option<RawEvent> {
        let mut buf = [0; BUFFER_SIZE];
        loop {
            if let Some(raw) = self.pending.pop_front() {
                return Some(raw);
            }
            match self.socket.recv_from(&mut buf).await {
                Ok((amt, src)) => self.split_datagram(&buf[..amt], src),
                Err(e) => error!("Failed to receive datagram: {}", e),
            }
        }
    }
}

/// Push interface: producers send through the sender returned by [`ChannelEventSource::new`]; the source
/// is exhausted once every sender is dropped.
pub struct ChannelEventSource {
    rx: mpsc::Receiver<RawEvent>,
}

impl ChannelEventSource {
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<RawEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { rx }, tx)
    }
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn next_raw_event(&mut self) -> Option<RawEvent> {
        self.rx.recv().await
    }
}

/// Replays a fixed list of records, then reports exhaustion.
#[derive(Debug, Default)]
pub struct ReplayEventSource {
    events: VecDeque<RawEvent>,
}

impl ReplayEventSource {
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lines.into_iter().map(RawEvent::new).collect::<Vec<_>>().into()
    }
}

impl From<Vec<RawEvent>> for ReplayEventSource {
    fn from(events: Vec<RawEvent>) -> Self {
        Self {
            events: events.into(),
        }
    }
}

#[async_trait]
impl EventSource for ReplayEventSource {
    async fn next_raw_event(&mut self) -> Option<RawEvent> {
        self.events.pop_front()
    }
}
