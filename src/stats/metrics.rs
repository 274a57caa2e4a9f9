//! Statistics and metrics for the relay
//!
//! [`RelayMetrics`] is a set of atomic counters shared by the hub, the feed
//! pump and every session. Readers take a [`MetricsSnapshot`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::media::{Frame, FrameKind};
use crate::session::SessionState;

/// Relay-wide counters
#[derive(Debug)]
pub struct RelayMetrics {
    started_at: Instant,
    connections_total: AtomicU64,
    connections_active: AtomicU64,
    frames_published: AtomicU64,
    keyframes_published: AtomicU64,
    bytes_published: AtomicU64,
    frames_queued: AtomicU64,
    frames_dropped: AtomicU64,
    frames_withheld: AtomicU64,
    clients_overflowed: AtomicU64,
    protocol_violations: AtomicU64,
    encoder_starts: AtomicU64,
    streams_ended: AtomicU64,
    framing_truncations: AtomicU64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            frames_published: AtomicU64::new(0),
            keyframes_published: AtomicU64::new(0),
            bytes_published: AtomicU64::new(0),
            frames_queued: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            frames_withheld: AtomicU64::new(0),
            clients_overflowed: AtomicU64::new(0),
            protocol_violations: AtomicU64::new(0),
            encoder_starts: AtomicU64::new(0),
            streams_ended: AtomicU64::new(0),
            framing_truncations: AtomicU64::new(0),
        }
    }

    pub fn record_connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self) {
        // Never wraps below zero even if close is reported twice
        let _ = self
            .connections_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// A frame entered the hub from the feed
    pub fn record_published(&self, frame: &Frame) {
        self.frames_published.fetch_add(1, Ordering::Relaxed);
        self.bytes_published
            .fetch_add(frame.len() as u64, Ordering::Relaxed);
        if frame.kind == FrameKind::Key {
            self.keyframes_published.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_queued(&self, count: u64) {
        self.frames_queued.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: u64) {
        self.frames_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_withheld(&self) {
        self.frames_withheld.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overflow(&self) {
        self.clients_overflowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_protocol_violation(&self) {
        self.protocol_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_encoder_start(&self) {
        self.encoder_starts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_ended(&self, truncated: bool) {
        self.streams_ended.fetch_add(1, Ordering::Relaxed);
        if truncated {
            self.framing_truncations.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn active_connections(&self) -> u64 {
        self.connections_active.load(Ordering::Relaxed)
    }

    /// Consistent-enough copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime: self.started_at.elapsed(),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            keyframes_published: self.keyframes_published.load(Ordering::Relaxed),
            bytes_published: self.bytes_published.load(Ordering::Relaxed),
            frames_queued: self.frames_queued.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_withheld: self.frames_withheld.load(Ordering::Relaxed),
            clients_overflowed: self.clients_overflowed.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::Relaxed),
            encoder_starts: self.encoder_starts.load(Ordering::Relaxed),
            streams_ended: self.streams_ended.load(Ordering::Relaxed),
            framing_truncations: self.framing_truncations.load(Ordering::Relaxed),
        }
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`RelayMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Time since the metrics were created
    pub uptime: Duration,
    /// Connections ever accepted
    pub connections_total: u64,
    /// Connections currently open
    pub connections_active: u64,
    /// Frames received from the feed
    pub frames_published: u64,
    /// Key frames received from the feed
    pub keyframes_published: u64,
    /// Bytes received from the feed
    pub bytes_published: u64,
    /// Frame copies placed on client queues
    pub frames_queued: u64,
    /// Frames evicted from full client queues
    pub frames_dropped: u64,
    /// Frames held back from clients waiting for a key frame
    pub frames_withheld: u64,
    /// Clients disconnected for staying saturated
    pub clients_overflowed: u64,
    /// Malformed or unexpected client messages
    pub protocol_violations: u64,
    /// Encoder launches
    pub encoder_starts: u64,
    /// Feed ends (any reason)
    pub streams_ended: u64,
    /// Feed ends that cut a unit short
    pub framing_truncations: u64,
}

impl MetricsSnapshot {
    /// Average feed bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.uptime.as_secs();
        if secs > 0 {
            (self.bytes_published * 8) / secs
        } else {
            0
        }
    }
}

/// Per-client statistics
#[derive(Debug, Clone)]
pub struct ClientStats {
    /// Remote peer address
    pub peer_addr: SocketAddr,
    /// Current session state
    pub state: SessionState,
    /// Frames placed on this client's queue
    pub frames_queued: u64,
    /// Frames written to the socket
    pub frames_sent: u64,
    /// Bytes written to the socket (binary messages only)
    pub bytes_sent: u64,
    /// Frames evicted from this client's queue
    pub frames_dropped: u64,
    /// Messages currently waiting in the queue
    pub queue_len: usize,
    /// Time since the client was registered
    pub connected_for: Duration,
    /// Time since the last socket activity
    pub idle_for: Duration,
}

impl ClientStats {
    /// Fraction of queued frames that were dropped, as a percentage
    pub fn drop_rate(&self) -> f64 {
        if self.frames_queued > 0 {
            (self.frames_dropped as f64 / self.frames_queued as f64) * 100.0
        } else {
            0.0
        }
    }
}
