//! Client entry and delivery types
//!
//! This module defines the per-client state stored in the hub.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::media::Frame;
use crate::protocol::ServerNotice;
use crate::session::{InvalidTransition, SessionEvent, SessionState};
use crate::stats::{ClientStats, RelayMetrics};

use super::queue::{FrameQueue, Outbound, PushOutcome};

/// Unique client identifier, assigned by the listener
pub type ClientId = u64;

/// Result of offering one frame to one client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Client is not streaming
    Skipped,
    /// Client is waiting for a key frame
    Withheld,
    /// Frames were queued (more than one when cached parameter sets lead)
    Queued(usize),
    /// Client stayed saturated too long and must be removed
    Overflowed,
    /// Client's queue is closed
    Closed,
}

/// Result of a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Cached GOP replayed; the client is synced
    CatchUp(usize),
    /// Client waits for the next key frame
    AwaitingKeyframe,
    /// Client was already streaming
    AlreadyStreaming,
}

/// What happened to a single push
enum Pushed {
    Queued,
    /// The queue gave up a sync frame and emptied itself
    Resync,
    /// Not queued; delivery ends with this result
    Rejected(Delivery),
}

#[derive(Debug)]
struct SyncState {
    state: SessionState,
    /// Client has received parameter sets and a key frame since starting
    synced: bool,
}

/// Entry for a single client in the hub
#[derive(Debug)]
pub struct ClientEntry {
    id: ClientId,
    peer_addr: SocketAddr,
    sync: Mutex<SyncState>,
    queue: FrameQueue,
    connected_at: Instant,
    last_activity: Mutex<Instant>,
    frames_queued: AtomicU64,
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl ClientEntry {
    /// Create an Idle client entry
    pub(super) fn new(id: ClientId, peer_addr: SocketAddr, queue_capacity: usize) -> Self {
        let now = Instant::now();
        Self {
            id,
            peer_addr,
            sync: Mutex::new(SyncState {
                state: SessionState::Idle,
                synced: false,
            }),
            queue: FrameQueue::new(queue_capacity),
            connected_at: now,
            last_activity: Mutex::new(now),
            frames_queued: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    fn lock_sync(&self) -> MutexGuard<'_, SyncState> {
        self.sync.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> SessionState {
        self.lock_sync().state
    }

    pub fn is_synced(&self) -> bool {
        self.lock_sync().synced
    }

    /// Next outbound message for the writer task; `None` once closed
    pub async fn next_outbound(&self) -> Option<Outbound> {
        self.queue.pop().await
    }

    pub fn queue(&self) -> &FrameQueue {
        &self.queue
    }

    /// Offer a live frame
    ///
    /// A client that has not yet seen a key frame gets nothing until one
    /// arrives while parameter sets are cached; the cached parameter sets
    /// then go out ahead of it. If that prefix does not fit in the queue the
    /// client keeps waiting. A synced client whose queue had to give up a
    /// parameter set or key frame loses sync and starts over the same way.
    pub(super) fn deliver(
        &self,
        frame: &Frame,
        parameter_sets: &[Frame],
        overflow_timeout: Duration,
        metrics: &RelayMetrics,
    ) -> Delivery {
        let mut sync = self.lock_sync();
        if !sync.state.is_streaming() {
            return Delivery::Skipped;
        }

        if sync.synced {
            match self.push(frame.clone(), overflow_timeout, metrics) {
                Pushed::Queued => return Delivery::Queued(1),
                Pushed::Resync => {
                    sync.synced = false;
                    tracing::debug!(client_id = self.id, "Client fell behind a key frame, resyncing");
                }
                Pushed::Rejected(done) => return done,
            }
        }

        if !frame.is_key() || parameter_sets.is_empty() {
            return Delivery::Withheld;
        }

        let prefix_len = parameter_sets.len() + 1;
        if prefix_len > self.queue.capacity() {
            tracing::warn!(
                client_id = self.id,
                needed = prefix_len,
                capacity = self.queue.capacity(),
                "Queue too small for parameter sets and key frame"
            );
            return Delivery::Withheld;
        }

        // Anything still queued predates sync and cannot be decoded
        self.record_dropped(self.queue.make_room(prefix_len), metrics);

        for unit in parameter_sets.iter().chain(std::iter::once(frame)) {
            match self.push(unit.clone(), overflow_timeout, metrics) {
                Pushed::Queued => {}
                Pushed::Resync => return Delivery::Withheld,
                Pushed::Rejected(done) => return done,
            }
        }
        sync.synced = true;
        Delivery::Queued(prefix_len)
    }

    /// Push one frame and account for what the queue did with it
    fn push(&self, frame: Frame, overflow_timeout: Duration, metrics: &RelayMetrics) -> Pushed {
        match self.queue.push_frame(frame, overflow_timeout) {
            PushOutcome::Queued => {}
            PushOutcome::DroppedOldest => self.record_dropped(1, metrics),
            PushOutcome::Resync { dropped } => {
                self.record_dropped(dropped, metrics);
                return Pushed::Resync;
            }
            PushOutcome::Overflowed => return Pushed::Rejected(Delivery::Overflowed),
            PushOutcome::Closed => return Pushed::Rejected(Delivery::Closed),
        }
        self.frames_queued.fetch_add(1, Ordering::Relaxed);
        metrics.record_queued(1);
        Pushed::Queued
    }

    fn record_dropped(&self, count: usize, metrics: &RelayMetrics) {
        if count > 0 {
            self.frames_dropped.fetch_add(count as u64, Ordering::Relaxed);
            metrics.record_dropped(count as u64);
        }
    }

    /// Idle → Streaming
    ///
    /// `catchup` is queued as-is when given and it fits in the queue.
    pub(super) fn start_streaming(
        &self,
        catchup: Option<Vec<Frame>>,
        overflow_timeout: Duration,
        metrics: &RelayMetrics,
    ) -> Result<StartOutcome, InvalidTransition> {
        let mut sync = self.lock_sync();
        if sync.state.is_streaming() {
            return Ok(StartOutcome::AlreadyStreaming);
        }
        sync.state = sync.state.apply(SessionEvent::Start)?;
        sync.synced = false;

        match catchup {
            Some(frames) if !frames.is_empty() && frames.len() <= self.queue.capacity() => {
                let count = frames.len();
                self.record_dropped(self.queue.make_room(count), metrics);
                for frame in frames {
                    if !matches!(self.push(frame, overflow_timeout, metrics), Pushed::Queued) {
                        return Ok(StartOutcome::AwaitingKeyframe);
                    }
                }
                sync.synced = true;
                Ok(StartOutcome::CatchUp(count))
            }
            _ => Ok(StartOutcome::AwaitingKeyframe),
        }
    }

    /// Streaming → Idle; returns whether the client was streaming
    ///
    /// Frames still queued are discarded so the viewer stops promptly.
    pub(super) fn stop_streaming(&self) -> Result<bool, InvalidTransition> {
        let mut sync = self.lock_sync();
        let was_streaming = sync.state.is_streaming();
        sync.state = sync.state.apply(SessionEvent::Stop)?;
        sync.synced = false;
        drop(sync);

        if was_streaming {
            self.queue.clear_frames();
        }
        Ok(was_streaming)
    }

    /// Move a streaming client to Idle and tell it why
    ///
    /// Returns false (and sends nothing) for clients that were not streaming.
    pub(super) fn end_stream(&self, notice: ServerNotice) -> bool {
        let mut sync = self.lock_sync();
        if !sync.state.is_streaming() {
            return false;
        }
        sync.state = SessionState::Idle;
        sync.synced = false;
        self.queue.push_notice(notice)
    }

    /// Queue a notice regardless of state; false once closed
    pub fn notify(&self, notice: ServerNotice) -> bool {
        self.queue.push_notice(notice)
    }

    /// Mark closed and release the queue
    pub(super) fn close(&self) {
        let mut sync = self.lock_sync();
        sync.state = SessionState::Closed;
        sync.synced = false;
        drop(sync);

        self.queue.close();
    }

    /// Record a frame written to the socket
    pub fn record_sent(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.touch();
    }

    /// Record socket activity
    pub fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    pub fn stats(&self) -> ClientStats {
        let idle_for = self
            .last_activity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed();
        ClientStats {
            peer_addr: self.peer_addr,
            state: self.state(),
            frames_queued: self.frames_queued.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            queue_len: self.queue.len(),
            connected_for: self.connected_at.elapsed(),
            idle_for,
        }
    }
}
