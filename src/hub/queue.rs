//! Bounded per-client outbound queue
//!
//! The publisher never waits on a client. Pushes take a short synchronous
//! lock and wake the client's writer task; when the queue is full the oldest
//! frame is evicted instead. Notices are never evicted and do not count
//! toward the capacity.
//!
//! Evicting a parameter set or key frame leaves the frames behind it
//! undecodable, so in that case every queued frame goes and the caller has
//! to resync the client at the next key frame.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::media::Frame;
use crate::protocol::ServerNotice;

/// One message waiting to be written to a client socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Sent as a binary message
    Frame(Frame),
    /// Sent as a JSON text message
    Notice(ServerNotice),
}

/// Result of [`FrameQueue::push_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Queued without loss
    Queued,
    /// Queued after evicting the oldest frame
    DroppedOldest,
    /// Not queued: the oldest frame was a parameter set or key frame, so all
    /// `dropped` queued frames were discarded
    Resync { dropped: usize },
    /// Not queued: the queue has been full for longer than the timeout
    Overflowed,
    /// Not queued: the queue is closed
    Closed,
}

#[derive(Debug, Default)]
struct Inner {
    items: VecDeque<Outbound>,
    frames: usize,
    saturated_since: Option<Instant>,
    closed: bool,
}

/// Bounded queue drained by a single writer task
#[derive(Debug)]
pub struct FrameQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a frame, evicting the oldest one when full
    ///
    /// Saturation starts with the first eviction and ends when the writer
    /// takes a frame. Once it has lasted `overflow_timeout`, pushes report
    /// `Overflowed` and the caller is expected to drop the client.
    pub fn push_frame(&self, frame: Frame, overflow_timeout: Duration) -> PushOutcome {
        let mut inner = self.lock();
        if inner.closed {
            return PushOutcome::Closed;
        }

        let outcome = if inner.frames >= self.capacity {
            let since = *inner.saturated_since.get_or_insert_with(Instant::now);
            if since.elapsed() >= overflow_timeout {
                return PushOutcome::Overflowed;
            }
            let oldest = inner
                .items
                .iter()
                .position(|item| matches!(item, Outbound::Frame(_)));
            if let Some(Outbound::Frame(evicted)) = oldest.and_then(|pos| inner.items.remove(pos)) {
                inner.frames -= 1;
                if !evicted.is_delta() {
                    let dropped = 1 + Self::drop_frames(&mut inner);
                    return PushOutcome::Resync { dropped };
                }
            }
            PushOutcome::DroppedOldest
        } else {
            PushOutcome::Queued
        };

        inner.items.push_back(Outbound::Frame(frame));
        inner.frames += 1;
        drop(inner);

        self.notify.notify_one();
        outcome
    }

    /// Queue a notice; returns false if the queue is closed
    pub fn push_notice(&self, notice: ServerNotice) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            return false;
        }
        inner.items.push_back(Outbound::Notice(notice));
        drop(inner);

        self.notify.notify_one();
        true
    }

    /// Wait for the next message
    ///
    /// Returns `None` once the queue is closed.
    pub async fn pop(&self) -> Option<Outbound> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.lock();
                if inner.closed {
                    return None;
                }
                if let Some(item) = Self::take(&mut inner, self.capacity) {
                    return Some(item);
                }
            }
            notified.await;
        }
    }

    /// Take the next message without waiting
    pub fn try_pop(&self) -> Option<Outbound> {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }
        Self::take(&mut inner, self.capacity)
    }

    fn take(inner: &mut Inner, capacity: usize) -> Option<Outbound> {
        let item = inner.items.pop_front()?;
        if matches!(item, Outbound::Frame(_)) {
            inner.frames -= 1;
            if inner.frames < capacity {
                inner.saturated_since = None;
            }
        }
        Some(item)
    }

    /// Drop every queued frame, keeping notices
    pub fn clear_frames(&self) -> usize {
        let mut inner = self.lock();
        inner.saturated_since = None;
        Self::drop_frames(&mut inner)
    }

    /// Evict the oldest frames until `count` more fit; returns how many went
    ///
    /// Saturation is left as is: only the writer draining ends it.
    pub fn make_room(&self, count: usize) -> usize {
        let mut inner = self.lock();
        let mut dropped = 0;
        while inner.frames > 0 && inner.frames + count > self.capacity {
            if let Some(pos) = inner
                .items
                .iter()
                .position(|item| matches!(item, Outbound::Frame(_)))
            {
                inner.items.remove(pos);
                inner.frames -= 1;
                dropped += 1;
            }
        }
        dropped
    }

    fn drop_frames(inner: &mut Inner) -> usize {
        let dropped = inner.frames;
        inner.items.retain(|item| matches!(item, Outbound::Notice(_)));
        inner.frames = 0;
        dropped
    }

    /// Close the queue and discard its contents; wakes the writer
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.items.clear();
        inner.frames = 0;
        drop(inner);

        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Messages waiting, notices included
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Frames waiting
    pub fn frame_count(&self) -> usize {
        self.lock().frames
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
