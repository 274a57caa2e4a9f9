//! Viewer-side receive statistics
//!
//! The read loop records every unit it receives; [`RelayViewer::stats`]
//! returns a [`ViewerStats`] snapshot at any time.
//!
//! [`RelayViewer::stats`]: super::RelayViewer::stats

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Trailing window the frame rate is measured over
pub const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Point-in-time receive counters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ViewerStats {
    /// Units received since connecting
    pub frames: u64,
    /// Payload bytes received, start codes included
    pub bytes: u64,
    /// Units received per second over the trailing window
    pub fps: f64,
}

#[derive(Debug, Default)]
struct Inner {
    frames: u64,
    bytes: u64,
    arrivals: VecDeque<Instant>,
}

impl Inner {
    fn expire(&mut self, now: Instant) {
        while let Some(&oldest) = self.arrivals.front() {
            if now.saturating_duration_since(oldest) < FPS_WINDOW {
                break;
            }
            self.arrivals.pop_front();
        }
    }
}

/// Shared between the read loop and the viewer handle
#[derive(Debug, Default)]
pub(crate) struct StatsTracker {
    inner: Mutex<Inner>,
}

impl StatsTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, bytes: usize) {
        self.record_at(bytes, Instant::now());
    }

    pub(crate) fn record_at(&self, bytes: usize, now: Instant) {
        let mut inner = self.lock();
        inner.frames += 1;
        inner.bytes += bytes as u64;
        inner.arrivals.push_back(now);
        inner.expire(now);
    }

    pub(crate) fn snapshot(&self) -> ViewerStats {
        self.snapshot_at(Instant::now())
    }

    pub(crate) fn snapshot_at(&self, now: Instant) -> ViewerStats {
        let mut inner = self.lock();
        inner.expire(now);
        ViewerStats {
            frames: inner.frames,
            bytes: inner.bytes,
            fps: inner.arrivals.len() as f64 / FPS_WINDOW.as_secs_f64(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Counters stay usable after a panic elsewhere
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_frames_and_bytes() {
        let tracker = StatsTracker::new();
        tracker.record(100);
        tracker.record(28);

        let stats = tracker.snapshot();
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.bytes, 128);
    }

    #[test]
    fn test_fps_over_trailing_window() {
        let tracker = StatsTracker::new();
        let start = Instant::now();

        // 30 units in the first second
        for i in 0..30 {
            tracker.record_at(10, start + Duration::from_millis(i * 33));
        }
        let stats = tracker.snapshot_at(start + Duration::from_millis(990));
        assert_eq!(stats.fps, 30.0);

        // Half a second later the first half of them have aged out
        let stats = tracker.snapshot_at(start + Duration::from_millis(1490));
        assert_eq!(stats.fps, 15.0);
        assert_eq!(stats.frames, 30);

        // Nothing recent
        let stats = tracker.snapshot_at(start + Duration::from_secs(5));
        assert_eq!(stats.fps, 0.0);
        assert_eq!(stats.bytes, 300);
    }

    #[test]
    fn test_empty() {
        assert_eq!(StatsTracker::new().snapshot(), ViewerStats::default());
    }
}
