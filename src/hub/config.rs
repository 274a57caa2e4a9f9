//! Hub configuration

use std::time::Duration;

/// Smallest queue that holds an SPS, a PPS and a key frame
pub const MIN_QUEUE_CAPACITY: usize = 3;

/// Configuration for the broadcast hub
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum frames held per client before the oldest is dropped
    pub queue_capacity: usize,

    /// How long a client queue may stay full before the client is dropped
    pub overflow_timeout: Duration,

    /// Replay the cached GOP to clients that start mid-stream
    ///
    /// When disabled, a new viewer waits for the next key frame.
    pub gop_replay: bool,

    /// Maximum GOP size to cache in bytes
    pub max_gop_bytes: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 128,
            overflow_timeout: Duration::from_secs(5),
            gop_replay: false,
            max_gop_bytes: 4 * 1024 * 1024, // 4MB
        }
    }
}

impl HubConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-client queue capacity (minimum [`MIN_QUEUE_CAPACITY`])
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(MIN_QUEUE_CAPACITY);
        self
    }

    pub fn overflow_timeout(mut self, timeout: Duration) -> Self {
        self.overflow_timeout = timeout;
        self
    }

    /// Enable or disable GOP replay for late joiners
    pub fn gop_replay(mut self, enabled: bool) -> Self {
        self.gop_replay = enabled;
        self
    }

    pub fn max_gop_bytes(mut self, bytes: usize) -> Self {
        self.max_gop_bytes = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.queue_capacity, 128);
        assert_eq!(config.overflow_timeout, Duration::from_secs(5));
        assert!(!config.gop_replay);
    }

    #[test]
    fn test_builder() {
        let config = HubConfig::new()
            .queue_capacity(0)
            .overflow_timeout(Duration::from_millis(250))
            .gop_replay(true)
            .max_gop_bytes(1024);

        assert_eq!(config.queue_capacity, MIN_QUEUE_CAPACITY);
        assert_eq!(config.overflow_timeout, Duration::from_millis(250));
        assert!(config.gop_replay);
        assert_eq!(config.max_gop_bytes, 1024);
    }
}
