//! GOP (Group of Pictures) cache for late-joiner support
//!
//! When a viewer starts watching a feed that is already running it needs:
//! 1. The most recent parameter sets (SPS/PPS)
//! 2. The most recent key unit
//! 3. Optionally, every unit since that key unit
//!
//! The cache keeps all three so the hub can either replay the whole GOP or
//! prepend just the parameter sets to the next key unit.

use std::collections::{BTreeMap, VecDeque};

use super::frame::Frame;
use super::h264::{parameter_set_id, FrameKind, NaluType};

/// Cache of the latest parameter sets and the current GOP
#[derive(Debug)]
pub struct GopCache {
    /// Maximum GOP size in bytes
    max_size: usize,
    /// Current GOP size in bytes
    current_size: usize,
    /// Latest SPS per id
    sps: BTreeMap<u32, Frame>,
    /// Latest PPS per id
    pps: BTreeMap<u32, Frame>,
    /// Every cached SPS, then every cached PPS, in id order
    parameter_sets: Vec<Frame>,
    /// Key unit followed by every unit since
    frames: VecDeque<Frame>,
    /// Whether `frames` starts with a key unit
    has_complete_gop: bool,
}

impl GopCache {
    /// Create a cache with default max size (4MB)
    pub fn new() -> Self {
        Self::with_max_size(4 * 1024 * 1024)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            max_size,
            current_size: 0,
            sps: BTreeMap::new(),
            pps: BTreeMap::new(),
            parameter_sets: Vec::new(),
            frames: VecDeque::new(),
            has_complete_gop: false,
        }
    }

    /// Record a unit in stream order
    ///
    /// A parameter set replaces the cached one of the same type and id,
    /// whatever units sit between them. A key unit starts a new GOP. A GOP
    /// that outgrows the size limit is dropped entirely until the next key
    /// unit, since a GOP with its head cut off cannot be decoded.
    pub fn push(&mut self, frame: Frame) {
        match frame.kind {
            FrameKind::ParameterSet => self.store_parameter_set(frame),
            FrameKind::Key => {
                self.clear_frames();
                self.has_complete_gop = true;
                self.append(frame);
            }
            FrameKind::Delta => {
                if self.has_complete_gop {
                    self.append(frame);
                }
            }
        }
    }

    fn store_parameter_set(&mut self, frame: Frame) {
        // Ids that cannot be read share slot 0
        let id = parameter_set_id(frame.payload()).unwrap_or(0);
        match frame.nalu_type {
            Some(NaluType::Sps) => self.sps.insert(id, frame),
            Some(NaluType::Pps) => self.pps.insert(id, frame),
            _ => return,
        };

        self.parameter_sets.clear();
        self.parameter_sets.extend(self.sps.values().cloned());
        self.parameter_sets.extend(self.pps.values().cloned());
    }

    fn append(&mut self, frame: Frame) {
        let size = frame.len();
        if self.current_size + size > self.max_size {
            tracing::debug!(
                gop_bytes = self.current_size,
                max_bytes = self.max_size,
                "GOP exceeds cache limit, dropping until next key unit"
            );
            self.clear_frames();
            return;
        }
        self.frames.push_back(frame);
        self.current_size += size;
    }

    /// Clear the GOP (but keep parameter sets)
    pub fn clear_frames(&mut self) {
        self.frames.clear();
        self.current_size = 0;
        self.has_complete_gop = false;
    }

    /// Clear everything, parameter sets included
    pub fn clear(&mut self) {
        self.clear_frames();
        self.sps.clear();
        self.pps.clear();
        self.parameter_sets.clear();
    }

    pub fn parameter_sets(&self) -> &[Frame] {
        &self.parameter_sets
    }

    pub fn has_parameter_sets(&self) -> bool {
        !self.parameter_sets.is_empty()
    }

    pub fn has_complete_gop(&self) -> bool {
        self.has_complete_gop
    }

    /// Whether a joiner can start from the cache right away
    pub fn is_ready(&self) -> bool {
        self.has_parameter_sets() && self.has_complete_gop
    }

    /// Parameter sets followed by the current GOP
    pub fn catchup_frames(&self) -> Vec<Frame> {
        let mut result = Vec::with_capacity(self.parameter_sets.len() + self.frames.len());
        result.extend(self.parameter_sets.iter().cloned());
        result.extend(self.frames.iter().cloned());
        result
    }

    /// Number of units in the current GOP
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// GOP size in bytes
    pub fn size(&self) -> usize {
        self.current_size
    }

    /// Buffer utilization as a percentage
    pub fn utilization(&self) -> f32 {
        if self.max_size > 0 {
            (self.current_size as f32 / self.max_size as f32) * 100.0
        } else {
            0.0
        }
    }
}

impl Default for GopCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn unit(header: u8, size: usize) -> Frame {
        let mut data = vec![0u8; size.max(5)];
        data[..4].copy_from_slice(&[0, 0, 0, 1]);
        data[4] = header;
        for b in data.iter_mut().skip(5) {
            *b = 0xAA;
        }
        Frame::from_annexb(Bytes::from(data), 0).unwrap()
    }

    fn sps() -> Frame {
        unit(0x67, 10)
    }
    fn pps() -> Frame {
        unit(0x68, 8)
    }
    fn key(size: usize) -> Frame {
        unit(0x65, size)
    }
    fn delta(size: usize) -> Frame {
        unit(0x41, size)
    }

    #[test]
    fn test_gop_cache_basic() {
        let mut cache = GopCache::new();
        assert!(!cache.is_ready());

        cache.push(sps());
        cache.push(pps());
        assert!(!cache.is_ready()); // Still need a key unit

        cache.push(key(100));
        assert!(cache.is_ready());

        cache.push(delta(50));
        cache.push(delta(50));
        assert_eq!(cache.frame_count(), 3);
        assert_eq!(cache.size(), 200);
    }

    #[test]
    fn test_key_unit_starts_new_gop() {
        let mut cache = GopCache::new();
        cache.push(sps());
        cache.push(pps());
        cache.push(key(100));
        cache.push(delta(50));
        cache.push(delta(50));

        cache.push(key(100));
        assert_eq!(cache.frame_count(), 1);
        // Parameter sets survive across GOPs
        assert_eq!(cache.parameter_sets().len(), 2);
    }

    #[test]
    fn test_deltas_before_first_key_are_ignored() {
        let mut cache = GopCache::new();
        cache.push(delta(50));
        cache.push(delta(50));
        assert_eq!(cache.frame_count(), 0);
        assert!(!cache.has_complete_gop());

        cache.push(key(50));
        assert!(cache.has_complete_gop());
    }

    fn unit_with(header: u8, body: &[u8]) -> Frame {
        let mut data = vec![0, 0, 0, 1, header];
        data.extend_from_slice(body);
        Frame::from_annexb(Bytes::from(data), 0).unwrap()
    }

    #[test]
    fn test_parameter_set_replaced_by_id() {
        let mut cache = GopCache::new();
        cache.push(sps());
        cache.push(pps());
        cache.push(key(50));

        let new_sps = unit(0x67, 12);
        cache.push(new_sps.clone());
        assert_eq!(cache.parameter_sets(), &[new_sps.clone(), pps()]);
    }

    #[test]
    fn test_side_data_between_parameter_sets() {
        let mut cache = GopCache::new();
        cache.push(sps());
        cache.push(unit(0x06, 8)); // SEI
        cache.push(pps());
        cache.push(unit(0x09, 6)); // AUD
        cache.push(key(50));

        assert_eq!(cache.parameter_sets(), &[sps(), pps()]);
    }

    #[test]
    fn test_parameter_sets_replay_sps_first() {
        let mut cache = GopCache::new();
        cache.push(pps());
        cache.push(sps());

        let types: Vec<_> = cache.parameter_sets().iter().map(|f| f.nalu_type).collect();
        assert_eq!(types, vec![Some(NaluType::Sps), Some(NaluType::Pps)]);
    }

    #[test]
    fn test_distinct_ids_are_kept() {
        let mut cache = GopCache::new();
        let sps_0 = unit_with(0x67, &[0x42, 0x00, 0x1e, 0x80]);
        let sps_2 = unit_with(0x67, &[0x42, 0x00, 0x1e, 0x60]);
        let pps_0 = unit_with(0x68, &[0xce, 0x3c, 0x80]);
        let pps_1 = unit_with(0x68, &[0x40]);

        cache.push(sps_2.clone());
        cache.push(pps_1.clone());
        cache.push(sps_0.clone());
        cache.push(pps_0.clone());

        assert_eq!(cache.parameter_sets(), &[sps_0, sps_2, pps_0, pps_1]);
    }

    #[test]
    fn test_catchup_frames_order() {
        let mut cache = GopCache::new();
        cache.push(sps());
        cache.push(pps());
        cache.push(key(100));
        cache.push(delta(40));

        let kinds: Vec<FrameKind> = cache.catchup_frames().iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                FrameKind::ParameterSet,
                FrameKind::ParameterSet,
                FrameKind::Key,
                FrameKind::Delta
            ]
        );
    }

    #[test]
    fn test_oversized_gop_is_dropped() {
        let mut cache = GopCache::with_max_size(300);
        cache.push(sps());
        cache.push(key(200));
        cache.push(delta(80));
        assert!(cache.is_ready());

        // Would exceed the limit: the whole GOP goes
        cache.push(delta(80));
        assert_eq!(cache.frame_count(), 0);
        assert!(!cache.is_ready());

        // Later deltas are not cached until a key arrives
        cache.push(delta(10));
        assert_eq!(cache.frame_count(), 0);

        cache.push(key(100));
        assert!(cache.is_ready());
    }

    #[test]
    fn test_clear() {
        let mut cache = GopCache::new();
        cache.push(sps());
        cache.push(key(50));

        cache.clear_frames();
        assert!(cache.has_parameter_sets());
        assert_eq!(cache.frame_count(), 0);

        cache.clear();
        assert!(!cache.has_parameter_sets());
        assert!(!cache.is_ready());
    }

    #[test]
    fn test_utilization() {
        let mut cache = GopCache::with_max_size(1000);
        assert_eq!(cache.utilization(), 0.0);

        cache.push(key(500));
        assert!((cache.utilization() - 50.0).abs() < 1.0);
    }
}
