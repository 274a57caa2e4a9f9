//! Frame type shared by the framer, the hub and every client queue
//!
//! A frame is exactly one Annex-B NAL unit, start code included. It is cheap
//! to clone: `Bytes` is reference counted, so all queues holding the same
//! frame share one allocation.

use bytes::Bytes;

use super::h264::{start_code_len, FrameKind, NaluType};

/// One start-code-prefixed NAL unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Unit bytes including the leading start code
    pub data: Bytes,
    /// Decoding role derived from the NAL header
    pub kind: FrameKind,
    /// Raw NAL unit type, when it is one the relay knows by name
    pub nalu_type: Option<NaluType>,
    /// Position in the stream, assigned by whoever produced the frame
    pub sequence: u64,
    /// Length of the leading start code (3 or 4)
    start_code_len: usize,
}

impl Frame {
    /// Build a frame from a unit whose start code length is already known
    ///
    /// `data` must be longer than `start_code_len`.
    pub(crate) fn from_unit(data: Bytes, start_code_len: usize, sequence: u64) -> Self {
        let header = data[start_code_len];
        Self {
            kind: FrameKind::classify(header),
            nalu_type: NaluType::from_byte(header),
            data,
            sequence,
            start_code_len,
        }
    }

    /// Parse a frame from a buffer that starts with a start code
    ///
    /// Returns `None` when the buffer has no start code or no payload.
    pub fn from_annexb(data: Bytes, sequence: u64) -> Option<Self> {
        let sc = start_code_len(&data)?;
        if data.len() <= sc {
            return None;
        }
        Some(Self::from_unit(data, sc, sequence))
    }

    /// NAL unit bytes without the start code
    pub fn payload(&self) -> &[u8] {
        &self.data[self.start_code_len..]
    }

    /// Length of the leading start code
    pub fn start_code_len(&self) -> usize {
        self.start_code_len
    }

    /// Total size in bytes, start code included
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_key(&self) -> bool {
        self.kind == FrameKind::Key
    }

    pub fn is_parameter_set(&self) -> bool {
        self.kind == FrameKind::ParameterSet
    }

    pub fn is_delta(&self) -> bool {
        self.kind == FrameKind::Delta
    }
}
