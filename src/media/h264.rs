//! H.264 NAL unit header inspection
//!
//! The relay only ever needs the `nal_unit_type` field: the low five bits of
//! the first byte after the start code.
//!
//! ```text
//! +---+-----+-----------+
//! |F  | NRI | Type      |
//! |(1)| (2) | (5 bits)  |
//! +---+-----+-----------+
//! ```

/// 3-byte Annex-B start code
pub const START_CODE_3: [u8; 3] = [0x00, 0x00, 0x01];

/// 4-byte Annex-B start code
pub const START_CODE_4: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// NAL unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NaluType {
    /// Non-IDR slice
    Slice = 1,
    /// Slice data partition A
    SlicePartA = 2,
    /// Slice data partition B
    SlicePartB = 3,
    /// Slice data partition C
    SlicePartC = 4,
    /// IDR slice (keyframe)
    Idr = 5,
    /// Supplemental enhancement information
    Sei = 6,
    /// Sequence parameter set
    Sps = 7,
    /// Picture parameter set
    Pps = 8,
    /// Access unit delimiter
    Aud = 9,
    /// End of sequence
    EndSeq = 10,
    /// End of stream
    EndStream = 11,
    /// Filler data
    Filler = 12,
}

impl NaluType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            1 => Some(NaluType::Slice),
            2 => Some(NaluType::SlicePartA),
            3 => Some(NaluType::SlicePartB),
            4 => Some(NaluType::SlicePartC),
            5 => Some(NaluType::Idr),
            6 => Some(NaluType::Sei),
            7 => Some(NaluType::Sps),
            8 => Some(NaluType::Pps),
            9 => Some(NaluType::Aud),
            10 => Some(NaluType::EndSeq),
            11 => Some(NaluType::EndStream),
            12 => Some(NaluType::Filler),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, NaluType::Idr)
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NaluType::Sps | NaluType::Pps)
    }

    /// Video coding layer (picture data) as opposed to side information
    pub fn is_vcl(&self) -> bool {
        matches!(
            self,
            NaluType::Slice
                | NaluType::SlicePartA
                | NaluType::SlicePartB
                | NaluType::SlicePartC
                | NaluType::Idr
        )
    }

    /// Short name used in log output
    pub fn name(&self) -> &'static str {
        match self {
            NaluType::Slice => "slice",
            NaluType::SlicePartA => "slice-a",
            NaluType::SlicePartB => "slice-b",
            NaluType::SlicePartC => "slice-c",
            NaluType::Idr => "idr",
            NaluType::Sei => "sei",
            NaluType::Sps => "sps",
            NaluType::Pps => "pps",
            NaluType::Aud => "aud",
            NaluType::EndSeq => "end-seq",
            NaluType::EndStream => "end-stream",
            NaluType::Filler => "filler",
        }
    }
}

/// Decoding role of a unit, as seen by the broadcast path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// SPS or PPS; needed before anything else can be decoded
    ParameterSet,
    /// IDR picture, decodable on its own
    Key,
    /// Anything else: inter slices and non-VCL side data
    Delta,
}

impl FrameKind {
    /// Classify a unit from its NAL header byte
    pub fn classify(header: u8) -> Self {
        match NaluType::from_byte(header) {
            Some(t) if t.is_parameter_set() => FrameKind::ParameterSet,
            Some(t) if t.is_keyframe() => FrameKind::Key,
            _ => FrameKind::Delta,
        }
    }
}

/// Length of the start code at the beginning of `data`, if any
pub fn start_code_len(data: &[u8]) -> Option<usize> {
    if data.starts_with(&START_CODE_4) {
        Some(4)
    } else if data.starts_with(&START_CODE_3) {
        Some(3)
    } else {
        None
    }
}

/// Id of an SPS or PPS
///
/// `unit` starts at the NAL header byte. The SPS id follows the profile,
/// constraint and level bytes; the PPS id comes first. Both are Exp-Golomb
/// coded. Returns `None` for other unit types or when the unit is too short.
pub fn parameter_set_id(unit: &[u8]) -> Option<u32> {
    let (&header, rest) = unit.split_first()?;
    let rbsp = strip_emulation_prevention(rest, 32);
    let mut bits = BitReader::new(&rbsp);

    match NaluType::from_byte(header)? {
        NaluType::Sps => {
            bits.skip(24)?;
            bits.read_ue()
        }
        NaluType::Pps => bits.read_ue(),
        _ => None,
    }
}

/// Drop the `03` of every `00 00 03` sequence, reading at most `limit` bytes
fn strip_emulation_prevention(data: &[u8], limit: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(limit.min(data.len()));
    let mut zeros = 0;
    for &b in data.iter().take(limit) {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    out
}

struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_bit(&mut self) -> Option<u32> {
        let byte = *self.data.get(self.pos / 8)?;
        let bit = (byte >> (7 - self.pos % 8)) & 1;
        self.pos += 1;
        Some(bit as u32)
    }

    fn skip(&mut self, bits: usize) -> Option<()> {
        if self.pos + bits > self.data.len() * 8 {
            return None;
        }
        self.pos += bits;
        Some(())
    }

    /// Unsigned Exp-Golomb
    fn read_ue(&mut self) -> Option<u32> {
        let mut leading_zeros = 0;
        while self.read_bit()? == 0 {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return None;
            }
        }
        let mut suffix = 0u32;
        for _ in 0..leading_zeros {
            suffix = (suffix << 1) | self.read_bit()?;
        }
        Some(((1u64 << leading_zeros) - 1 + suffix as u64) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nalu_type() {
        assert_eq!(NaluType::from_byte(0x65), Some(NaluType::Idr));
        assert_eq!(NaluType::from_byte(0x67), Some(NaluType::Sps));
        assert_eq!(NaluType::from_byte(0x68), Some(NaluType::Pps));
        assert_eq!(NaluType::from_byte(0x41), Some(NaluType::Slice));
    }

    #[test]
    fn test_nalu_type_unassigned() {
        assert_eq!(NaluType::from_byte(0x00), None);
        assert_eq!(NaluType::from_byte(0x1F), None);
        assert_eq!(NaluType::from_byte(0x14), None);
    }

    #[test]
    fn test_nalu_type_predicates() {
        assert!(NaluType::Idr.is_keyframe());
        assert!(!NaluType::Slice.is_keyframe());
        assert!(NaluType::Sps.is_parameter_set());
        assert!(NaluType::Pps.is_parameter_set());
        assert!(!NaluType::Idr.is_parameter_set());
        assert!(NaluType::Slice.is_vcl());
        assert!(NaluType::Idr.is_vcl());
        assert!(!NaluType::Sei.is_vcl());
        assert!(!NaluType::Aud.is_vcl());
    }

    #[test]
    fn test_classify() {
        assert_eq!(FrameKind::classify(0x67), FrameKind::ParameterSet);
        assert_eq!(FrameKind::classify(0x68), FrameKind::ParameterSet);
        assert_eq!(FrameKind::classify(0x65), FrameKind::Key);
        assert_eq!(FrameKind::classify(0x41), FrameKind::Delta);
        assert_eq!(FrameKind::classify(0x06), FrameKind::Delta);
        assert_eq!(FrameKind::classify(0x09), FrameKind::Delta);
        // Unassigned types fall back to delta
        assert_eq!(FrameKind::classify(0x18), FrameKind::Delta);
    }

    #[test]
    fn test_start_code_len() {
        assert_eq!(start_code_len(&[0, 0, 0, 1, 0x67]), Some(4));
        assert_eq!(start_code_len(&[0, 0, 1, 0x67]), Some(3));
        assert_eq!(start_code_len(&[0, 1, 0x67]), None);
        assert_eq!(start_code_len(&[]), None);
    }

    #[test]
    fn test_parameter_set_id() {
        // ue(v): 1 -> 0, 010 -> 1, 011 -> 2, 00100 -> 3
        assert_eq!(parameter_set_id(&[0x67, 0x42, 0x00, 0x1e, 0x80]), Some(0));
        assert_eq!(parameter_set_id(&[0x67, 0x42, 0x00, 0x1e, 0x60]), Some(2));
        assert_eq!(parameter_set_id(&[0x68, 0xce, 0x3c, 0x80]), Some(0));
        assert_eq!(parameter_set_id(&[0x68, 0x40]), Some(1));
        assert_eq!(parameter_set_id(&[0x68, 0x20]), Some(3));
    }

    #[test]
    fn test_parameter_set_id_rejects() {
        // Not a parameter set
        assert_eq!(parameter_set_id(&[0x65, 0x80]), None);
        // SPS cut off before its id
        assert_eq!(parameter_set_id(&[0x67, 0x42, 0x00]), None);
        assert_eq!(parameter_set_id(&[]), None);
    }

    #[test]
    fn test_parameter_set_id_skips_emulation_prevention() {
        // profile 0x00, constraints 0x00, 03 escape, level 0x00, then id 1
        assert_eq!(
            parameter_set_id(&[0x67, 0x00, 0x00, 0x03, 0x00, 0x40]),
            Some(1)
        );
    }
}
