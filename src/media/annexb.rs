//! Annex-B byte-stream framing
//!
//! The encoder writes an unbounded byte stream with no message boundaries.
//! [`NalFramer`] cuts it into one [`Frame`] per NAL unit:
//!
//! ```text
//!  ... 00 00 00 01 67 42 .. 00 00 01 68 ce .. 00 00 00 01 65 88 ..
//!      \______ frame ______/\___ frame ___/\______ frame ...
//! ```
//!
//! A frame runs from its start code up to (not including) the next start
//! code. When `00 00 01` is preceded by a zero byte, that single zero belongs
//! to the following 4-byte start code; any further zeros stay with the
//! previous unit as trailing bytes. The output depends only on the bytes,
//! never on how they were split across reads.

use std::collections::VecDeque;
use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::MediaError;

use super::frame::Frame;

/// Default size of a single read from the encoder pipe
pub const DEFAULT_READ_CHUNK: usize = 64 * 1024;

/// How the underlying byte stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Clean end of file; the trailing unit is complete
    Eof,
    /// Read failure; the trailing unit may be cut short
    Aborted,
}

/// Result of [`NalFramer::finish`]
#[derive(Debug, Default)]
pub struct Flush {
    /// Frames still held by the framer, in order
    pub frames: Vec<Frame>,
    /// A partial unit was thrown away
    pub truncated: bool,
    /// Bytes thrown away at the end
    pub discarded: usize,
}

impl Flush {
    /// The truncation as an error value, for logging
    pub fn error(&self) -> Option<MediaError> {
        self.truncated.then_some(MediaError::Truncated {
            discarded: self.discarded,
        })
    }
}

/// Incremental Annex-B splitter
#[derive(Debug, Default)]
pub struct NalFramer {
    /// Unconsumed bytes; starts at the current unit's start code once synced
    buf: BytesMut,
    /// Start code length of the unit at the head of `buf`
    head: Option<usize>,
    /// Offset from which the next start-code search resumes
    scan_pos: usize,
    next_sequence: u64,
    discarded_bytes: u64,
    skipped_units: u64,
}

impl NalFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the stream
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame, if one is fully buffered
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let marker = match self.head {
                Some(marker) => marker,
                None => self.sync()?,
            };

            let from = self.scan_pos.max(marker);
            let Some(pos) = find_start_code(&self.buf, from) else {
                // A start code beginning in the last two bytes is not yet visible
                self.scan_pos = self.buf.len().saturating_sub(2).max(marker);
                return None;
            };

            let boundary = if pos > marker && self.buf[pos - 1] == 0 {
                pos - 1
            } else {
                pos
            };

            let unit = self.buf.split_to(boundary).freeze();
            let next_marker = pos + 3 - boundary;
            self.head = Some(next_marker);
            self.scan_pos = next_marker;

            if let Some(frame) = self.emit(unit, marker) {
                return Some(frame);
            }
        }
    }

    /// Flush at end of stream
    ///
    /// On a clean EOF the trailing unit is complete and is emitted. On an
    /// aborted stream it is discarded and the flush reports truncation.
    /// The framer is reset afterwards and can take a new stream; sequence
    /// numbers keep counting.
    pub fn finish(&mut self, end: StreamEnd) -> Flush {
        let mut flush = Flush::default();
        while let Some(frame) = self.next_frame() {
            flush.frames.push(frame);
        }

        let remaining = self.buf.split().freeze();
        self.scan_pos = 0;

        match (self.head.take(), end) {
            (Some(marker), StreamEnd::Eof) => {
                if let Some(frame) = self.emit(remaining, marker) {
                    flush.frames.push(frame);
                }
            }
            (Some(_), StreamEnd::Aborted) => {
                flush.truncated = true;
                flush.discarded = remaining.len();
                self.discarded_bytes += remaining.len() as u64;
                tracing::warn!(
                    discarded = remaining.len(),
                    "Stream aborted mid-unit, partial unit dropped"
                );
            }
            (None, _) => {
                if !remaining.is_empty() {
                    self.discarded_bytes += remaining.len() as u64;
                }
            }
        }

        flush
    }

    /// Bytes dropped because they were not inside any unit
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded_bytes
    }

    /// Units skipped because they had a start code but no payload
    pub fn skipped_units(&self) -> u64 {
        self.skipped_units
    }

    /// Frames emitted so far
    pub fn frames_emitted(&self) -> u64 {
        self.next_sequence
    }

    /// Bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Find the first start code; drop whatever precedes it.
    fn sync(&mut self) -> Option<usize> {
        match find_start_code(&self.buf, 0) {
            Some(pos) => {
                let start = if pos > 0 && self.buf[pos - 1] == 0 {
                    pos - 1
                } else {
                    pos
                };
                self.discard(start);
                let marker = pos + 3 - start;
                self.head = Some(marker);
                self.scan_pos = marker;
                Some(marker)
            }
            None => {
                // Keep enough to complete a start code split across reads
                let excess = self.buf.len().saturating_sub(3);
                self.discard(excess);
                None
            }
        }
    }

    fn discard(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.buf.advance(n);
        self.discarded_bytes += n as u64;
        tracing::debug!(bytes = n, "Discarded bytes before first start code");
    }

    fn emit(&mut self, unit: Bytes, marker: usize) -> Option<Frame> {
        if unit.len() <= marker {
            self.skipped_units += 1;
            tracing::trace!("Skipping start code with empty payload");
            return None;
        }
        let frame = Frame::from_unit(unit, marker, self.next_sequence);
        self.next_sequence += 1;
        Some(frame)
    }
}

/// Offset of the first `00 00 01` at or after `from`
fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    if data.len() < 3 {
        return None;
    }
    (from..data.len() - 2).find(|&i| data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1)
}

/// Event produced by [`FrameReader`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramerEvent {
    /// Next unit in stream order
    Frame(Frame),
    /// The stream is over; `truncated` when a partial unit was dropped
    EndOfSequence { truncated: bool },
}

/// Drives a [`NalFramer`] from an async byte source
///
/// Yields frames lazily, then exactly one `EndOfSequence`, then `None`.
pub struct FrameReader<R> {
    reader: R,
    framer: NalFramer,
    chunk: Vec<u8>,
    pending: VecDeque<Frame>,
    end: Option<bool>,
    done: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_chunk_size(reader, DEFAULT_READ_CHUNK)
    }

    pub fn with_chunk_size(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            framer: NalFramer::new(),
            chunk: vec![0; chunk_size.max(1)],
            pending: VecDeque::new(),
            end: None,
            done: false,
        }
    }

    /// Next framing event
    ///
    /// Read errors are not returned: they end the sequence with
    /// `truncated` set when a partial unit was buffered.
    pub async fn next_event(&mut self) -> Option<FramerEvent> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(FramerEvent::Frame(frame));
            }
            if let Some(truncated) = self.end.take() {
                self.done = true;
                return Some(FramerEvent::EndOfSequence { truncated });
            }
            if self.done {
                return None;
            }
            if let Some(frame) = self.framer.next_frame() {
                return Some(FramerEvent::Frame(frame));
            }

            match self.reader.read(&mut self.chunk).await {
                Ok(0) => self.close(StreamEnd::Eof),
                Ok(n) => self.framer.push(&self.chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "Byte stream read failed");
                    self.close(StreamEnd::Aborted);
                }
            }
        }
    }

    pub fn framer(&self) -> &NalFramer {
        &self.framer
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    fn close(&mut self, end: StreamEnd) {
        let flush = self.framer.finish(end);
        if let Some(err) = flush.error() {
            tracing::debug!(error = %err, "End of sequence");
        }
        self.pending.extend(flush.frames);
        self.end = Some(flush.truncated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::FrameKind;

    fn units() -> Vec<Vec<u8>> {
        vec![
            vec![0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1E, 0xAB],
            vec![0, 0, 0, 1, 0x68, 0xCE, 0x38, 0x80],
            vec![0, 0, 1, 0x65, 0x88, 0x84, 0x21, 0x10, 0x33],
            vec![0, 0, 0, 1, 0x41, 0x9A, 0x02],
            vec![0, 0, 1, 0x41, 0x9A, 0x03, 0x04, 0x05],
            vec![0, 0, 0, 1, 0x65, 0x88, 0x80],
            vec![0, 0, 0, 1, 0x41, 0x9B],
        ]
    }

    fn concat(units: &[Vec<u8>]) -> Vec<u8> {
        units.iter().flatten().copied().collect()
    }

    fn frame_chunks<'a>(
        chunks: impl Iterator<Item = &'a [u8]>,
        end: StreamEnd,
    ) -> (Vec<Frame>, Flush) {
        let mut framer = NalFramer::new();
        let mut frames = Vec::new();
        for chunk in chunks {
            framer.push(chunk);
            while let Some(frame) = framer.next_frame() {
                frames.push(frame);
            }
        }
        let flush = framer.finish(end);
        (frames, flush)
    }

    fn frame_all(data: &[u8]) -> Vec<Frame> {
        let (mut frames, flush) = frame_chunks(std::iter::once(data), StreamEnd::Eof);
        frames.extend(flush.frames);
        frames
    }

    #[test]
    fn test_whole_stream() {
        let units = units();
        let frames = frame_all(&concat(&units));

        assert_eq!(frames.len(), units.len());
        for (i, (frame, unit)) in frames.iter().zip(&units).enumerate() {
            assert_eq!(frame.data.as_ref(), unit.as_slice(), "unit {}", i);
            assert_eq!(frame.sequence, i as u64);
        }
    }

    #[test]
    fn test_classification() {
        let kinds: Vec<FrameKind> = frame_all(&concat(&units())).iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                FrameKind::ParameterSet,
                FrameKind::ParameterSet,
                FrameKind::Key,
                FrameKind::Delta,
                FrameKind::Delta,
                FrameKind::Key,
                FrameKind::Delta,
            ]
        );
    }

    #[test]
    fn test_every_fixed_chunk_size() {
        let units = units();
        let stream = concat(&units);

        for size in 1..=stream.len() {
            let (mut frames, flush) = frame_chunks(stream.chunks(size), StreamEnd::Eof);
            frames.extend(flush.frames);
            assert!(!flush.truncated);

            let got: Vec<&[u8]> = frames.iter().map(|f| f.data.as_ref()).collect();
            let want: Vec<&[u8]> = units.iter().map(|u| u.as_slice()).collect();
            assert_eq!(got, want, "chunk size {}", size);
        }
    }

    #[test]
    fn test_irregular_chunks() {
        let units = units();
        let stream = concat(&units);

        // Deterministic pseudo-random split points
        let mut seed: u32 = 0x2545_F491;
        for _ in 0..200 {
            let mut chunks = Vec::new();
            let mut rest = stream.as_slice();
            while !rest.is_empty() {
                seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                let n = ((seed >> 16) as usize % 6 + 1).min(rest.len());
                let (head, tail) = rest.split_at(n);
                chunks.push(head);
                rest = tail;
            }

            let (mut frames, flush) = frame_chunks(chunks.into_iter(), StreamEnd::Eof);
            frames.extend(flush.frames);
            let rebuilt: Vec<u8> = frames.iter().flat_map(|f| f.data.iter().copied()).collect();
            assert_eq!(frames.len(), units.len());
            assert_eq!(rebuilt, stream);
        }
    }

    #[test]
    fn test_trailing_zero_stays_with_previous_unit() {
        // Two zeros then a 4-byte start code: one zero is trailing data
        let stream = [0, 0, 1, 0x41, 0xAA, 0x00, 0x00, 0x00, 0x00, 0x01, 0x41, 0xBB];
        let frames = frame_all(&stream);

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data.as_ref(), &[0, 0, 1, 0x41, 0xAA, 0x00]);
        assert_eq!(frames[1].data.as_ref(), &[0, 0, 0, 1, 0x41, 0xBB]);
        assert_eq!(frames[1].start_code_len(), 4);
    }

    #[test]
    fn test_leading_garbage_is_discarded() {
        let mut stream = vec![0xFF, 0x12, 0x00];
        stream.extend_from_slice(&[0, 0, 0, 1, 0x67, 0x01]);
        stream.extend_from_slice(&[0, 0, 1, 0x68, 0x02]);

        let mut framer = NalFramer::new();
        framer.push(&stream);
        let mut frames = Vec::new();
        while let Some(f) = framer.next_frame() {
            frames.push(f);
        }
        frames.extend(framer.finish(StreamEnd::Eof).frames);

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data.as_ref(), &[0, 0, 0, 1, 0x67, 0x01]);
        assert_eq!(framer.discarded_bytes(), 3);
    }

    #[test]
    fn test_start_code_without_payload_is_skipped() {
        let stream = [0, 0, 1, 0, 0, 1, 0x65, 0x01, 0, 0, 0, 1];
        let mut framer = NalFramer::new();
        framer.push(&stream);

        let mut frames = Vec::new();
        while let Some(f) = framer.next_frame() {
            frames.push(f);
        }
        frames.extend(framer.finish(StreamEnd::Eof).frames);

        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_key());
        assert!(frames.iter().all(|f| f.len() > f.start_code_len()));
        assert_eq!(framer.skipped_units(), 2);
    }

    #[test]
    fn test_no_frame_until_next_start_code() {
        let mut framer = NalFramer::new();
        framer.push(&[0, 0, 0, 1, 0x67, 0x42]);
        assert!(framer.next_frame().is_none());

        framer.push(&[0x00, 0x1E, 0x00, 0x00]);
        assert!(framer.next_frame().is_none());

        framer.push(&[0x01, 0x68]);
        let frame = framer.next_frame().unwrap();
        assert_eq!(frame.data.as_ref(), &[0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1E]);
        assert_eq!(framer.buffered(), 4);
    }

    #[test]
    fn test_aborted_stream_reports_truncation() {
        let stream = concat(&units());
        let cut = stream.len() - 2;

        let (frames, flush) = frame_chunks(std::iter::once(&stream[..cut]), StreamEnd::Aborted);

        assert_eq!(frames.len(), 6);
        assert!(flush.frames.is_empty());
        assert!(flush.truncated);
        assert_eq!(flush.discarded, 4);
        assert_eq!(flush.error(), Some(MediaError::Truncated { discarded: 4 }));
    }

    #[test]
    fn test_finish_resets_for_next_stream() {
        let mut framer = NalFramer::new();
        framer.push(&[0, 0, 1, 0x65, 0x01]);
        let flush = framer.finish(StreamEnd::Eof);
        assert_eq!(flush.frames.len(), 1);

        framer.push(&[0, 0, 1, 0x41, 0x02]);
        let flush = framer.finish(StreamEnd::Eof);
        assert_eq!(flush.frames.len(), 1);
        assert_eq!(flush.frames[0].sequence, 1);
        assert_eq!(framer.frames_emitted(), 2);
    }

    #[test]
    fn test_empty_stream() {
        let mut framer = NalFramer::new();
        let flush = framer.finish(StreamEnd::Eof);
        assert!(flush.frames.is_empty());
        assert!(!flush.truncated);
    }

    #[tokio::test]
    async fn test_reader_chunked_reads() {
        let units = units();
        let stream = concat(&units);
        let (a, rest) = stream.split_at(5);
        let (b, c) = rest.split_at(17);

        let mock = tokio_test::io::Builder::new().read(a).read(b).read(c).build();
        let mut reader = FrameReader::with_chunk_size(mock, 4);

        let mut frames = Vec::new();
        let mut end = None;
        while let Some(event) = reader.next_event().await {
            match event {
                FramerEvent::Frame(f) => frames.push(f),
                FramerEvent::EndOfSequence { truncated } => end = Some(truncated),
            }
        }

        assert_eq!(end, Some(false));
        assert_eq!(frames.len(), units.len());
        assert_eq!(frames[6].data.as_ref(), units[6].as_slice());
    }

    #[tokio::test]
    async fn test_reader_read_error_truncates() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0, 0, 0, 1, 0x67, 0x01, 0, 0, 1, 0x65, 0x88])
            .read_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let mut reader = FrameReader::new(mock);

        assert!(matches!(
            reader.next_event().await,
            Some(FramerEvent::Frame(f)) if f.is_parameter_set()
        ));
        assert_eq!(
            reader.next_event().await,
            Some(FramerEvent::EndOfSequence { truncated: true })
        );
        assert_eq!(reader.next_event().await, None);
    }
}
