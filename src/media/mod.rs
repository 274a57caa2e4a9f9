//! Media handling for the relay
//!
//! This module provides:
//! - H.264 NAL header inspection and classification
//! - Annex-B byte-stream framing
//! - GOP caching for late-joiner support

pub mod annexb;
pub mod frame;
pub mod gop;
pub mod h264;

pub use annexb::{Flush, FrameReader, FramerEvent, NalFramer, StreamEnd};
pub use frame::Frame;
pub use gop::GopCache;
pub use h264::{FrameKind, NaluType};
