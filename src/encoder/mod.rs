//! External encoder process management
//!
//! The relay does not encode video itself. It launches an encoder (by
//! default a GStreamer pipeline) that writes an Annex-B H.264 byte stream to
//! stdout, and supervises it.

pub mod config;
pub mod process;

pub use config::{EncoderConfig, RestartPolicy, DEFAULT_PROGRAM};
pub use process::{EncoderEvent, EncoderManager, EncoderOutput, EncoderState};
