//! Viewer control protocol

pub mod control;

pub use control::{ControlCommand, ServerNotice, StreamEndReason};
