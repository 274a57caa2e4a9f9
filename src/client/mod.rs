//! Relay viewer client
//!
//! Connects to a relay over WebSocket, drives the control protocol and
//! hands received units to an injected decoder and observer.

pub mod stats;
pub mod viewer;

pub use stats::ViewerStats;
pub use viewer::{FrameDecoder, NullDecoder, RelayViewer, ViewerEvent, ViewerObserver};
