//! # h264-relay
//!
//! Live H.264 relay: runs one encoder process, cuts its Annex-B output into
//! NAL units and fans them out to any number of WebSocket viewers.
//!
//! Each unit travels as one binary WebSocket message, start code included.
//! Viewers steer their session with `REQUESTSTREAM` / `STOPSTREAM` text
//! messages and receive JSON notices (`init`, `streamEnded`, `error`).
//! A viewer that cannot keep up loses its oldest queued frames, and is
//! disconnected if it stays saturated; no other viewer waits for it.
//!
//! # Example
//!
//! ```no_run
//! use h264_relay::{EncoderConfig, NoopHandler, RelayServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> h264_relay::Result<()> {
//!     let config = ServerConfig::default();
//!     let encoder = EncoderConfig::new().frame_rate(30).resolution(960, 540);
//!
//!     let server = RelayServer::new(config, encoder, NoopHandler);
//!     server.run().await
//! }
//! ```

pub mod client;
pub mod encoder;
pub mod error;
pub mod hub;
pub mod media;
pub mod protocol;
pub mod server;
pub mod session;
pub mod stats;

pub use encoder::{EncoderConfig, EncoderEvent, RestartPolicy};
pub use error::{Error, Result};
pub use hub::{BroadcastHub, HubConfig};
pub use media::{Frame, FrameKind, NalFramer};
pub use protocol::{ControlCommand, ServerNotice, StreamEndReason};
pub use server::{NoopHandler, RelayHandler, RelayServer, ServerConfig};
pub use session::SessionContext;
pub use stats::{MetricsSnapshot, RelayMetrics};
