//! Relay handler trait
//!
//! Applications observe the relay by implementing [`RelayHandler`]. Every
//! method has a default, so implementors override only what they need.

use std::future::Future;

use crate::encoder::EncoderEvent;
use crate::error::ProtocolError;
use crate::protocol::{ControlCommand, StreamEndReason};
use crate::session::SessionContext;

/// Callbacks invoked by the relay server
///
/// # Example
/// ```no_run
/// use h264_relay::{RelayHandler, SessionContext};
///
/// struct Logger;
///
/// impl RelayHandler for Logger {
///     async fn on_connection(&self, ctx: &SessionContext) -> bool {
///         println!("viewer {} from {}", ctx.client_id, ctx.peer_addr);
///         true
///     }
/// }
/// ```
pub trait RelayHandler: Send + Sync + 'static {
    /// WebSocket handshake completed; return false to reject the viewer
    fn on_connection(&self, _ctx: &SessionContext) -> impl Future<Output = bool> + Send {
        async { true }
    }

    /// A control command was received (before it is applied)
    fn on_command(
        &self,
        _ctx: &SessionContext,
        _command: ControlCommand,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// A message could not be understood; the connection stays open
    fn on_protocol_violation(
        &self,
        _ctx: &SessionContext,
        _error: &ProtocolError,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// The viewer is gone and has been removed from the hub
    fn on_disconnect(&self, _ctx: &SessionContext) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// The live feed ended and streaming viewers were notified
    fn on_stream_ended(&self, _reason: &StreamEndReason) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Encoder lifecycle event
    fn on_encoder_event(&self, _event: &EncoderEvent) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// Handler that accepts everyone and ignores all events
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl RelayHandler for NoopHandler {}
