//! Session state machine
//!
//! Tracks a viewer connection from WebSocket upgrade to disconnection.
//!
//! ```text
//! Connecting ──Accepted──► Idle ──Start──► Streaming
//!                           ▲                 │
//!                           └──Stop / Ended───┘
//!
//! any ──Close──► Closed (terminal)
//! ```

use std::fmt;

/// Lifecycle state of one viewer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Socket accepted, WebSocket handshake in progress
    Connecting,
    /// Handshake complete, not receiving frames
    Idle,
    /// Receiving frames from the live feed
    Streaming,
    /// Connection gone; nothing more is sent
    Closed,
}

/// Input to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// WebSocket handshake finished
    Accepted,
    /// Client asked for the stream
    Start,
    /// Client asked to stop the stream
    Stop,
    /// The feed ended underneath the client
    StreamEnded,
    /// Socket closed or session torn down
    Close,
}

/// Event not allowed in the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: SessionState,
    pub event: SessionEvent,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event {:?} not allowed in state {:?}", self.event, self.from)
    }
}

impl std::error::Error for InvalidTransition {}

impl SessionState {
    /// Compute the state after `event`
    ///
    /// Repeated start/stop requests are no-ops. Closed absorbs every event.
    pub fn apply(self, event: SessionEvent) -> Result<SessionState, InvalidTransition> {
        use SessionEvent::*;
        use SessionState::*;

        match (self, event) {
            (_, Close) => Ok(Closed),
            (Closed, _) => Ok(Closed),
            (Connecting, Accepted) => Ok(Idle),
            (Idle, Start) | (Streaming, Start) => Ok(Streaming),
            (Streaming, Stop) | (Idle, Stop) => Ok(Idle),
            (Streaming, StreamEnded) | (Idle, StreamEnded) => Ok(Idle),
            (from, event) => Err(InvalidTransition { from, event }),
        }
    }

    /// Whether frames should be delivered in this state
    pub fn is_streaming(&self) -> bool {
        matches!(self, SessionState::Streaming)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Idle => "idle",
            SessionState::Streaming => "streaming",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
