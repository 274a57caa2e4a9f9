//! Error types
//!
//! Every fallible operation in the crate returns [`Result<T>`], whose error is
//! the unified [`Error`] enum. Each concern has its own sub-enum so callers
//! can match on the failure class without string inspection.

use std::fmt;
use std::io;

use crate::hub::HubError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type
#[derive(Debug)]
pub enum Error {
    /// Socket or pipe I/O failure
    Io(io::Error),
    /// WebSocket transport failure
    WebSocket(tokio_tungstenite::tungstenite::Error),
    /// JSON encoding/decoding of control notices
    Json(serde_json::Error),
    /// Byte-stream framing
    Media(MediaError),
    /// Encoder process lifecycle
    Encoder(EncoderError),
    /// Broadcast hub / client registry
    Hub(HubError),
    /// Control channel
    Protocol(ProtocolError),
    /// Operation did not complete in time
    Timeout(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::WebSocket(e) => write!(f, "WebSocket error: {}", e),
            Error::Json(e) => write!(f, "JSON error: {}", e),
            Error::Media(e) => write!(f, "Media error: {}", e),
            Error::Encoder(e) => write!(f, "Encoder error: {}", e),
            Error::Hub(e) => write!(f, "Hub error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Timeout(what) => write!(f, "Timed out: {}", what),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::WebSocket(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::Encoder(e) => std::error::Error::source(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<MediaError> for Error {
    fn from(e: MediaError) -> Self {
        Error::Media(e)
    }
}

impl From<EncoderError> for Error {
    fn from(e: EncoderError) -> Self {
        Error::Encoder(e)
    }
}

impl From<HubError> for Error {
    fn from(e: HubError) -> Self {
        Error::Hub(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

/// Framing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// Stream ended in the middle of a unit; the fragment was discarded
    Truncated {
        /// Number of buffered bytes thrown away
        discarded: usize,
    },
    /// Data does not begin with an Annex-B start code
    MissingStartCode,
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::Truncated { discarded } => {
                write!(f, "stream truncated, {} bytes discarded", discarded)
            }
            MediaError::MissingStartCode => write!(f, "missing Annex-B start code"),
        }
    }
}

impl std::error::Error for MediaError {}

/// Encoder process errors
#[derive(Debug)]
pub enum EncoderError {
    /// The process could not be launched
    SpawnFailed {
        /// Program that failed to start
        program: String,
        /// Underlying OS error
        source: io::Error,
    },
    /// An encoder is already running for this feed
    AlreadyRunning,
    /// No encoder is running
    NotRunning,
    /// The process was spawned without a stdout pipe
    MissingStdout,
}

impl fmt::Display for EncoderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderError::SpawnFailed { program, source } => {
                write!(f, "failed to spawn '{}': {}", program, source)
            }
            EncoderError::AlreadyRunning => write!(f, "encoder already running"),
            EncoderError::NotRunning => write!(f, "encoder not running"),
            EncoderError::MissingStdout => write!(f, "encoder stdout not captured"),
        }
    }
}

impl std::error::Error for EncoderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EncoderError::SpawnFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Control channel violations
///
/// These are logged and ignored; they never close a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Empty or whitespace-only command
    EmptyCommand,
    /// Command token not in the closed command set
    UnknownCommand(String),
    /// Client sent a binary message on the control path
    UnexpectedBinary(usize),
    /// Server notice could not be decoded (viewer side)
    InvalidNotice(String),
    /// Binary message without a start code (viewer side)
    InvalidFrame(usize),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::EmptyCommand => write!(f, "empty command"),
            ProtocolError::UnknownCommand(cmd) => write!(f, "unknown command: {}", cmd),
            ProtocolError::UnexpectedBinary(len) => {
                write!(f, "unexpected binary message ({} bytes)", len)
            }
            ProtocolError::InvalidNotice(msg) => write!(f, "invalid notice: {}", msg),
            ProtocolError::InvalidFrame(len) => {
                write!(f, "binary message is not an Annex-B unit ({} bytes)", len)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err: Error = EncoderError::AlreadyRunning.into();
        assert_eq!(err.to_string(), "Encoder error: encoder already running");

        let err: Error = ProtocolError::UnknownCommand("PAUSE".into()).into();
        assert_eq!(err.to_string(), "Protocol error: unknown command: PAUSE");

        let err: Error = MediaError::Truncated { discarded: 12 }.into();
        assert_eq!(
            err.to_string(),
            "Media error: stream truncated, 12 bytes discarded"
        );
    }

    #[test]
    fn test_spawn_failure_keeps_source() {
        let err: Error = EncoderError::SpawnFailed {
            program: "missing-encoder".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "not found"),
        }
        .into();

        assert!(err.to_string().contains("missing-encoder"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
