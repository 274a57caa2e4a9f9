//! Control channel messages
//!
//! Viewers steer their session with bare text tokens. The server answers
//! with JSON notices in text messages; video always travels as binary.
//!
//! ```text
//! Viewer → Server:  "REQUESTSTREAM" | "STOPSTREAM"
//! Server → Viewer:  {"action":"init","width":960,"height":540}
//!                   {"action":"streamEnded","reason":{"kind":"encoderExited",...}}
//!                   {"action":"error","message":"..."}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Inbound command from a viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Begin receiving the live feed
    Start,
    /// Stop receiving the live feed
    Stop,
}

impl ControlCommand {
    /// Parse a text message
    ///
    /// Only the first whitespace-delimited word is significant and matching
    /// is case-insensitive.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let token = text
            .split_whitespace()
            .next()
            .ok_or(ProtocolError::EmptyCommand)?;

        match token.to_ascii_lowercase().as_str() {
            "requeststream" | "start" | "start-stream" => Ok(ControlCommand::Start),
            "stopstream" | "stop" | "stop-stream" => Ok(ControlCommand::Stop),
            _ => Err(ProtocolError::UnknownCommand(token.to_string())),
        }
    }

    /// Canonical wire token
    pub fn as_token(&self) -> &'static str {
        match self {
            ControlCommand::Start => "REQUESTSTREAM",
            ControlCommand::Stop => "STOPSTREAM",
        }
    }
}

impl FromStr for ControlCommand {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// Why the live feed stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StreamEndReason {
    /// The encoder process exited on its own
    EncoderExited {
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// The encoder could not be started or waited on
    EncoderFailed { message: String },
    /// The encoder's output pipe closed while it kept running
    OutputClosed,
    /// The feed was stopped by the server
    Stopped,
}

impl fmt::Display for StreamEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamEndReason::EncoderExited { code, signal } => match (code, signal) {
                (Some(code), _) => write!(f, "encoder exited with code {}", code),
                (None, Some(signal)) => write!(f, "encoder killed by signal {}", signal),
                (None, None) => write!(f, "encoder exited"),
            },
            StreamEndReason::EncoderFailed { message } => write!(f, "encoder failed: {}", message),
            StreamEndReason::OutputClosed => write!(f, "encoder output closed"),
            StreamEndReason::Stopped => write!(f, "feed stopped"),
        }
    }
}

/// Outbound notice, sent as a JSON text message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ServerNotice {
    /// Sent once after the handshake; the viewer sizes its canvas from it
    Init { width: u32, height: u32 },
    /// The feed ended; the viewer is back to idle
    StreamEnded { reason: StreamEndReason },
    /// A command could not be carried out
    Error { message: String },
}

impl ServerNotice {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidNotice(e.to_string()))
    }

    /// Short name for log output
    pub fn name(&self) -> &'static str {
        match self {
            ServerNotice::Init { .. } => "init",
            ServerNotice::StreamEnded { .. } => "streamEnded",
            ServerNotice::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical_tokens() {
        assert_eq!(
            ControlCommand::parse("REQUESTSTREAM"),
            Ok(ControlCommand::Start)
        );
        assert_eq!(ControlCommand::parse("STOPSTREAM"), Ok(ControlCommand::Stop));
    }

    #[test]
    fn test_parse_aliases_and_case() {
        assert_eq!(ControlCommand::parse("start"), Ok(ControlCommand::Start));
        assert_eq!(
            ControlCommand::parse("Start-Stream"),
            Ok(ControlCommand::Start)
        );
        assert_eq!(ControlCommand::parse("requestStream"), Ok(ControlCommand::Start));
        assert_eq!(ControlCommand::parse("stop-stream"), Ok(ControlCommand::Stop));
        assert_eq!(ControlCommand::parse("STOP"), Ok(ControlCommand::Stop));
    }

    #[test]
    fn test_parse_uses_first_word() {
        assert_eq!(
            ControlCommand::parse("  REQUESTSTREAM now please\n"),
            Ok(ControlCommand::Start)
        );
        assert_eq!(
            "stopstream extra".parse::<ControlCommand>(),
            Ok(ControlCommand::Stop)
        );
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert_eq!(ControlCommand::parse(""), Err(ProtocolError::EmptyCommand));
        assert_eq!(ControlCommand::parse("   "), Err(ProtocolError::EmptyCommand));
        assert_eq!(
            ControlCommand::parse("PAUSE"),
            Err(ProtocolError::UnknownCommand("PAUSE".into()))
        );
    }

    #[test]
    fn test_token_roundtrip() {
        for cmd in [ControlCommand::Start, ControlCommand::Stop] {
            assert_eq!(ControlCommand::parse(cmd.as_token()), Ok(cmd));
        }
    }

    #[test]
    fn test_init_notice_wire_format() {
        let notice = ServerNotice::Init {
            width: 960,
            height: 540,
        };
        let json: serde_json::Value = serde_json::from_str(&notice.encode().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"action": "init", "width": 960, "height": 540})
        );
    }

    #[test]
    fn test_stream_ended_wire_format() {
        let notice = ServerNotice::StreamEnded {
            reason: StreamEndReason::EncoderExited {
                code: Some(0),
                signal: None,
            },
        };
        let json: serde_json::Value = serde_json::from_str(&notice.encode().unwrap()).unwrap();
        assert_eq!(json["action"], "streamEnded");
        assert_eq!(json["reason"]["kind"], "encoderExited");
        assert_eq!(json["reason"]["code"], 0);

        assert_eq!(ServerNotice::decode(&notice.encode().unwrap()), Ok(notice));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            ServerNotice::decode("{\"action\":\"dance\"}"),
            Err(ProtocolError::InvalidNotice(_))
        ));
        assert!(ServerNotice::decode("not json").is_err());
    }

    #[test]
    fn test_end_reason_display() {
        let reason = StreamEndReason::EncoderExited {
            code: None,
            signal: Some(9),
        };
        assert_eq!(reason.to_string(), "encoder killed by signal 9");
        assert_eq!(StreamEndReason::Stopped.to_string(), "feed stopped");
    }
}
