//! Relay viewer
//!
//! Client side of the relay protocol. The decoder and the observer are
//! handed in at construction; a background task owns both, feeds every
//! received unit to the decoder and reports to the observer. `disconnect`
//! hands them back. Receive counters are readable through `stats`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{Error, ProtocolError, Result};
use crate::media::Frame;
use crate::protocol::{ControlCommand, ServerNotice, StreamEndReason};

use super::stats::{StatsTracker, ViewerStats};

/// How long `disconnect` waits for the server's close frame
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Consumes NAL units in arrival order
pub trait FrameDecoder: Send + 'static {
    /// Feed one unit; returns false if it could not be decoded
    fn decode(&mut self, frame: &Frame) -> bool;

    /// Drop decoder state; called when the stream ends
    fn reset(&mut self) {}
}

/// Decoder that accepts everything and keeps nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDecoder;

impl FrameDecoder for NullDecoder {
    fn decode(&mut self, _frame: &Frame) -> bool {
        true
    }
}

/// Receives what the viewer sees
pub trait ViewerObserver: Send + 'static {
    /// Server announced the picture size
    fn on_canvas_ready(&mut self, _width: u32, _height: u32) {}

    /// A unit arrived and was handed to the decoder
    fn on_frame(&mut self, _frame: &Frame, _decoded: bool) {}

    /// The live feed ended; the session is idle again
    fn on_stream_ended(&mut self, _reason: &StreamEndReason) {}

    /// Every notice, including the ones above
    fn on_notice(&mut self, _notice: &ServerNotice) {}

    /// The connection is gone
    fn on_disconnected(&mut self) {}
}

/// Observer events as values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerEvent {
    CanvasReady { width: u32, height: u32 },
    Frame { frame: Frame, decoded: bool },
    StreamEnded(StreamEndReason),
    Error(String),
    Disconnected,
}

/// Forwards everything into a channel
impl ViewerObserver for mpsc::UnboundedSender<ViewerEvent> {
    fn on_canvas_ready(&mut self, width: u32, height: u32) {
        let _ = self.send(ViewerEvent::CanvasReady { width, height });
    }

    fn on_frame(&mut self, frame: &Frame, decoded: bool) {
        let _ = self.send(ViewerEvent::Frame {
            frame: frame.clone(),
            decoded,
        });
    }

    fn on_stream_ended(&mut self, reason: &StreamEndReason) {
        let _ = self.send(ViewerEvent::StreamEnded(reason.clone()));
    }

    fn on_notice(&mut self, notice: &ServerNotice) {
        if let ServerNotice::Error { message } = notice {
            let _ = self.send(ViewerEvent::Error(message.clone()));
        }
    }

    fn on_disconnected(&mut self) {
        let _ = self.send(ViewerEvent::Disconnected);
    }
}

/// Connected viewer
///
/// # Example
/// ```no_run
/// use h264_relay::client::{NullDecoder, RelayViewer, ViewerEvent};
/// use tokio::sync::mpsc;
///
/// # async fn example() -> h264_relay::Result<()> {
/// let (tx, mut events) = mpsc::unbounded_channel();
/// let mut viewer = RelayViewer::connect("ws://127.0.0.1:8080", NullDecoder, tx).await?;
/// viewer.play_stream().await?;
///
/// while let Some(event) = events.recv().await {
///     if let ViewerEvent::Frame { frame, .. } = event {
///         println!("unit {} ({} bytes)", frame.sequence, frame.len());
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct RelayViewer<D: FrameDecoder, O: ViewerObserver> {
    sink: WsSink,
    reader: JoinHandle<(D, O)>,
    stats: Arc<StatsTracker>,
}

impl<D: FrameDecoder, O: ViewerObserver> RelayViewer<D, O> {
    /// Open a WebSocket to the relay and start receiving
    pub async fn connect(endpoint: &str, decoder: D, mut observer: O) -> Result<Self> {
        let (ws, _response) = match connect_async(endpoint).await {
            Ok(connected) => connected,
            Err(e) => {
                observer.on_disconnected();
                return Err(e.into());
            }
        };
        tracing::debug!(endpoint, "Viewer connected");

        let (sink, stream) = ws.split();
        let stats = Arc::new(StatsTracker::new());
        let reader = tokio::spawn(read_loop(
            stream,
            decoder,
            observer,
            Arc::clone(&stats),
        ));
        Ok(Self {
            sink,
            reader,
            stats,
        })
    }

    /// Ask the relay for the live feed
    pub async fn play_stream(&mut self) -> Result<()> {
        self.send_command(ControlCommand::Start).await
    }

    /// Stop receiving the live feed; the connection stays open
    pub async fn stop_stream(&mut self) -> Result<()> {
        self.send_command(ControlCommand::Stop).await
    }

    async fn send_command(&mut self, command: ControlCommand) -> Result<()> {
        tracing::debug!(command = %command, "Sending command");
        self.sink
            .send(Message::Text(command.as_token().to_string()))
            .await?;
        Ok(())
    }

    /// Units, bytes and frame rate received so far
    pub fn stats(&self) -> ViewerStats {
        self.stats.snapshot()
    }

    /// Whether the server side has gone away
    pub fn is_closed(&self) -> bool {
        self.reader.is_finished()
    }

    /// Close the connection and get the decoder and observer back
    pub async fn disconnect(mut self) -> Result<(D, O)> {
        let _ = self.sink.send(Message::Close(None)).await;

        match tokio::time::timeout(CLOSE_TIMEOUT, &mut self.reader).await {
            Ok(Ok(parts)) => Ok(parts),
            Ok(Err(e)) => Err(Error::Io(std::io::Error::other(e))),
            Err(_) => {
                self.reader.abort();
                Err(Error::Timeout("viewer close"))
            }
        }
    }
}

async fn read_loop<S, D, O>(
    mut stream: S,
    mut decoder: D,
    mut observer: O,
    stats: Arc<StatsTracker>,
) -> (D, O)
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
    D: FrameDecoder,
    O: ViewerObserver,
{
    let mut sequence = 0;

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "Viewer connection ended");
                break;
            }
        };

        match message {
            Message::Binary(data) => {
                let len = data.len();
                match Frame::from_annexb(Bytes::from(data), sequence) {
                    Some(frame) => {
                        sequence += 1;
                        stats.record(len);
                        let decoded = decoder.decode(&frame);
                        observer.on_frame(&frame, decoded);
                    }
                    None => {
                        let error = ProtocolError::InvalidFrame(len);
                        tracing::warn!(error = %error, "Ignoring binary message");
                    }
                }
            }
            Message::Text(text) => match ServerNotice::decode(&text) {
                Ok(notice) => {
                    match &notice {
                        ServerNotice::Init { width, height } => {
                            observer.on_canvas_ready(*width, *height)
                        }
                        ServerNotice::StreamEnded { reason } => {
                            decoder.reset();
                            observer.on_stream_ended(reason);
                        }
                        ServerNotice::Error { message } => {
                            tracing::warn!(message = %message, "Relay reported an error");
                        }
                    }
                    observer.on_notice(&notice);
                }
                Err(e) => tracing::warn!(error = %e, "Ignoring text message"),
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }

    observer.on_disconnected();
    (decoder, observer)
}
