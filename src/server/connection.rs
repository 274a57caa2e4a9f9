//! Per-connection session
//!
//! Each viewer connection runs a reader loop (control commands) in its own
//! task and a dedicated writer task that drains the viewer's hub queue into
//! the socket. Either side ending tears the session down.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::error::{Error, ProtocolError, Result};
use crate::hub::{BroadcastHub, ClientEntry, Outbound, StartOutcome};
use crate::protocol::{ControlCommand, ServerNotice};
use crate::session::SessionContext;

use super::config::ServerConfig;
use super::feed::LiveFeed;
use super::handler::RelayHandler;

/// How long the writer gets to send its close frame after the session ends
const WRITER_LINGER: Duration = Duration::from_secs(1);

/// One viewer connection
pub struct ClientSession<H: RelayHandler> {
    ctx: SessionContext,
    config: ServerConfig,
    hub: Arc<BroadcastHub>,
    feed: Arc<LiveFeed<H>>,
    handler: Arc<H>,
    init: ServerNotice,
}

impl<H: RelayHandler> ClientSession<H> {
    pub fn new(
        ctx: SessionContext,
        config: ServerConfig,
        hub: Arc<BroadcastHub>,
        feed: Arc<LiveFeed<H>>,
        handler: Arc<H>,
        init: ServerNotice,
    ) -> Self {
        Self {
            ctx,
            config,
            hub,
            feed,
            handler,
            init,
        }
    }

    /// Upgrade the socket and serve the viewer until it goes away
    pub async fn run(self, socket: TcpStream) -> Result<()> {
        let ws = tokio::time::timeout(self.config.handshake_timeout, accept_async(socket))
            .await
            .map_err(|_| Error::Timeout("WebSocket handshake"))??;

        let client_id = self.ctx.client_id;
        tracing::debug!(client_id, peer = %self.ctx.peer_addr, "WebSocket established");

        if !self.handler.on_connection(&self.ctx).await {
            tracing::info!(client_id, "Connection rejected by handler");
            let (mut sink, _) = ws.split();
            let _ = sink.send(Message::Close(None)).await;
            return Ok(());
        }

        let entry = self.hub.add_client(client_id, self.ctx.peer_addr).await?;
        self.hub.metrics().record_connection_opened();
        entry.notify(self.init.clone());

        let (sink, mut stream) = ws.split();
        let mut writer = tokio::spawn(write_loop(sink, Arc::clone(&entry)));

        let mut writer_done = false;
        let result = tokio::select! {
            joined = &mut writer => {
                writer_done = true;
                match joined {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::warn!(client_id, error = %e, "Writer task failed");
                        Ok(())
                    }
                }
            }
            result = self.read_loop(&mut stream, &entry) => result,
        };

        // Closes the queue; the writer sends a close frame and exits
        self.hub.remove_client(client_id).await;
        if !writer_done && tokio::time::timeout(WRITER_LINGER, &mut writer).await.is_err() {
            writer.abort();
        }

        self.hub.metrics().record_connection_closed();
        self.handler.on_disconnect(&self.ctx).await;

        tracing::debug!(
            client_id,
            duration_ms = self.ctx.duration().as_millis() as u64,
            "Session closed"
        );
        result
    }

    async fn read_loop<S>(&self, stream: &mut S, entry: &ClientEntry) -> Result<()>
    where
        S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
    {
        while let Some(message) = stream.next().await {
            let message = match message {
                Ok(message) => message,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Protocol(_)) => {
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            entry.touch();

            match message {
                Message::Text(text) => match ControlCommand::parse(&text) {
                    Ok(command) => {
                        self.handler.on_command(&self.ctx, command).await;
                        self.apply(command).await;
                    }
                    Err(e) => self.violation(e).await,
                },
                Message::Binary(data) => {
                    self.violation(ProtocolError::UnexpectedBinary(data.len()))
                        .await
                }
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        Ok(())
    }

    async fn apply(&self, command: ControlCommand) {
        let client_id = self.ctx.client_id;
        match command {
            ControlCommand::Start => {
                match self.hub.set_streaming(client_id).await {
                    Ok(StartOutcome::AlreadyStreaming) => {
                        tracing::debug!(client_id, "Already streaming");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(client_id, error = %e, "Cannot start stream");
                        return;
                    }
                }

                if let Err(e) = self.feed.ensure_running().await {
                    tracing::error!(client_id, error = %e, "Failed to start live feed");
                    let _ = self.hub.set_idle(client_id).await;
                    let _ = self
                        .hub
                        .notify(
                            client_id,
                            ServerNotice::Error {
                                message: e.to_string(),
                            },
                        )
                        .await;
                }
            }
            ControlCommand::Stop => {
                if let Err(e) = self.hub.set_idle(client_id).await {
                    tracing::warn!(client_id, error = %e, "Cannot stop stream");
                }
            }
        }
    }

    async fn violation(&self, error: ProtocolError) {
        self.hub.metrics().record_protocol_violation();
        tracing::warn!(client_id = self.ctx.client_id, error = %error, "Protocol violation ignored");
        self.handler.on_protocol_violation(&self.ctx, &error).await;
    }
}

/// Drain the client's queue into the socket, in order
///
/// Ends with a close frame once the queue is closed. A send failure ends
/// the loop with the error.
async fn write_loop<S>(mut sink: S, entry: Arc<ClientEntry>) -> Result<()>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(item) = entry.next_outbound().await {
        match item {
            Outbound::Frame(frame) => {
                let len = frame.len();
                sink.send(Message::Binary(frame.data.to_vec())).await?;
                entry.record_sent(len);
            }
            Outbound::Notice(notice) => {
                tracing::debug!(client_id = entry.id(), notice = notice.name(), "Sending notice");
                sink.send(Message::Text(notice.encode()?)).await?;
                entry.touch();
            }
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    Ok(())
}
