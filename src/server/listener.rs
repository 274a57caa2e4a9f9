//! Relay server listener
//!
//! Handles the TCP accept loop and spawns a session per viewer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::encoder::EncoderConfig;
use crate::error::Result;
use crate::hub::{BroadcastHub, ClientId, HubConfig};
use crate::protocol::ServerNotice;
use crate::server::config::ServerConfig;
use crate::server::connection::ClientSession;
use crate::server::feed::LiveFeed;
use crate::server::handler::RelayHandler;
use crate::session::SessionContext;
use crate::stats::{MetricsSnapshot, RelayMetrics};

/// Live H.264 relay server
pub struct RelayServer<H: RelayHandler> {
    config: ServerConfig,
    handler: Arc<H>,
    hub: Arc<BroadcastHub>,
    feed: Arc<LiveFeed<H>>,
    init: ServerNotice,
    next_client_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl<H: RelayHandler> RelayServer<H> {
    /// Create a server with the default hub configuration
    pub fn new(config: ServerConfig, encoder_config: EncoderConfig, handler: H) -> Self {
        Self::with_hub_config(config, encoder_config, handler, HubConfig::default())
    }

    /// Create a server with custom queueing and join behavior
    pub fn with_hub_config(
        config: ServerConfig,
        encoder_config: EncoderConfig,
        handler: H,
        hub_config: HubConfig,
    ) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        let handler = Arc::new(handler);
        let metrics = Arc::new(RelayMetrics::new());
        let hub = Arc::new(BroadcastHub::with_metrics(hub_config, metrics));
        let init = ServerNotice::Init {
            width: encoder_config.width,
            height: encoder_config.height,
        };
        let feed = Arc::new(LiveFeed::new(
            encoder_config,
            config.clone(),
            Arc::clone(&hub),
            Arc::clone(&handler),
        ));

        Self {
            config,
            handler,
            hub,
            feed,
            init,
            next_client_id: AtomicU64::new(1),
            connection_semaphore,
        }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn feed(&self) -> &Arc<LiveFeed<H>> {
        &self.feed
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        self.hub.metrics()
    }

    /// Point-in-time relay counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.hub.metrics().snapshot()
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.run_on(listener, shutdown).await
    }

    /// Serve on an already bound listener
    ///
    /// On shutdown the encoder is stopped and streaming viewers are told the
    /// stream ended.
    pub async fn run_on<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, encoder = %self.feed.encoder().config().command_line(), "Relay server listening");

        if !self.config.start_feed_on_demand {
            self.feed.ensure_running().await?;
        }

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        };

        self.feed.stop().await;
        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let client_id: ClientId = self.next_client_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(client_id, peer = %peer_addr, "New connection");

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }

        let session = ClientSession::new(
            SessionContext::new(client_id, peer_addr),
            self.config.clone(),
            Arc::clone(&self.hub),
            Arc::clone(&self.feed),
            Arc::clone(&self.handler),
            self.init.clone(),
        );

        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = session.run(socket).await {
                tracing::debug!(client_id, error = %e, "Connection error");
            }
            tracing::debug!(client_id, "Connection closed");
        });
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}
