//! Handler context
//!
//! Context passed to handler callbacks containing connection information.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::hub::ClientId;

/// Context passed to [`RelayHandler`](crate::server::RelayHandler) callbacks
///
/// Read-only snapshot of who the connection is. Handlers influence the
/// session only through their return values.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Unique client ID, also the hub registry key
    pub client_id: ClientId,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// When the TCP connection was accepted
    pub connected_at: Instant,
}

impl SessionContext {
    pub fn new(client_id: ClientId, peer_addr: SocketAddr) -> Self {
        Self {
            client_id,
            peer_addr,
            connected_at: Instant::now(),
        }
    }

    /// Time since the connection was accepted
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
