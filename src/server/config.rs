//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::media::annexb::DEFAULT_READ_CHUNK;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// WebSocket upgrade must complete within this time
    pub handshake_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Size of each read from the encoder pipe
    pub read_chunk_size: usize,

    /// Launch the encoder on the first start request instead of at startup
    pub start_feed_on_demand: bool,

    /// How long to wait for the encoder to exit after its output closes
    pub encoder_exit_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 0, // Unlimited
            handshake_timeout: Duration::from_secs(10),
            tcp_nodelay: true, // Important for low latency
            read_chunk_size: DEFAULT_READ_CHUNK,
            start_feed_on_demand: true,
            encoder_exit_grace: Duration::from_secs(2),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// Set the encoder read size (minimum 1 byte)
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    /// Start the encoder together with the server
    pub fn start_feed_eagerly(mut self) -> Self {
        self.start_feed_on_demand = false;
        self
    }

    pub fn encoder_exit_grace(mut self, grace: Duration) -> Self {
        self.encoder_exit_grace = grace;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr.port(), 8080);
        assert!(config.bind_addr.ip().is_unspecified());
        assert_eq!(config.max_connections, 0);
        assert_eq!(config.read_chunk_size, 64 * 1024);
        assert!(config.tcp_nodelay);
        assert!(config.start_feed_on_demand);
    }

    #[test]
    fn test_with_addr() {
        let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
        let config = ServerConfig::with_addr(addr);

        assert_eq!(config.bind_addr.port(), 9090);
    }

    #[test]
    fn test_builder_read_chunk_size_floor() {
        let config = ServerConfig::default().read_chunk_size(0);

        assert_eq!(config.read_chunk_size, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:8081".parse().unwrap();
        let config = ServerConfig::default()
            .bind(addr)
            .max_connections(50)
            .handshake_timeout(Duration::from_secs(5))
            .tcp_nodelay(false)
            .read_chunk_size(4096)
            .encoder_exit_grace(Duration::from_millis(500))
            .start_feed_eagerly();

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
        assert!(!config.tcp_nodelay);
        assert_eq!(config.read_chunk_size, 4096);
        assert_eq!(config.encoder_exit_grace, Duration::from_millis(500));
        assert!(!config.start_feed_on_demand);
    }
}
