//! Relay server
//!
//! Accepts viewer WebSocket connections, runs the shared live feed and
//! wires both into the broadcast hub.

pub mod config;
pub mod connection;
pub mod feed;
pub mod handler;
pub mod listener;

pub use config::ServerConfig;
pub use connection::ClientSession;
pub use feed::LiveFeed;
pub use handler::{NoopHandler, RelayHandler};
pub use listener::RelayServer;
