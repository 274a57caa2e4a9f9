//! Live relay demo
//!
//! Run with: cargo run --example live_relay [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example live_relay                    # binds to 0.0.0.0:8080
//!   cargo run --example live_relay localhost          # binds to 127.0.0.1:8080
//!   cargo run --example live_relay 127.0.0.1:9000     # binds to 127.0.0.1:9000
//!
//! The encoder is the default GStreamer test pipeline (`gst-launch-1.0`
//! with x264enc), started when the first viewer sends `REQUESTSTREAM`.
//!
//! ## Watching
//!
//!   cargo run --example viewer ws://127.0.0.1:8080
//!
//! Any WebSocket client works: send `REQUESTSTREAM`, receive one binary
//! message per NAL unit, send `STOPSTREAM` to pause.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use h264_relay::encoder::EncoderEvent;
use h264_relay::error::ProtocolError;
use h264_relay::{
    ControlCommand, EncoderConfig, HubConfig, RelayHandler, RelayServer, RestartPolicy,
    ServerConfig, SessionContext, StreamEndReason,
};

/// Handler that logs events and keeps a few counters
struct LoggingHandler {
    connections: AtomicU64,
    commands: AtomicU64,
    violations: AtomicU64,
}

impl LoggingHandler {
    fn new() -> Self {
        Self {
            connections: AtomicU64::new(0),
            commands: AtomicU64::new(0),
            violations: AtomicU64::new(0),
        }
    }

    fn print_stats(&self) {
        println!(
            "Stats: connections={} commands={} violations={}",
            self.connections.load(Ordering::Relaxed),
            self.commands.load(Ordering::Relaxed),
            self.violations.load(Ordering::Relaxed),
        );
    }
}

impl RelayHandler for LoggingHandler {
    async fn on_connection(&self, ctx: &SessionContext) -> bool {
        self.connections.fetch_add(1, Ordering::Relaxed);
        println!("[{}] New viewer from {}", ctx.client_id, ctx.peer_addr);
        true
    }

    async fn on_command(&self, ctx: &SessionContext, command: ControlCommand) {
        self.commands.fetch_add(1, Ordering::Relaxed);
        println!("[{}] {}", ctx.client_id, command);
    }

    async fn on_protocol_violation(&self, ctx: &SessionContext, error: &ProtocolError) {
        self.violations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(client_id = ctx.client_id, error = %error, "Ignored message");
    }

    async fn on_disconnect(&self, ctx: &SessionContext) {
        println!(
            "[{}] Disconnected after {:.1}s",
            ctx.client_id,
            ctx.duration().as_secs_f64()
        );
    }

    async fn on_stream_ended(&self, reason: &StreamEndReason) {
        println!("Stream ended: {}", reason);
        self.print_stats();
    }

    async fn on_encoder_event(&self, event: &EncoderEvent) {
        match event {
            EncoderEvent::Started { pid } => println!("Encoder started (pid {:?})", pid),
            EncoderEvent::Failed { message } => eprintln!("Encoder failed: {}", message),
            other => tracing::debug!(event = ?other, "Encoder event"),
        }
    }
}

/// Parse bind address from command line argument.
///
/// Accepts "localhost", "localhost:PORT", "IP" and "IP:PORT".
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    const DEFAULT_PORT: u16 = 8080;

    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: live_relay [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:8080)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let config = match args.get(1) {
        Some(addr_str) => match parse_bind_addr(addr_str) {
            Ok(addr) => ServerConfig::with_addr(addr),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => ServerConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("h264_relay=debug".parse()?)
                .add_directive("encoder=info".parse()?)
                .add_directive("live_relay=debug".parse()?),
        )
        .init();

    let encoder = EncoderConfig::new()
        .frame_rate(30)
        .resolution(960, 540)
        .bitrate(2500)
        .restart_policy(RestartPolicy::Backoff {
            max_restarts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        });

    println!("Starting relay on ws://{}", config.bind_addr);
    println!("Encoder: {}", encoder.command_line());
    println!();

    let hub_config = HubConfig::new().queue_capacity(256).gop_replay(true);
    let server = RelayServer::with_hub_config(config, encoder, LoggingHandler::new(), hub_config);

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let snapshot = server.snapshot();
    println!(
        "Relayed {} frames ({} bytes), dropped {}, {} viewers total",
        snapshot.frames_published,
        snapshot.bytes_published,
        snapshot.frames_dropped,
        snapshot.connections_total
    );
    Ok(())
}
