//! Relay viewer demo
//!
//! Run with: cargo run --example viewer [URL] [SECONDS]
//!
//! Connects to a relay (default `ws://127.0.0.1:8080`), requests the stream
//! and prints what arrives for SECONDS (default 10).

use std::time::Duration;

use h264_relay::client::{FrameDecoder, RelayViewer, ViewerEvent};
use h264_relay::media::NaluType;
use h264_relay::Frame;
use tokio::sync::mpsc;

/// Counts units and refuses deltas until a key frame has been seen
#[derive(Default)]
struct SyncTracker {
    synced: bool,
    units: u64,
}

impl FrameDecoder for SyncTracker {
    fn decode(&mut self, frame: &Frame) -> bool {
        self.units += 1;
        if frame.is_key() {
            self.synced = true;
        }
        self.synced || frame.is_parameter_set()
    }

    fn reset(&mut self) {
        self.synced = false;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let url = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| "ws://127.0.0.1:8080".to_string());
    let seconds: u64 = match args.get(2) {
        Some(s) => s.parse()?,
        None => 10,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("h264_relay=info".parse()?),
        )
        .init();

    let (tx, mut events) = mpsc::unbounded_channel();
    let mut viewer = RelayViewer::connect(&url, SyncTracker::default(), tx).await?;
    viewer.play_stream().await?;

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Some(ViewerEvent::CanvasReady { width, height }) => {
                    println!("Canvas {}x{}", width, height);
                }
                Some(ViewerEvent::Frame { frame, decoded }) => {
                    if frame.nalu_type != Some(NaluType::Slice) {
                        println!(
                            "#{} {} ({} bytes){}",
                            frame.sequence,
                            frame.nalu_type.map(|t| t.name()).unwrap_or("unknown"),
                            frame.len(),
                            if decoded { "" } else { " [skipped]" }
                        );
                    }
                }
                Some(ViewerEvent::StreamEnded(reason)) => println!("Stream ended: {}", reason),
                Some(ViewerEvent::Error(message)) => eprintln!("Relay error: {}", message),
                Some(ViewerEvent::Disconnected) | None => break,
            },
        }
    }

    viewer.stop_stream().await.ok();
    let stats = viewer.stats();
    let (tracker, _) = viewer.disconnect().await?;
    println!(
        "Received {} units, {} bytes ({:.1} fps at the end)",
        tracker.units, stats.bytes, stats.fps
    );
    Ok(())
}
