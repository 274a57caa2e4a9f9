//! End-to-end relay tests over real sockets
//!
//! The encoder is a shell script printing a fixed Annex-B stream, so these
//! tests need a Unix `sh` with `printf` and `sleep`.

#![cfg(unix)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use h264_relay::client::{NullDecoder, RelayViewer, ViewerEvent};
use h264_relay::{
    EncoderConfig, NoopHandler, RelayServer, ServerConfig, ServerNotice, StreamEndReason,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

const SPS: &str = r"\000\000\000\001\147\102\000\036";
const PPS: &str = r"\000\000\000\001\150\316\074\200";
const IDR_1: &str = r"\000\000\000\001\145\210\204\041";
const DELTA_1: &str = r"\000\000\000\001\101\232\042\021";
const DELTA_2: &str = r"\000\000\000\001\101\232\063\022";
const IDR_2: &str = r"\000\000\000\001\145\210\204\042";
const DELTA_3: &str = r"\000\000\000\001\101\232\104\023";

/// SPS, PPS, IDR, Δ, Δ, pause, IDR, Δ, exit 0
fn scripted_encoder() -> EncoderConfig {
    let script = format!(
        "printf '{}{}{}{}{}'; sleep 2; printf '{}{}'; exit 0",
        SPS, PPS, IDR_1, DELTA_1, DELTA_2, IDR_2, DELTA_3
    );
    EncoderConfig::new()
        .resolution(640, 360)
        .command("sh", ["-c".to_string(), script])
}

struct TestRelay {
    addr: SocketAddr,
    server: Arc<RelayServer<NoopHandler>>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<h264_relay::Result<()>>,
}

impl TestRelay {
    async fn start(encoder: EncoderConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = ServerConfig::with_addr(addr);
        let server = Arc::new(RelayServer::new(config, encoder, NoopHandler));
        let (shutdown, rx) = oneshot::channel::<()>();

        let task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                server
                    .run_on(listener, async {
                        let _ = rx.await;
                    })
                    .await
            })
        };

        Self {
            addr,
            server,
            shutdown,
            task,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        self.task.await.unwrap().unwrap();
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<ViewerEvent>) -> ViewerEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timed out waiting for viewer event")
        .expect("viewer event channel closed")
}

async fn next_frame_header(events: &mut mpsc::UnboundedReceiver<ViewerEvent>) -> u8 {
    match next_event(events).await {
        ViewerEvent::Frame { frame, .. } => frame.payload()[0],
        other => panic!("expected frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_late_joiner_starts_at_parameter_sets() {
    let relay = TestRelay::start(scripted_encoder()).await;

    let (tx_a, mut events_a) = mpsc::unbounded_channel();
    let mut viewer_a = RelayViewer::connect(&relay.url(), NullDecoder, tx_a)
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut events_a).await,
        ViewerEvent::CanvasReady {
            width: 640,
            height: 360
        }
    );
    viewer_a.play_stream().await.unwrap();

    // The first batch up to the pause; the last delta stays in the framer
    let mut headers_a = Vec::new();
    for _ in 0..4 {
        headers_a.push(next_frame_header(&mut events_a).await);
    }
    assert_eq!(headers_a, vec![0x67, 0x68, 0x65, 0x41]);

    // Join during the pause
    let (tx_b, mut events_b) = mpsc::unbounded_channel();
    let mut viewer_b = RelayViewer::connect(&relay.url(), NullDecoder, tx_b)
        .await
        .unwrap();
    assert!(matches!(
        next_event(&mut events_b).await,
        ViewerEvent::CanvasReady { .. }
    ));
    viewer_b.play_stream().await.unwrap();

    for _ in 0..3 {
        headers_a.push(next_frame_header(&mut events_a).await);
    }
    assert_eq!(headers_a, vec![0x67, 0x68, 0x65, 0x41, 0x41, 0x65, 0x41]);

    let mut headers_b = Vec::new();
    for _ in 0..4 {
        headers_b.push(next_frame_header(&mut events_b).await);
    }
    assert_eq!(headers_b, vec![0x67, 0x68, 0x65, 0x41]);

    let ended = ViewerEvent::StreamEnded(StreamEndReason::EncoderExited {
        code: Some(0),
        signal: None,
    });
    assert_eq!(next_event(&mut events_a).await, ended);
    assert_eq!(next_event(&mut events_b).await, ended);

    // Every unit is 8 bytes including its start code
    let stats_a = viewer_a.stats();
    assert_eq!((stats_a.frames, stats_a.bytes), (7, 56));
    let stats_b = viewer_b.stats();
    assert_eq!((stats_b.frames, stats_b.bytes), (4, 32));

    viewer_a.disconnect().await.unwrap();
    viewer_b.disconnect().await.unwrap();

    let snapshot = relay.server.snapshot();
    assert_eq!(snapshot.frames_published, 7);
    assert_eq!(snapshot.keyframes_published, 2);
    assert_eq!(snapshot.encoder_starts, 1);
    assert_eq!(snapshot.streams_ended, 1);
    assert_eq!(snapshot.connections_total, 2);

    relay.stop().await;
}

#[tokio::test]
async fn test_protocol_violations_are_ignored() {
    let encoder = EncoderConfig::new().command("sh", ["-c", "exit 3"]);
    let relay = TestRelay::start(encoder).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(relay.url()).await.unwrap();

    let init = ws.next().await.unwrap().unwrap();
    let init = ServerNotice::decode(init.to_text().unwrap()).unwrap();
    assert_eq!(
        init,
        ServerNotice::Init {
            width: 960,
            height: 540
        }
    );

    ws.send(Message::Text("HELLO".into())).await.unwrap();
    ws.send(Message::Binary(vec![0, 0, 0, 1, 0x65])).await.unwrap();
    ws.send(Message::Text("requeststream now".into()))
        .await
        .unwrap();

    let ended = tokio::time::timeout(Duration::from_secs(10), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let ended = ServerNotice::decode(ended.to_text().unwrap()).unwrap();
    assert_eq!(
        ended,
        ServerNotice::StreamEnded {
            reason: StreamEndReason::EncoderExited {
                code: Some(3),
                signal: None
            }
        }
    );

    assert_eq!(relay.server.snapshot().protocol_violations, 2);

    ws.close(None).await.unwrap();
    relay.stop().await;
}

#[tokio::test]
async fn test_spawn_failure_reports_error() {
    let encoder = EncoderConfig::new().command("/nonexistent/h264-encoder", Vec::<String>::new());
    let relay = TestRelay::start(encoder).await;

    let (tx, mut events) = mpsc::unbounded_channel();
    let mut viewer = RelayViewer::connect(&relay.url(), NullDecoder, tx)
        .await
        .unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        ViewerEvent::CanvasReady { .. }
    ));

    viewer.play_stream().await.unwrap();
    match next_event(&mut events).await {
        ViewerEvent::Error(message) => assert!(message.contains("nonexistent")),
        other => panic!("expected error notice, got {:?}", other),
    }

    // Back to idle, the connection is still usable
    assert_eq!(relay.server.hub().streaming_count().await, 0);
    assert_eq!(relay.server.hub().client_count().await, 1);

    viewer.disconnect().await.unwrap();
    relay.stop().await;
}
