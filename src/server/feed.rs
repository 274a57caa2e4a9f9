//! Live feed pump
//!
//! One task per feed: encoder stdout → [`FrameReader`] → [`BroadcastHub`].
//! When the byte stream ends, the pump works out why, tells every streaming
//! viewer once, and then either restarts the encoder (restart policy, or a
//! viewer asked for the stream meanwhile) or goes idle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;

use crate::encoder::{
    EncoderConfig, EncoderEvent, EncoderManager, EncoderOutput, EncoderState, RestartPolicy,
};
use crate::error::Result;
use crate::hub::BroadcastHub;
use crate::media::{FrameReader, FramerEvent};
use crate::protocol::StreamEndReason;

use super::config::ServerConfig;
use super::handler::RelayHandler;

/// Outcome of one encoder run
#[derive(Debug)]
struct RunSummary {
    reason: StreamEndReason,
    truncated: bool,
    keyframes: u64,
}

#[derive(Default)]
struct PumpSlot {
    handle: Option<JoinHandle<()>>,
    /// A pump owns the encoder; new start requests piggyback on it
    active: bool,
}

/// The shared live feed
pub struct LiveFeed<H: RelayHandler> {
    encoder: EncoderManager,
    events: std::sync::Mutex<Option<mpsc::Receiver<EncoderEvent>>>,
    hub: Arc<BroadcastHub>,
    handler: Arc<H>,
    config: ServerConfig,
    restart_policy: RestartPolicy,
    slot: Mutex<PumpSlot>,
    stopping: AtomicBool,
    shutdown: Notify,
}

impl<H: RelayHandler> LiveFeed<H> {
    pub fn new(
        encoder_config: EncoderConfig,
        config: ServerConfig,
        hub: Arc<BroadcastHub>,
        handler: Arc<H>,
    ) -> Self {
        let restart_policy = encoder_config.restart_policy;
        let (encoder, events) = EncoderManager::new(encoder_config);

        Self {
            encoder,
            events: std::sync::Mutex::new(Some(events)),
            hub,
            handler,
            config,
            restart_policy,
            slot: Mutex::new(PumpSlot::default()),
            stopping: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    pub fn encoder(&self) -> &EncoderManager {
        &self.encoder
    }

    /// Whether a pump currently owns the encoder
    pub async fn is_active(&self) -> bool {
        self.slot.lock().await.active
    }

    /// Start the encoder and pump unless they are already running
    ///
    /// Returns true if this call launched the encoder. A spawn failure is
    /// returned to the caller and leaves the feed idle.
    pub async fn ensure_running(self: &Arc<Self>) -> Result<bool> {
        let mut slot = self.slot.lock().await;
        if slot.active {
            return Ok(false);
        }

        self.forward_events();
        self.stopping.store(false, Ordering::SeqCst);
        let output = self.start_encoder().await?;

        let feed = Arc::clone(self);
        slot.handle = Some(tokio::spawn(async move { feed.run_pump(output).await }));
        slot.active = true;
        Ok(true)
    }

    /// Stop the encoder and wait for the pump to finish
    ///
    /// Streaming viewers receive a `Stopped` end notice. Idempotent.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
        self.encoder.stop().await;

        let handle = self.slot.lock().await.handle.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Feed pump task failed");
            }
        }
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Hand encoder events to the handler (first call only)
    fn forward_events(&self) {
        let events = self
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(mut events) = events else {
            return;
        };

        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                tracing::debug!(event = ?event, "Encoder event");
                handler.on_encoder_event(&event).await;
            }
        });
    }

    async fn start_encoder(&self) -> Result<EncoderOutput> {
        let output = self.encoder.start().await?;
        self.hub.metrics().record_encoder_start();
        Ok(output)
    }

    async fn run_pump(self: Arc<Self>, mut output: EncoderOutput) {
        let mut attempt = 0;
        loop {
            let run = self.pump_once(output).await;

            self.hub.metrics().record_stream_ended(run.truncated);
            self.hub.end_stream(run.reason.clone()).await;
            self.handler.on_stream_ended(&run.reason).await;

            if run.keyframes > 0 {
                attempt = 0;
            }
            output = match self.next_output(&mut attempt, &run.reason).await {
                Some(output) => output,
                None => break,
            };
        }
        tracing::debug!("Feed pump finished");
    }

    async fn pump_once(&self, output: EncoderOutput) -> RunSummary {
        let mut reader = FrameReader::with_chunk_size(output, self.config.read_chunk_size);
        let mut truncated = false;
        let mut keyframes = 0;

        while let Some(event) = reader.next_event().await {
            match event {
                FramerEvent::Frame(frame) => {
                    if frame.is_key() {
                        keyframes += 1;
                    }
                    self.hub.publish(frame).await;
                }
                FramerEvent::EndOfSequence { truncated: t } => truncated = t,
            }
        }

        let framer = reader.framer();
        tracing::debug!(
            frames = framer.frames_emitted(),
            discarded = framer.discarded_bytes(),
            skipped = framer.skipped_units(),
            truncated,
            "Encoder output ended"
        );

        let reason = if self.is_stopping() {
            StreamEndReason::Stopped
        } else {
            match self.encoder.wait_for_exit(self.config.encoder_exit_grace).await {
                Some(EncoderState::Exited { code, signal }) => {
                    StreamEndReason::EncoderExited { code, signal }
                }
                Some(EncoderState::Failed) => StreamEndReason::EncoderFailed {
                    message: "encoder could not be reaped".to_string(),
                },
                _ => {
                    tracing::warn!("Encoder closed its output but kept running, killing it");
                    self.encoder.stop().await;
                    StreamEndReason::OutputClosed
                }
            }
        };

        RunSummary {
            reason,
            truncated,
            keyframes,
        }
    }

    /// Decide whether to run the encoder again
    async fn next_output(
        &self,
        attempt: &mut u32,
        reason: &StreamEndReason,
    ) -> Option<EncoderOutput> {
        if *reason != StreamEndReason::Stopped {
            while let Some(delay) = self.restart_policy.delay_for(*attempt) {
                *attempt += 1;
                tracing::info!(attempt = *attempt, delay_ms = delay.as_millis() as u64, "Restarting encoder");

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.shutdown.notified() => {}
                }
                if self.is_stopping() {
                    break;
                }
                match self.start_encoder().await {
                    Ok(output) => return Some(output),
                    Err(e) => tracing::warn!(attempt = *attempt, error = %e, "Encoder restart failed"),
                }
            }
        }

        // Viewers may have asked for the stream while it was ending
        let mut slot = self.slot.lock().await;
        if !self.is_stopping() && self.hub.streaming_count().await > 0 {
            match self.start_encoder().await {
                Ok(output) => return Some(output),
                Err(e) => {
                    tracing::warn!(error = %e, "Encoder relaunch failed");
                    let reason = StreamEndReason::EncoderFailed {
                        message: e.to_string(),
                    };
                    self.hub.end_stream(reason.clone()).await;
                    self.handler.on_stream_ended(&reason).await;
                }
            }
        }
        slot.active = false;
        None
    }
}
