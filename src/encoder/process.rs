//! Encoder process lifecycle
//!
//! One [`EncoderManager`] owns at most one child process. Its stdout is
//! handed to the caller as [`EncoderOutput`]; stderr is forwarded line by
//! line to `tracing`. A supervisor task reaps the child and reports how it
//! ended.

use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, ReadBuf};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::{EncoderError, Result};

use super::config::EncoderConfig;

/// Lifecycle state of the encoder process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    /// Spawn in progress
    Starting,
    /// Process is alive
    Running,
    /// Process ended and was reaped
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// Process could not be spawned or waited on
    Failed,
}

impl EncoderState {
    pub fn is_active(&self) -> bool {
        matches!(self, EncoderState::Starting | EncoderState::Running)
    }
}

/// Events from the encoder manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderEvent {
    /// Process launched
    Started { pid: Option<u32> },
    /// Process ended on its own
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// Process was killed by [`EncoderManager::stop`]
    Stopped,
    /// Launch or reaping failed
    Failed { message: String },
}

struct Session {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    supervisor: JoinHandle<()>,
}

/// Owns the encoder child process
///
/// # Example
/// ```no_run
/// use h264_relay::encoder::{EncoderConfig, EncoderManager};
///
/// # async fn example() -> h264_relay::error::Result<()> {
/// let (encoder, mut events) = EncoderManager::new(EncoderConfig::default());
///
/// tokio::spawn(async move {
///     while let Some(event) = events.recv().await {
///         println!("Event: {:?}", event);
///     }
/// });
///
/// let stdout = encoder.start().await?;
/// // feed `stdout` to a FrameReader ...
/// encoder.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct EncoderManager {
    config: EncoderConfig,
    state: Arc<watch::Sender<Option<EncoderState>>>,
    session: Mutex<Option<Session>>,
    event_tx: mpsc::Sender<EncoderEvent>,
}

impl EncoderManager {
    /// Create a manager
    ///
    /// Returns the manager and a receiver for lifecycle events. Events are
    /// dropped rather than blocking if the receiver falls behind.
    pub fn new(config: EncoderConfig) -> (Self, mpsc::Receiver<EncoderEvent>) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (state, _) = watch::channel(None);

        let manager = Self {
            config,
            state: Arc::new(state),
            session: Mutex::new(None),
            event_tx,
        };

        (manager, event_rx)
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Launch the encoder with the manager's configuration
    pub async fn start(&self) -> Result<EncoderOutput> {
        let config = self.config.clone();
        self.start_with(&config).await
    }

    /// Launch the encoder with an explicit configuration
    ///
    /// Returns once the process is spawned. Fails with `AlreadyRunning` if a
    /// previous process is still alive.
    pub async fn start_with(&self, config: &EncoderConfig) -> Result<EncoderOutput> {
        let mut session = self.session.lock().await;
        if let Some(existing) = session.as_ref() {
            if !existing.supervisor.is_finished() && self.is_running() {
                return Err(EncoderError::AlreadyRunning.into());
            }
        }
        *session = None;

        self.state.send_replace(Some(EncoderState::Starting));
        tracing::info!(command = %config.command_line(), "Starting encoder");

        let mut child = match Command::new(&config.program)
            .args(config.command_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                self.state.send_replace(Some(EncoderState::Failed));
                self.emit(EncoderEvent::Failed {
                    message: source.to_string(),
                });
                tracing::error!(program = %config.program, error = %source, "Encoder spawn failed");
                return Err(EncoderError::SpawnFailed {
                    program: config.program.clone(),
                    source,
                }
                .into());
            }
        };

        let pid = child.id();
        let Some(stdout) = child.stdout.take() else {
            let _ = child.start_kill();
            self.state.send_replace(Some(EncoderState::Failed));
            return Err(EncoderError::MissingStdout.into());
        };
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr, pid));
        }

        self.state.send_replace(Some(EncoderState::Running));
        self.emit(EncoderEvent::Started { pid });
        tracing::info!(pid = ?pid, "Encoder running");

        let (kill_tx, kill_rx) = oneshot::channel();
        let supervisor = tokio::spawn(supervise(
            child,
            kill_rx,
            Arc::clone(&self.state),
            self.event_tx.clone(),
        ));

        *session = Some(Session {
            pid,
            kill_tx: Some(kill_tx),
            supervisor,
        });

        Ok(EncoderOutput { inner: stdout, pid })
    }

    /// Kill and reap the encoder
    ///
    /// Returns true if a live process was stopped. Safe to call repeatedly.
    pub async fn stop(&self) -> bool {
        let Some(mut session) = self.session.lock().await.take() else {
            return false;
        };

        let was_running = self.is_running();
        if let Some(kill_tx) = session.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        if let Err(e) = session.supervisor.await {
            tracing::warn!(error = %e, "Encoder supervisor task failed");
        }

        if was_running {
            tracing::info!(pid = ?session.pid, "Encoder stopped");
        }
        was_running
    }

    /// Wait up to `grace` for the process to end on its own
    ///
    /// Returns the final state, or `None` if it is still running.
    pub async fn wait_for_exit(&self, grace: Duration) -> Option<EncoderState> {
        let mut rx = self.state.subscribe();
        let waited = tokio::time::timeout(
            grace,
            rx.wait_for(|state| matches!(state, Some(s) if !s.is_active())),
        )
        .await;

        match waited {
            Ok(Ok(state)) => *state,
            _ => None,
        }
    }

    /// Current state; `None` before the first start
    pub fn state(&self) -> Option<EncoderState> {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_some_and(|s| s.is_active())
    }

    /// Process id of the live encoder
    pub async fn pid(&self) -> Option<u32> {
        if !self.is_running() {
            return None;
        }
        self.session.lock().await.as_ref().and_then(|s| s.pid)
    }

    fn emit(&self, event: EncoderEvent) {
        if self.event_tx.try_send(event).is_err() {
            tracing::trace!("Encoder event dropped");
        }
    }
}

async fn supervise(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    state: Arc<watch::Sender<Option<EncoderState>>>,
    event_tx: mpsc::Sender<EncoderEvent>,
) {
    let (status, killed) = tokio::select! {
        status = child.wait() => (status, false),
        _ = kill_rx => {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "Encoder already gone");
            }
            (child.wait().await, true)
        }
    };

    let event = match status {
        Ok(status) => {
            let (code, signal) = exit_parts(status);
            state.send_replace(Some(EncoderState::Exited { code, signal }));
            if killed {
                EncoderEvent::Stopped
            } else {
                tracing::info!(code = ?code, signal = ?signal, "Encoder exited");
                EncoderEvent::Exited { code, signal }
            }
        }
        Err(e) => {
            state.send_replace(Some(EncoderState::Failed));
            tracing::error!(error = %e, "Failed to reap encoder");
            EncoderEvent::Failed {
                message: e.to_string(),
            }
        }
    };

    let _ = event_tx.try_send(event);
}

#[cfg(unix)]
fn exit_parts(status: ExitStatus) -> (Option<i32>, Option<i32>) {
    use std::os::unix::process::ExitStatusExt;
    (status.code(), status.signal())
}

#[cfg(not(unix))]
fn exit_parts(status: ExitStatus) -> (Option<i32>, Option<i32>) {
    (status.code(), None)
}

async fn forward_stderr(stderr: ChildStderr, pid: Option<u32>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::info!(target: "encoder", pid = ?pid, "{}", line),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(target: "encoder", error = %e, "stderr closed");
                break;
            }
        }
    }
}

/// The encoder's stdout byte stream
#[derive(Debug)]
pub struct EncoderOutput {
    inner: ChildStdout,
    pid: Option<u32>,
}

impl EncoderOutput {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

impl AsyncRead for EncoderOutput {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}
