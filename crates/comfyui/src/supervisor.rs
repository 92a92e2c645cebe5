//! Connection supervisor for the single worker WebSocket.
//!
//! [`ConnectionSupervisor`] owns the streaming connection to the worker.
//! [`start`](ConnectionSupervisor::start) spawns one long-lived task that
//! connects, processes frames, and reconnects after a fixed delay whenever
//! the connection drops. [`stop`](ConnectionSupervisor::stop) cancels that
//! task and waits for it to release the socket.
//!
//! The connection state is observable through a `watch` channel but only
//! the supervisor task writes it.

use std::sync::Arc;
use std::time::Duration;

use genforge_events::EventBus;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::ComfyUIClient;
use crate::processor::{process_messages, FrameHandler, StreamEnd};
use crate::reconnect::{wait_before_retry, ReconnectPolicy};

/// Default bound on how long [`ConnectionSupervisor::stop`] waits.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of the streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
    Lost,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Lost => "lost",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns the worker WebSocket and its reconnect loop.
pub struct ConnectionSupervisor {
    client: ComfyUIClient,
    reconnect: ReconnectPolicy,
    shutdown_timeout: Duration,
    bus: Arc<EventBus>,
    handler: Arc<dyn FrameHandler>,
    state_tx: watch::Sender<ConnectionState>,
    /// The running connection task, if any. Held across start/stop so the
    /// two never interleave.
    task: Mutex<Option<RunningTask>>,
}

struct RunningTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ConnectionSupervisor {
    /// `shutdown_timeout` bounds how long [`stop`](Self::stop) waits for
    /// the task before aborting it.
    pub fn new(
        client: ComfyUIClient,
        reconnect: ReconnectPolicy,
        shutdown_timeout: Duration,
        bus: Arc<EventBus>,
        handler: Arc<dyn FrameHandler>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            client,
            reconnect,
            shutdown_timeout,
            bus,
            handler,
            state_tx,
            task: Mutex::new(None),
        })
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Spawn the connect-receive-reconnect task.
    ///
    /// Returns `false` without doing anything if the task is already
    /// running, so repeated calls never open a second socket.
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut slot = self.task.lock().await;
        if let Some(running) = slot.as_ref() {
            if !running.handle.is_finished() {
                tracing::debug!("Connection supervisor already running");
                return false;
            }
        }

        let cancel = CancellationToken::new();
        let this = Arc::clone(self);
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            tracing::info!(ws_url = %this.client.ws_url(), "Starting connection task");
            this.run(task_cancel).await;
            tracing::info!("Connection task exited");
        });

        *slot = Some(RunningTask { cancel, handle });
        true
    }

    /// Cancel the connection task and wait for it to release the socket.
    ///
    /// Waits up to the shutdown timeout, then aborts the task. Always
    /// leaves the state `Disconnected`.
    pub async fn stop(&self) {
        let mut slot = self.task.lock().await;
        if let Some(RunningTask { cancel, mut handle }) = slot.take() {
            tracing::info!("Stopping connection task");
            cancel.cancel();
            if tokio::time::timeout(self.shutdown_timeout, &mut handle)
                .await
                .is_err()
            {
                tracing::warn!("Connection task did not exit in time, aborting");
                handle.abort();
                let _ = handle.await;
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }

    // ---- private helpers ----

    /// Core loop: connect -> process messages -> wait -> reconnect.
    async fn run(&self, cancel: CancellationToken) {
        let delay = self.reconnect.delay;
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            if !self.begin_connect() {
                tracing::warn!(state = %self.state(), "Connect requested while not idle, skipping");
                break;
            }

            attempt += 1;
            let connected = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.client.connect() => result,
            };

            match connected {
                Ok(conn) => {
                    self.set_state(ConnectionState::Open);
                    tracing::info!(client_id = %conn.client_id, attempt, "Worker connection ready");
                    attempt = 0;

                    let mut ws_stream = conn.ws_stream;
                    let end =
                        process_messages(&mut ws_stream, &self.bus, self.handler.as_ref(), &cancel)
                            .await;

                    if end == StreamEnd::Cancelled {
                        self.set_state(ConnectionState::Closing);
                        let _ = ws_stream.close(None).await;
                        break;
                    }

                    self.set_state(ConnectionState::Lost);
                    tracing::warn!(reason = ?end, "Worker connection lost");
                    drop(ws_stream);
                }
                Err(e) => {
                    self.set_state(ConnectionState::Lost);
                    tracing::warn!(error = %e, attempt, "Connection attempt failed");
                }
            }

            self.set_state(ConnectionState::Disconnected);
            tracing::info!(delay_ms = delay.as_millis() as u64, "Reconnecting to worker");
            if !wait_before_retry(delay, &cancel).await {
                break;
            }
        }

        self.set_state(ConnectionState::Disconnected);
    }

    /// Atomically move `Disconnected | Lost -> Connecting`.
    ///
    /// Returns `false` (and changes nothing) while `Connecting`, `Open`,
    /// or `Closing`.
    fn begin_connect(&self) -> bool {
        self.state_tx.send_if_modified(|state| match state {
            ConnectionState::Disconnected | ConnectionState::Lost => {
                *state = ConnectionState::Connecting;
                true
            }
            _ => false,
        })
    }

    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            tracing::debug!(from = %state, to = %next, "Connection state change");
            *state = next;
            true
        });
    }
}
