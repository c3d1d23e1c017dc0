//! A running worker and the tasks that service its streams.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ProtocolConfig, WorkerConfig};
use crate::correlator::{PendingResponse, RequestContext, TaskCorrelator};
use crate::metrics;
use crate::protocol::{FrameDecoder, FrameEncoder, FrameWriter, InboundMessage, RequestEnvelope};
use crate::supervisor::{ExitWatch, LaunchSpec, ProcessHandle, ProcessSupervisor, StdioMode};

use super::error::WorkerError;
use super::state::WorkerState;

/// How long the stdout reader may keep running after the process exited.
/// Descendants of the worker can hold the pipe open.
const READER_DRAIN: Duration = Duration::from_secs(1);

const READ_BUFFER_SIZE: usize = 8192;

/// Timing and framing settings of a session.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub request_timeout: Duration,
    pub startup_timeout: Duration,
    pub shutdown_grace: Duration,
    pub protocol: ProtocolConfig,
}

impl WorkerOptions {
    pub fn from_config(worker: &WorkerConfig, protocol: &ProtocolConfig) -> Self {
        Self {
            request_timeout: worker.request_timeout(),
            startup_timeout: worker.startup_timeout(),
            shutdown_grace: worker.shutdown_grace(),
            protocol: protocol.clone(),
        }
    }
}

/// How the worker ended after `shutdown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The worker exited on its own within the grace period.
    Exited { code: Option<i32> },
    /// The grace period elapsed and the worker was killed.
    Killed { code: Option<i32> },
}

impl ShutdownOutcome {
    pub fn was_killed(&self) -> bool {
        matches!(self, Self::Killed { .. })
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Exited { code } | Self::Killed { code } => *code,
        }
    }
}

/// One persistent worker process serving a batch of requests.
pub struct WorkerSession {
    name: String,
    handle: ProcessHandle,
    state: Arc<watch::Sender<WorkerState>>,
    writer: Mutex<FrameWriter>,
    correlator: TaskCorrelator,
    options: WorkerOptions,
}

impl WorkerSession {
    /// Spawns the worker and waits for its ready sentinel.
    pub async fn start(
        supervisor: &ProcessSupervisor,
        spec: &LaunchSpec,
        options: WorkerOptions,
    ) -> Result<Self, WorkerError> {
        let state = Arc::new(watch::channel(WorkerState::Idle).0);
        let name = spec.display_name();
        transition(&name, &state, WorkerState::Starting);

        let mut handle = match supervisor.spawn(spec, StdioMode::Interactive) {
            Ok(handle) => handle,
            Err(e) => {
                transition(&name, &state, WorkerState::Terminated);
                metrics::WORKER_SESSIONS
                    .with_label_values(&["launch_failed"])
                    .inc();
                return Err(e.into());
            }
        };
        let streams = handle
            .take_stdin()
            .and_then(|stdin| handle.take_stdout().map(|stdout| (stdin, stdout)));
        let (stdin, stdout) = match streams {
            Ok(streams) => streams,
            Err(e) => {
                handle.kill();
                transition(&name, &state, WorkerState::Terminated);
                return Err(e.into());
            }
        };

        let correlator = TaskCorrelator::new(name.clone());
        let (ready_tx, ready_rx) = oneshot::channel();
        let reader = tokio::spawn(read_stdout(
            name.clone(),
            stdout,
            FrameDecoder::new(&options.protocol),
            correlator.clone(),
            ready_tx,
        ));
        tokio::spawn(watch_termination(
            name.clone(),
            handle.exit_watch(),
            reader,
            correlator.clone(),
            state.clone(),
        ));

        let session = Self {
            writer: Mutex::new(FrameWriter::new(
                stdin,
                FrameEncoder::new(&options.protocol),
            )),
            name,
            handle,
            state,
            correlator,
            options,
        };
        session.await_ready(ready_rx).await?;
        Ok(session)
    }

    async fn await_ready(&self, ready_rx: oneshot::Receiver<()>) -> Result<(), WorkerError> {
        let mut exit = self.handle.exit_watch();
        let result = tokio::select! {
            biased;
            ready = ready_rx => match ready {
                Ok(()) => Ok(()),
                // stdout closed without the sentinel
                Err(_) => {
                    let code = match tokio::time::timeout(self.options.shutdown_grace, exit.exited()).await {
                        Ok(status) => status.code,
                        Err(_) => {
                            self.handle.kill();
                            exit.exited().await.code
                        }
                    };
                    Err(WorkerError::ExitedBeforeReady { name: self.name.clone(), code })
                }
            },
            status = exit.exited() => Err(WorkerError::ExitedBeforeReady {
                name: self.name.clone(),
                code: status.code,
            }),
            _ = tokio::time::sleep(self.options.startup_timeout) => {
                self.handle.kill();
                Err(WorkerError::StartupTimeout {
                    name: self.name.clone(),
                    timeout_ms: self.options.startup_timeout.as_millis() as u64,
                })
            }
        };

        match result {
            Ok(()) => {
                transition(&self.name, &self.state, WorkerState::Ready);
                metrics::WORKER_SESSIONS.with_label_values(&["ready"]).inc();
                info!(worker = %self.name, pid = ?self.handle.pid(), "Worker is ready");
                Ok(())
            }
            Err(e) => {
                let label = match e {
                    WorkerError::StartupTimeout { .. } => "startup_timeout",
                    _ => "exited",
                };
                metrics::WORKER_SESSIONS.with_label_values(&[label]).inc();
                error!(worker = %self.name, "Worker failed to start: {}", e);
                transition(&self.name, &self.state, WorkerState::Terminated);
                Err(e)
            }
        }
    }

    /// Registers a request and writes it to the worker.
    ///
    /// The request is registered before it is written, so a response can never
    /// arrive for an id the correlator does not know yet.
    pub async fn submit(
        &self,
        id: &str,
        payload: impl Serialize,
        context: RequestContext,
    ) -> Result<PendingResponse, WorkerError> {
        let state = self.state();
        if !state.accepts_requests() {
            return Err(WorkerError::NotAccepting { state });
        }
        if !self.handle.is_alive() {
            return Err(WorkerError::NotAlive {
                name: self.name.clone(),
            });
        }

        let envelope = RequestEnvelope::new(id, payload)?;
        let pending = self
            .correlator
            .register(id, context, self.options.request_timeout)?;

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.send(&envelope).await {
            drop(writer);
            error!(worker = %self.name, request_id = %id, "Failed to send request: {}", e);
            self.correlator.cancel(id);
            return Err(e.into());
        }
        debug!(worker = %self.name, request_id = %id, "Request sent");
        Ok(pending)
    }

    /// Signals end of input. Pending requests may still complete.
    pub async fn drain(&self) {
        transition(&self.name, &self.state, WorkerState::Draining);
        let mut writer = self.writer.lock().await;
        if writer.is_closed() {
            return;
        }
        match writer.close().await {
            Ok(()) => info!(worker = %self.name, "Closed worker input"),
            // The worker may already be gone.
            Err(e) => debug!(worker = %self.name, "Closing worker input failed: {}", e),
        }
    }

    /// Drains, lets outstanding requests settle, then waits up to the grace
    /// period for the worker to exit before killing it. Returns once the
    /// session is `Terminated`.
    ///
    /// Outstanding requests are bounded by their own deadlines.
    pub async fn shutdown(&self) -> ShutdownOutcome {
        self.drain().await;

        let mut exit = self.handle.exit_watch();
        tokio::select! {
            _ = self.correlator.wait_idle() => {}
            _ = exit.exited() => {}
        }

        let outcome = match tokio::time::timeout(self.options.shutdown_grace, exit.exited()).await
        {
            Ok(status) => ShutdownOutcome::Exited { code: status.code },
            Err(_) => {
                warn!(
                    worker = %self.name,
                    grace_ms = self.options.shutdown_grace.as_millis() as u64,
                    "Worker did not exit within the grace period, killing it"
                );
                self.handle.kill();
                ShutdownOutcome::Killed {
                    code: exit.exited().await.code,
                }
            }
        };

        self.wait_terminated().await;
        outcome
    }

    /// Waits until the process exited and every pending request was failed.
    pub async fn wait_terminated(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| s.is_terminal()).await;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.pid()
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }

    pub fn forced_kills(&self) -> u32 {
        self.handle.forced_kills()
    }

    pub fn exit_watch(&self) -> ExitWatch {
        self.handle.exit_watch()
    }

    pub fn correlator(&self) -> &TaskCorrelator {
        &self.correlator
    }

    pub fn pending_count(&self) -> usize {
        self.correlator.pending_count()
    }
}

impl Drop for WorkerSession {
    fn drop(&mut self) {
        if self.handle.is_alive() {
            warn!(worker = %self.name, "Worker session dropped while running, killing worker");
            self.handle.kill();
        }
    }
}

impl std::fmt::Debug for WorkerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSession")
            .field("name", &self.name)
            .field("pid", &self.handle.pid())
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

fn transition(name: &str, state: &watch::Sender<WorkerState>, next: WorkerState) -> bool {
    state.send_if_modified(|current| {
        if current.can_transition_to(next) {
            debug!(worker = %name, from = %current, to = %next, "Worker state changed");
            *current = next;
            true
        } else {
            false
        }
    })
}

async fn read_stdout(
    name: String,
    mut stdout: ChildStdout,
    mut decoder: FrameDecoder,
    correlator: TaskCorrelator,
    ready_tx: oneshot::Sender<()>,
) {
    let mut ready_tx = Some(ready_tx);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(worker = %name, "Failed to read worker stdout: {}", e);
                break;
            }
        };
        for message in decoder.decode(&buf[..n]) {
            dispatch(&name, message, &correlator, &mut ready_tx).await;
        }
    }
    if let Some(message) = decoder.finish() {
        dispatch(&name, message, &correlator, &mut ready_tx).await;
    }
    debug!(worker = %name, "Worker stdout closed");
}

async fn dispatch(
    name: &str,
    message: InboundMessage,
    correlator: &TaskCorrelator,
    ready_tx: &mut Option<oneshot::Sender<()>>,
) {
    match message {
        InboundMessage::Ready => match ready_tx.take() {
            Some(tx) => {
                let _ = tx.send(());
            }
            None => debug!(worker = %name, "Ignoring repeated ready sentinel"),
        },
        InboundMessage::Data(envelope) => {
            correlator.resolve(envelope).await;
        }
        InboundMessage::Log(text) => debug!(worker = %name, "stdout: {}", text),
        InboundMessage::Malformed { reason } => {
            warn!(worker = %name, "Malformed data message: {}", reason);
            metrics::MALFORMED_MESSAGES.inc();
        }
    }
}

/// Fails whatever is still pending once the process is gone.
async fn watch_termination(
    name: String,
    mut exit: ExitWatch,
    reader: JoinHandle<()>,
    correlator: TaskCorrelator,
    state: Arc<watch::Sender<WorkerState>>,
) {
    let status = exit.exited().await;

    // Responses written just before exit are still in the pipe.
    let reader_abort = reader.abort_handle();
    if tokio::time::timeout(READER_DRAIN, reader).await.is_err() {
        debug!(worker = %name, "Worker stdout still open after exit, abandoning reader");
        reader_abort.abort();
    }

    let failed = correlator.fail_all(&format!("worker exited with code {:?}", status.code));
    transition(&name, &state, WorkerState::Terminated);
    info!(worker = %name, code = ?status.code, failed, "Worker session terminated");
}
