//! Spawning and watching child processes.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::ProcessConfig;
use crate::metrics;

use super::error::SupervisorError;
use super::types::{LaunchSpec, ProcessExit, ProcessRole, ProcessState, StdioMode};

/// Launches child processes through an allow-list of launchers.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    allowed_launchers: Arc<Vec<String>>,
    success_exit_code: i32,
}

impl ProcessSupervisor {
    pub fn new(allowed_launchers: Vec<String>, success_exit_code: i32) -> Self {
        Self {
            allowed_launchers: Arc::new(allowed_launchers),
            success_exit_code,
        }
    }

    pub fn from_config(config: &ProcessConfig) -> Self {
        Self::new(config.allowed_launchers.clone(), config.success_exit_code)
    }

    pub fn success_exit_code(&self) -> i32 {
        self.success_exit_code
    }

    pub fn is_allowed(&self, launcher: &str) -> bool {
        self.allowed_launchers.iter().any(|l| l == launcher)
    }

    /// Spawns a process and starts watching it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        &self,
        spec: &LaunchSpec,
        mode: StdioMode,
    ) -> Result<ProcessHandle, SupervisorError> {
        let name = spec.display_name();
        let role = spec.role.as_str();

        if !self.is_allowed(&spec.launcher) {
            error!(process = %name, launcher = %spec.launcher, "Launcher is not allowed");
            metrics::PROCESSES_SPAWNED
                .with_label_values(&[role, "rejected"])
                .inc();
            return Err(SupervisorError::LauncherNotAllowed {
                launcher: spec.launcher.clone(),
            });
        }

        let mut command = Command::new(&spec.launcher);
        command.args(&spec.launcher_args);
        if let Some(program) = &spec.program {
            command.arg(program);
        }
        command.args(&spec.args);
        match mode {
            StdioMode::Interactive => command.stdin(Stdio::piped()),
            StdioMode::Capture => command.stdin(Stdio::null()),
        };
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        // The child must not outlive the task that owns it, even when the
        // runtime shuts down first.
        command.kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| {
            error!(process = %name, "Failed to launch: {}", source);
            metrics::PROCESSES_SPAWNED
                .with_label_values(&[role, "failed"])
                .inc();
            SupervisorError::Launch {
                name: name.clone(),
                source,
            }
        })?;
        metrics::PROCESSES_SPAWNED
            .with_label_values(&[role, "spawned"])
            .inc();

        let pid = child.id();
        info!(process = %name, pid = ?pid, role, "Process spawned");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        if mode == StdioMode::Interactive {
            if let Some(stream) = stderr.take() {
                tokio::spawn(forward_stderr(name.clone(), stream));
            }
        }

        let (state_tx, state_rx) = watch::channel(ProcessState::Running);
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        tokio::spawn(watch_exit(
            name.clone(),
            self.success_exit_code,
            child,
            state_tx,
            kill_rx,
        ));

        Ok(ProcessHandle {
            exit: ExitWatch {
                name: name.clone(),
                success_exit_code: self.success_exit_code,
                state: state_rx,
            },
            name,
            pid,
            role: spec.role,
            stdin,
            stdout,
            stderr,
            kill_tx,
            kill_requested: AtomicBool::new(false),
            forced_kills: Arc::new(AtomicU32::new(0)),
        })
    }
}

/// A running (or finished) child process.
#[derive(Debug)]
pub struct ProcessHandle {
    name: String,
    pid: Option<u32>,
    role: ProcessRole,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    exit: ExitWatch,
    kill_tx: mpsc::UnboundedSender<()>,
    kill_requested: AtomicBool,
    forced_kills: Arc<AtomicU32>,
}

impl ProcessHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.exit.state()
    }

    pub fn is_alive(&self) -> bool {
        self.exit.is_alive()
    }

    pub fn take_stdin(&mut self) -> Result<ChildStdin, SupervisorError> {
        self.stdin.take().ok_or(SupervisorError::StreamUnavailable {
            name: self.name.clone(),
            stream: "stdin",
        })
    }

    pub fn take_stdout(&mut self) -> Result<ChildStdout, SupervisorError> {
        self.stdout.take().ok_or(SupervisorError::StreamUnavailable {
            name: self.name.clone(),
            stream: "stdout",
        })
    }

    pub fn take_stderr(&mut self) -> Result<ChildStderr, SupervisorError> {
        self.stderr.take().ok_or(SupervisorError::StreamUnavailable {
            name: self.name.clone(),
            stream: "stderr",
        })
    }

    /// Returns a watcher that can await the exit from another task.
    pub fn exit_watch(&self) -> ExitWatch {
        self.exit.clone()
    }

    /// Forcibly terminates the process. Returns false if it already exited or
    /// a kill was already requested; only the first request is counted.
    pub fn kill(&self) -> bool {
        if !self.is_alive() || self.kill_requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.forced_kills.fetch_add(1, Ordering::SeqCst);
        metrics::FORCED_KILLS
            .with_label_values(&[self.role.as_str()])
            .inc();
        self.kill_tx.send(()).is_ok()
    }

    /// Number of forced terminations requested through this handle.
    pub fn forced_kills(&self) -> u32 {
        self.forced_kills.load(Ordering::SeqCst)
    }
}

/// Observes the terminal state of a process.
#[derive(Debug, Clone)]
pub struct ExitWatch {
    name: String,
    success_exit_code: i32,
    state: watch::Receiver<ProcessState>,
}

impl ExitWatch {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    pub fn is_alive(&self) -> bool {
        self.state().is_running()
    }

    /// Waits until the process has exited.
    pub async fn exited(&mut self) -> ProcessExit {
        let state = match self.state.wait_for(|s| !s.is_running()).await {
            Ok(state) => *state,
            // The watcher task is gone, so the process is too.
            Err(_) => ProcessState::Exited { code: None },
        };
        match state {
            ProcessState::Exited { code } => ProcessExit { code },
            ProcessState::Running => ProcessExit { code: None },
        }
    }

    /// Waits for the exit and fails with `AbnormalExit` on a non-success code.
    pub async fn wait_success(&mut self) -> Result<ProcessExit, SupervisorError> {
        let exit = self.exited().await;
        self.check(exit)
    }

    pub fn check(&self, exit: ProcessExit) -> Result<ProcessExit, SupervisorError> {
        if exit.is_success(self.success_exit_code) {
            Ok(exit)
        } else {
            Err(SupervisorError::AbnormalExit {
                name: self.name.clone(),
                code: exit.code,
            })
        }
    }
}

async fn watch_exit(
    name: String,
    success_exit_code: i32,
    mut child: Child,
    state_tx: watch::Sender<ProcessState>,
    mut kill_rx: mpsc::UnboundedReceiver<()>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        Some(()) = kill_rx.recv() => {
            warn!(process = %name, "Forcibly terminating process");
            if let Err(e) = child.start_kill() {
                warn!(process = %name, "Failed to kill process: {}", e);
            }
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            error!(process = %name, "Failed to wait for process: {}", e);
            None
        }
    };

    if code == Some(success_exit_code) {
        info!(process = %name, code = ?code, "Process exited");
    } else {
        error!(process = %name, code = ?code, "Process exited with an error code");
    }
    state_tx.send_replace(ProcessState::Exited { code });
}

/// Forwards stderr to the log line by line. stderr output alone is never a failure.
async fn forward_stderr(name: String, stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if !line.is_empty() {
                    warn!(process = %name, "stderr: {}", line);
                }
            }
            Err(e) => {
                debug!(process = %name, "stderr closed: {}", e);
                break;
            }
        }
    }
}
