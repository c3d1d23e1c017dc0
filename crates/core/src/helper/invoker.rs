//! Running one-shot helper processes.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::supervisor::{LaunchSpec, ProcessSupervisor, StdioMode};

use super::error::HelperError;

/// How long to keep collecting stderr after the helper exited.
const STDERR_DRAIN: Duration = Duration::from_secs(1);

/// Collected output of a helper run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelperOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the run resolved on the ready sentinel while the helper
    /// was still running, or when it was ended by a signal.
    pub exit_code: Option<i32>,
    /// The run resolved on the ready sentinel rather than on exit.
    pub resolved_on_ready: bool,
}

/// Runs helpers to completion, one process per call.
#[derive(Debug, Clone)]
pub struct HelperInvoker {
    supervisor: ProcessSupervisor,
}

impl HelperInvoker {
    pub fn new(supervisor: ProcessSupervisor) -> Self {
        Self { supervisor }
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Runs the helper and returns its output once it exits with the success
    /// code, or as soon as a stdout line starts with `ready_sentinel`.
    ///
    /// The helper is killed when `timeout` elapses first.
    pub async fn run(
        &self,
        spec: &LaunchSpec,
        timeout: Duration,
        ready_sentinel: Option<&str>,
    ) -> Result<HelperOutput, HelperError> {
        let name = spec.display_name();
        let mut handle = self.supervisor.spawn(spec, StdioMode::Capture)?;
        let stdout = handle.take_stdout()?;
        let stderr = handle.take_stderr()?;
        let stderr_task = tokio::spawn(read_all(stderr));
        let mut exit = handle.exit_watch();

        debug!(helper = %name, args = ?spec.args, "Helper started");

        let run = tokio::time::timeout(timeout, async {
            let (stdout, ready) = read_stdout(stdout, ready_sentinel).await?;
            let status = if ready {
                None
            } else {
                Some(exit.exited().await)
            };
            Ok::<_, std::io::Error>((stdout, status))
        })
        .await;

        let (stdout, status) = match run {
            Ok(Ok(collected)) => collected,
            Ok(Err(source)) => {
                handle.kill();
                stderr_task.abort();
                return Err(HelperError::Io { name, source });
            }
            Err(_) => {
                warn!(helper = %name, timeout_ms = timeout.as_millis() as u64, "Helper timed out, killing it");
                handle.kill();
                stderr_task.abort();
                return Err(HelperError::Timeout {
                    name,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        let Some(status) = status else {
            info!(helper = %name, "Helper signaled ready");
            stderr_task.abort();
            return Ok(HelperOutput {
                stdout,
                stderr: String::new(),
                exit_code: None,
                resolved_on_ready: true,
            });
        };

        let stderr_abort = stderr_task.abort_handle();
        let stderr = match tokio::time::timeout(STDERR_DRAIN, stderr_task).await {
            Ok(Ok(text)) => text,
            _ => {
                stderr_abort.abort();
                String::new()
            }
        };

        if let Err(e) = exit.check(status) {
            warn!(helper = %name, "{}", e);
            return Err(HelperError::Failed {
                name,
                code: status.code,
                stderr: stderr.trim().to_string(),
            });
        }

        if !stderr.trim().is_empty() {
            debug!(helper = %name, "stderr: {}", stderr.trim());
        }
        info!(helper = %name, code = ?status.code, "Helper finished");
        Ok(HelperOutput {
            stdout,
            stderr,
            exit_code: status.code,
            resolved_on_ready: false,
        })
    }
}

async fn read_stdout<R: AsyncRead + Unpin>(
    stdout: R,
    ready_sentinel: Option<&str>,
) -> std::io::Result<(String, bool)> {
    let mut reader = BufReader::new(stdout);
    let mut collected = String::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok((collected, false));
        }
        let text = String::from_utf8_lossy(&line);
        collected.push_str(&text);
        if let Some(sentinel) = ready_sentinel {
            if text.trim_start().starts_with(sentinel) {
                return Ok((collected, true));
            }
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut stream: R) -> String {
    let mut buf = Vec::new();
    // A read error only truncates what we report.
    let _ = stream.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}
