//! Error types for the worker module.

use thiserror::Error;

use crate::correlator::RequestError;
use crate::protocol::ProtocolError;
use crate::supervisor::SupervisorError;

use super::state::WorkerState;

/// Errors of the worker session itself, as opposed to a single request.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker could not be spawned.
    #[error(transparent)]
    Launch(#[from] SupervisorError),

    /// The worker exited before emitting the ready sentinel.
    #[error("{name} exited with code {code:?} before becoming ready")]
    ExitedBeforeReady { name: String, code: Option<i32> },

    /// The ready sentinel did not arrive in time. The worker was killed.
    #[error("{name} was not ready within {timeout_ms} ms")]
    StartupTimeout { name: String, timeout_ms: u64 },

    /// Requests are only accepted in the `Ready` state.
    #[error("Worker is {state}, not accepting requests")]
    NotAccepting { state: WorkerState },

    /// The worker process is no longer running.
    #[error("{name} is not running")]
    NotAlive { name: String },

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl WorkerError {
    /// Whether the worker never became ready.
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            Self::Launch(_) | Self::ExitedBeforeReady { .. } | Self::StartupTimeout { .. }
        )
    }
}
