//! Error types for the helper module.

use std::path::PathBuf;

use thiserror::Error;

use crate::supervisor::SupervisorError;

/// Errors of a one-shot helper run.
#[derive(Debug, Error)]
pub enum HelperError {
    /// The helper could not be spawned.
    #[error(transparent)]
    Launch(#[from] SupervisorError),

    /// The helper exited with a code other than the success code.
    #[error("{name} failed with exit code {code:?}: {stderr}")]
    Failed {
        name: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The helper did not finish in time and was killed.
    #[error("{name} timed out after {timeout_ms} ms")]
    Timeout { name: String, timeout_ms: u64 },

    /// Reading the helper's output failed.
    #[error("Failed to read output of {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The helper succeeded but its artifact is not where it should be.
    #[error("{stage} did not produce {path}")]
    MissingArtifact { stage: String, path: PathBuf },
}

impl HelperError {
    /// Label used for the helper run metric.
    pub fn result_label(&self) -> &'static str {
        match self {
            Self::Launch(_) => "launch_failed",
            Self::Failed { .. } => "failed",
            Self::Timeout { .. } => "timeout",
            Self::Io { .. } => "io_error",
            Self::MissingArtifact { .. } => "missing_artifact",
        }
    }
}
