//! Error types for the supervisor module.

use thiserror::Error;

/// Errors that can occur while launching or supervising a process.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The launcher is not on the configured allow-list.
    #[error("{launcher} is not a supported process launching command")]
    LauncherNotAllowed { launcher: String },

    /// The process could not be started.
    #[error("Failed to launch {name}: {source}")]
    Launch {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exited with a code other than the success code.
    #[error("{name} exited with unexpected code {code:?}")]
    AbnormalExit { name: String, code: Option<i32> },

    /// A standard stream was requested but is not piped in this mode.
    #[error("{stream} of {name} is not available")]
    StreamUnavailable { name: String, stream: &'static str },
}

impl SupervisorError {
    /// Whether the error is a configuration problem rather than a runtime one.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::LauncherNotAllowed { .. })
    }

    /// Whether this error means the process never started.
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, Self::LauncherNotAllowed { .. } | Self::Launch { .. })
    }
}
