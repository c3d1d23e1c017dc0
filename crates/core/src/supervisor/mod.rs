//! Supervision of child processes.
//!
//! `ProcessSupervisor` launches the persistent transcription worker and the
//! one-shot helpers. Every spawned process gets a watcher task that owns the
//! `Child`, records the exit code, and publishes the terminal state through a
//! `watch` channel. Consumers observe liveness via `ExitWatch` rather than a
//! shared flag.
//!
//! # Example
//!
//! ```ignore
//! use notesheet_core::supervisor::{LaunchSpec, ProcessSupervisor, StdioMode};
//!
//! let supervisor = ProcessSupervisor::new(vec!["python".into()], 0);
//! let spec = LaunchSpec::new("python").with_program("ml/convert_to_pdf.py");
//! let handle = supervisor.spawn(&spec, StdioMode::Capture)?;
//! let exit = handle.exit_watch().wait_success().await?;
//! ```

mod error;
mod process;
mod types;

pub use error::SupervisorError;
pub use process::{ExitWatch, ProcessHandle, ProcessSupervisor};
pub use types::{LaunchSpec, ProcessExit, ProcessRole, ProcessState, StdioMode};
