//! Types for the supervisor module.

use std::path::{Path, PathBuf};

use crate::config::{HelperCommandConfig, WorkerConfig};

/// How the standard streams of a child are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioMode {
    /// stdin and stdout are piped for the caller, stderr is forwarded to the log.
    Interactive,
    /// stdin is closed, stdout and stderr are piped for the caller to collect.
    Capture,
}

/// What a process is used for. Only affects logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    Worker,
    Helper,
}

impl ProcessRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Helper => "helper",
        }
    }
}

/// Everything needed to start a child process.
///
/// The command line is `launcher [launcher_args..] [program] [args..]`.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub launcher: String,
    pub launcher_args: Vec<String>,
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
    pub role: ProcessRole,
}

impl LaunchSpec {
    pub fn new(launcher: impl Into<String>) -> Self {
        Self {
            launcher: launcher.into(),
            launcher_args: Vec::new(),
            program: None,
            args: Vec::new(),
            role: ProcessRole::Helper,
        }
    }

    /// Builds the launch spec of the persistent worker.
    pub fn worker(config: &WorkerConfig, job_class: &str) -> Self {
        Self::new(config.launcher.clone())
            .with_launcher_args(config.launcher_args.clone())
            .with_program(&config.script)
            .with_args([job_class.to_string()])
            .with_role(ProcessRole::Worker)
    }

    /// Builds the launch spec of a helper, without its positional arguments.
    pub fn helper(config: &HelperCommandConfig) -> Self {
        Self::new(config.launcher.clone())
            .with_launcher_args(config.launcher_args.clone())
            .with_program(&config.script)
    }

    pub fn with_launcher_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.launcher_args = args.into_iter().collect();
        self
    }

    pub fn with_program(mut self, program: impl AsRef<Path>) -> Self {
        self.program = Some(program.as_ref().to_path_buf());
        self
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    pub fn with_role(mut self, role: ProcessRole) -> Self {
        self.role = role;
        self
    }

    /// Short name used in logs: the program file name, or the launcher.
    pub fn display_name(&self) -> String {
        self.program
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.launcher.clone())
    }
}

/// Liveness of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// `code` is `None` when the process was terminated by a signal.
    Exited { code: Option<i32> },
}

impl ProcessState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Final outcome of a process run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn is_success(&self, success_exit_code: i32) -> bool {
        self.code == Some(success_exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_prefers_program() {
        let spec = LaunchSpec::new("python").with_program("/opt/ml/convert_to_pdf.py");
        assert_eq!(spec.display_name(), "convert_to_pdf.py");
        assert_eq!(LaunchSpec::new("sh").display_name(), "sh");
    }

    #[test]
    fn test_worker_spec_passes_job_class() {
        let config: WorkerConfig = toml::from_str(r#"script = "ml/transcribe_stdio.py""#).unwrap();
        let spec = LaunchSpec::worker(&config, "2");
        assert_eq!(spec.launcher, "python");
        assert_eq!(spec.launcher_args, vec!["-X", "utf8"]);
        assert_eq!(spec.args, vec!["2"]);
        assert_eq!(spec.role, ProcessRole::Worker);
    }

    #[test]
    fn test_process_exit_success() {
        assert!(ProcessExit { code: Some(0) }.is_success(0));
        assert!(!ProcessExit { code: Some(3) }.is_success(0));
        assert!(!ProcessExit { code: None }.is_success(0));
    }
}
