use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::batch::FailureCode;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub process: ProcessConfig,
    pub worker: WorkerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    pub helpers: HelpersConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

/// Rules applied to every spawned child process.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessConfig {
    /// Launcher executables that may be spawned. Anything else is rejected.
    #[serde(default = "default_allowed_launchers")]
    pub allowed_launchers: Vec<String>,
    /// Exit code that marks a successful run. Any other code is abnormal.
    #[serde(default)]
    pub success_exit_code: i32,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            allowed_launchers: default_allowed_launchers(),
            success_exit_code: 0,
        }
    }
}

fn default_allowed_launchers() -> Vec<String> {
    vec!["python".to_string(), "python3".to_string()]
}

fn default_launcher() -> String {
    "python".to_string()
}

fn default_launcher_args() -> Vec<String> {
    vec!["-X".to_string(), "utf8".to_string()]
}

/// The persistent transcription worker.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    #[serde(default = "default_launcher")]
    pub launcher: String,
    /// Arguments passed to the launcher before the script path.
    #[serde(default = "default_launcher_args")]
    pub launcher_args: Vec<String>,
    /// Path of the worker script.
    pub script: PathBuf,
    /// Deadline for a single request, in milliseconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// How long to wait for the ready sentinel, in milliseconds.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_ms: u64,
    /// Time the worker gets to exit on its own after end-of-input.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

fn default_request_timeout() -> u64 {
    600_000 // 10 minutes
}

fn default_startup_timeout() -> u64 {
    300_000 // 5 minutes, model loading is slow
}

fn default_shutdown_grace() -> u64 {
    2000
}

impl WorkerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Tokens of the line-framed stdio protocol.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtocolConfig {
    /// Appended to every outbound request record.
    #[serde(default = "default_record_separator")]
    pub record_separator: String,
    /// Splits inbound worker output into messages.
    #[serde(default = "default_message_separator")]
    pub message_separator: String,
    /// Marks an inbound message as a data (response) message.
    #[serde(default = "default_data_prefix")]
    pub data_prefix: String,
    /// Emitted once by the worker when it accepts jobs.
    #[serde(default = "default_ready_sentinel")]
    pub ready_sentinel: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            record_separator: default_record_separator(),
            message_separator: default_message_separator(),
            data_prefix: default_data_prefix(),
            ready_sentinel: default_ready_sentinel(),
        }
    }
}

fn default_record_separator() -> String {
    "<<END>>\n".to_string()
}

fn default_message_separator() -> String {
    "<<END>>".to_string()
}

fn default_data_prefix() -> String {
    "<<DATA>>".to_string()
}

fn default_ready_sentinel() -> String {
    "<<READY>>".to_string()
}

/// One-shot helper processes, one per artifact stage.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HelpersConfig {
    /// Stage 2: renders the transcription into a PDF notes sheet.
    pub score: HelperCommandConfig,
    /// Stage 3: renders preview images of the notes sheet.
    pub preview: HelperCommandConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HelperCommandConfig {
    #[serde(default = "default_launcher")]
    pub launcher: String,
    #[serde(default = "default_launcher_args")]
    pub launcher_args: Vec<String>,
    pub script: PathBuf,
    #[serde(default = "default_helper_timeout")]
    pub timeout_ms: u64,
    /// Resolve as soon as a stdout line starts with this token instead of
    /// waiting for the process to exit.
    #[serde(default)]
    pub ready_sentinel: Option<String>,
}

fn default_helper_timeout() -> u64 {
    120_000
}

impl HelperCommandConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Per-item working directories.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_metadata_file_name")]
    pub metadata_file_name: String,
    /// Keep the uploaded bytes next to the generated artifacts.
    #[serde(default = "default_true")]
    pub save_uploads: bool,
    /// Remove successful item directories after this many seconds.
    #[serde(default)]
    pub retention_secs: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            metadata_file_name: default_metadata_file_name(),
            save_uploads: true,
            retention_secs: None,
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_metadata_file_name() -> String {
    "data.json".to_string()
}

fn default_true() -> bool {
    true
}

/// Batch-level policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    /// Items beyond this count are ignored.
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    /// Accepted file extensions, with the leading dot.
    #[serde(default = "default_supported_extensions")]
    pub supported_extensions: Vec<String>,
    /// Job class passed to the worker when the caller does not pick one.
    #[serde(default = "default_job_class")]
    pub default_job_class: String,
    /// Order in which failure codes win when every item failed.
    #[serde(default = "default_failure_priority")]
    pub failure_priority: Vec<FailureCode>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            supported_extensions: default_supported_extensions(),
            default_job_class: default_job_class(),
            failure_priority: default_failure_priority(),
        }
    }
}

fn default_max_items() -> usize {
    10
}

fn default_supported_extensions() -> Vec<String> {
    [".mp3", ".wav", ".flac", ".ogg", ".m4a", ".aac"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_job_class() -> String {
    "1".to_string()
}

fn default_failure_priority() -> Vec<FailureCode> {
    vec![
        FailureCode::UnsupportedMedia,
        FailureCode::DataRemoved,
        FailureCode::BadInput,
        FailureCode::Internal,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[worker]
script = "ml/transcribe_stdio.py"

[helpers.score]
script = "ml/convert_to_pdf.py"

[helpers.preview]
script = "ml/image_notes_generator.py"
"#;

    #[test]
    fn test_deserialize_minimal_uses_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.process.allowed_launchers, vec!["python", "python3"]);
        assert_eq!(config.process.success_exit_code, 0);
        assert_eq!(config.worker.launcher_args, vec!["-X", "utf8"]);
        assert_eq!(config.protocol.data_prefix, "<<DATA>>");
        assert_eq!(config.protocol.record_separator, "<<END>>\n");
        assert_eq!(config.storage.metadata_file_name, "data.json");
        assert_eq!(config.batch.max_items, 10);
        assert_eq!(config.batch.failure_priority[0], FailureCode::UnsupportedMedia);
        assert!(config.helpers.score.ready_sentinel.is_none());
    }

    #[test]
    fn test_deserialize_missing_helpers_fails() {
        let toml = r#"
[worker]
script = "ml/transcribe_stdio.py"
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_custom_protocol_and_priority() {
        let toml = format!(
            r#"{MINIMAL}
[protocol]
data_prefix = "DATA:"
ready_sentinel = "READY"

[batch]
failure_priority = ["bad_input", "internal", "unsupported_media", "data_removed"]
"#
        );
        let config: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config.protocol.data_prefix, "DATA:");
        assert_eq!(config.protocol.ready_sentinel, "READY");
        assert_eq!(config.protocol.message_separator, "<<END>>");
        assert_eq!(config.batch.failure_priority[0], FailureCode::BadInput);
    }

    #[test]
    fn test_durations() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.worker.shutdown_grace(), Duration::from_millis(2000));
        assert_eq!(config.worker.request_timeout(), Duration::from_secs(600));
        assert_eq!(config.helpers.preview.timeout(), Duration::from_secs(120));
    }
}
