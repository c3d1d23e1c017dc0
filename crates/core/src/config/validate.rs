use std::collections::HashSet;

use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Worker and helper launchers are on the allow-list
/// - Protocol tokens are non-empty and distinguishable
/// - Timeouts are not 0
/// - Failure priority has no duplicates
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let allowed = &config.process.allowed_launchers;
    let launchers = [
        ("worker.launcher", &config.worker.launcher),
        ("helpers.score.launcher", &config.helpers.score.launcher),
        ("helpers.preview.launcher", &config.helpers.preview.launcher),
    ];
    for (key, launcher) in launchers {
        if !allowed.iter().any(|a| a == launcher) {
            return Err(ConfigError::ValidationError(format!(
                "{} '{}' is not in process.allowed_launchers",
                key, launcher
            )));
        }
    }

    let protocol = &config.protocol;
    let tokens = [
        ("protocol.record_separator", &protocol.record_separator),
        ("protocol.message_separator", &protocol.message_separator),
        ("protocol.data_prefix", &protocol.data_prefix),
        ("protocol.ready_sentinel", &protocol.ready_sentinel),
    ];
    for (key, token) in tokens {
        if token.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{} cannot be empty",
                key
            )));
        }
    }
    if protocol.data_prefix.starts_with(&protocol.ready_sentinel)
        || protocol.ready_sentinel.starts_with(&protocol.data_prefix)
    {
        return Err(ConfigError::ValidationError(
            "protocol.data_prefix and protocol.ready_sentinel must not overlap".to_string(),
        ));
    }

    let timeouts = [
        ("worker.request_timeout_ms", config.worker.request_timeout_ms),
        ("worker.startup_timeout_ms", config.worker.startup_timeout_ms),
        ("helpers.score.timeout_ms", config.helpers.score.timeout_ms),
        ("helpers.preview.timeout_ms", config.helpers.preview.timeout_ms),
    ];
    for (key, value) in timeouts {
        if value == 0 {
            return Err(ConfigError::ValidationError(format!("{} cannot be 0", key)));
        }
    }

    if config.batch.max_items == 0 {
        return Err(ConfigError::ValidationError(
            "batch.max_items cannot be 0".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for code in &config.batch.failure_priority {
        if !seen.insert(code) {
            return Err(ConfigError::ValidationError(format!(
                "batch.failure_priority lists {:?} more than once",
                code
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::FailureCode;
    use crate::config::load_config_from_str;

    fn base_config() -> Config {
        load_config_from_str(
            r#"
[worker]
script = "ml/transcribe_stdio.py"

[helpers.score]
script = "ml/convert_to_pdf.py"

[helpers.preview]
script = "ml/image_notes_generator.py"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn test_validate_disallowed_launcher_fails() {
        let mut config = base_config();
        config.worker.launcher = "bash".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(ref m) if m.contains("worker.launcher")));
    }

    #[test]
    fn test_validate_disallowed_helper_launcher_fails() {
        let mut config = base_config();
        config.helpers.preview.launcher = "node".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_empty_separator_fails() {
        let mut config = base_config();
        config.protocol.message_separator = String::new();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_overlapping_tokens_fails() {
        let mut config = base_config();
        config.protocol.data_prefix = "READY".to_string();
        config.protocol.ready_sentinel = "READY".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_timeout_fails() {
        let mut config = base_config();
        config.worker.request_timeout_ms = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_duplicate_priority_fails() {
        let mut config = base_config();
        config.batch.failure_priority = vec![FailureCode::Internal, FailureCode::Internal];
        assert!(validate_config(&config).is_err());
    }
}
