use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Load configuration from file with environment variable overrides
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("NOTESHEET_").split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
[worker]
script = "ml/transcribe_stdio.py"

[helpers.score]
script = "ml/convert_to_pdf.py"

[helpers.preview]
script = "ml/image_notes_generator.py"
"#;

    #[test]
    fn test_load_config_from_str_valid() {
        let config = load_config_from_str(MINIMAL).unwrap();
        assert_eq!(config.worker.launcher, "python");
        assert_eq!(config.worker.shutdown_grace_ms, 2000);
    }

    #[test]
    fn test_load_config_from_str_missing_worker() {
        let toml = r#"
[helpers.score]
script = "a.py"

[helpers.preview]
script = "b.py"
"#;
        let result = load_config_from_str(toml);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/notesheet.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[worker]
script = "ml/transcribe_stdio.py"
request_timeout_ms = 1500

[helpers.score]
script = "ml/convert_to_pdf.py"

[helpers.preview]
script = "ml/image_notes_generator.py"
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.worker.request_timeout_ms, 1500);
        assert_eq!(config.helpers.score.launcher, "python");
    }
}
