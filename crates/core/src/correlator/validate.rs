//! Structural checks on worker responses.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::protocol::{json_kind, ResponseEnvelope};

/// A validated worker response.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerResponse {
    pub id: String,
    pub code: i64,
    /// File names as declared by the worker, relative to the work dir.
    pub fnames: Vec<String>,
    /// Declared files found on disk, in declaration order. Empty when the
    /// request had no work dir.
    pub outputs: Vec<PathBuf>,
    /// Any other fields of the response.
    pub extra: Map<String, Value>,
}

impl WorkerResponse {
    /// The first declared output that exists on disk.
    pub fn primary_output(&self) -> Option<&Path> {
        self.outputs.first().map(PathBuf::as_path)
    }
}

/// Checks `code` is numeric, `fnames` lists plain file names and, given a
/// work dir, that at least one of them exists there as a regular file.
pub async fn validate_response(
    envelope: &ResponseEnvelope,
    work_dir: Option<&Path>,
) -> Result<WorkerResponse, String> {
    let code = match envelope.get("code") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| format!("code {} is out of range", n))?,
        Some(other) => return Err(format!("code must be a number, got {}", json_kind(other))),
        None => return Err("missing code".to_string()),
    };

    let fnames = match envelope.get("fnames") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(name) if is_plain_file_name(name) => Ok(name.clone()),
                Value::String(name) => Err(format!("'{}' is not a plain file name", name)),
                other => Err(format!("fnames must hold strings, got {}", json_kind(other))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
        Some(other) => return Err(format!("fnames must be an array, got {}", json_kind(other))),
    };

    let outputs = match work_dir {
        Some(dir) => {
            let mut outputs = Vec::new();
            for name in &fnames {
                let path = dir.join(name);
                if is_regular_file(&path).await {
                    outputs.push(path);
                }
            }
            if outputs.is_empty() {
                return Err(format!(
                    "none of the declared output files {:?} exist in {}",
                    fnames,
                    dir.display()
                ));
            }
            outputs
        }
        None => Vec::new(),
    };

    let mut extra = envelope.fields.clone();
    for key in ["id", "code", "fnames"] {
        extra.remove(key);
    }

    Ok(WorkerResponse {
        id: envelope.id.clone(),
        code,
        fnames,
        outputs,
        extra,
    })
}

async fn is_regular_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !Path::new(name).is_absolute()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn envelope(value: Value) -> ResponseEnvelope {
        ResponseEnvelope::parse(&value.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_valid_response_without_work_dir() {
        let resp = validate_response(
            &envelope(json!({"id": "a", "code": 0, "fnames": ["a.mid"], "instrument": "piano"})),
            None,
        )
        .await
        .unwrap();
        assert_eq!(resp.code, 0);
        assert_eq!(resp.fnames, vec!["a.mid"]);
        assert!(resp.outputs.is_empty());
        assert_eq!(resp.extra.get("instrument"), Some(&json!("piano")));
    }

    #[tokio::test]
    async fn test_non_numeric_code_is_rejected() {
        let err = validate_response(&envelope(json!({"id": "a", "code": "0"})), None)
            .await
            .unwrap_err();
        assert!(err.contains("code"));
        assert!(validate_response(&envelope(json!({"id": "a"})), None).await.is_err());
    }

    #[tokio::test]
    async fn test_output_must_exist_in_work_dir() {
        let dir = TempDir::new().unwrap();
        let env = envelope(json!({"id": "a", "code": 0, "fnames": ["missing.mid", "a.mid"]}));
        assert!(validate_response(&env, Some(dir.path())).await.is_err());

        std::fs::write(dir.path().join("a.mid"), b"MThd").unwrap();
        let resp = validate_response(&env, Some(dir.path())).await.unwrap();
        assert_eq!(resp.primary_output(), Some(dir.path().join("a.mid").as_path()));
    }

    #[tokio::test]
    async fn test_empty_fnames_fail_with_work_dir() {
        let dir = TempDir::new().unwrap();
        let env = envelope(json!({"id": "a", "code": 0, "fnames": []}));
        assert!(validate_response(&env, Some(dir.path())).await.is_err());
    }

    #[tokio::test]
    async fn test_path_like_names_are_rejected() {
        for name in ["../escape.mid", "/etc/passwd", "sub/dir.mid", "..", ""] {
            let env = envelope(json!({"id": "a", "code": 0, "fnames": [name]}));
            assert!(validate_response(&env, None).await.is_err(), "{} accepted", name);
        }
    }

    #[tokio::test]
    async fn test_directory_is_not_an_output_file() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("a.mid")).unwrap();
        let env = envelope(json!({"id": "a", "code": 0, "fnames": ["a.mid"]}));

        let err = validate_response(&env, Some(dir.path())).await.unwrap_err();
        assert!(err.contains("a.mid"));
    }
}
