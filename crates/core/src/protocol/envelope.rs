//! Messages exchanged with the worker.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::ProtocolError;

/// Outbound request: `{ "id": ..., ...payload }` on a single line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl RequestEnvelope {
    /// Builds an envelope from any payload that serializes to a JSON object.
    ///
    /// An `id` field inside the payload is dropped in favour of `id`.
    pub fn new(id: impl Into<String>, payload: impl Serialize) -> Result<Self, ProtocolError> {
        let payload = match serde_json::to_value(payload)? {
            Value::Object(mut map) => {
                map.remove("id");
                map
            }
            Value::Null => Map::new(),
            other => {
                return Err(ProtocolError::PayloadNotObject {
                    kind: json_kind(&other),
                })
            }
        };
        Ok(Self {
            id: id.into(),
            payload,
        })
    }
}

/// Inbound data message, routed by its string `id`.
///
/// `fields` holds the whole decoded object, `id` included. Structural
/// validation of the rest happens in the correlator.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl ResponseEnvelope {
    /// Parses a data message body. The body must be a JSON object with a string id.
    pub fn parse(body: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(body).map_err(|e| format!("invalid JSON: {}", e))?;
        let fields = match value {
            Value::Object(map) => map,
            other => return Err(format!("expected a JSON object, got {}", json_kind(&other))),
        };
        let id = match fields.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(other) => return Err(format!("id must be a string, got {}", json_kind(other))),
            None => return Err("missing id".to_string()),
        };
        Ok(Self { id, fields })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// A decoded stdout message from the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// The worker is ready to accept jobs.
    Ready,
    /// A response to a pending request.
    Data(ResponseEnvelope),
    /// Free-text output.
    Log(String),
    /// A data message that could not be decoded. Scoped to this message only.
    Malformed { reason: String },
}

/// The job description sent to the transcription worker for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionJob {
    /// Directory the worker writes its output files into.
    #[serde(rename = "audio_dir_path")]
    pub work_dir: PathBuf,
    /// Uploaded bytes, base64 encoded.
    pub data: String,
}

impl TranscriptionJob {
    pub fn new(work_dir: impl AsRef<Path>, bytes: &[u8]) -> Self {
        Self {
            work_dir: work_dir.as_ref().to_path_buf(),
            data: STANDARD.encode(bytes),
        }
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_envelope_flattens_payload() {
        let job = TranscriptionJob::new("/tmp/uploads/abc", b"RIFF");
        let envelope = RequestEnvelope::new("abc", &job).unwrap();
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({"id": "abc", "audio_dir_path": "/tmp/uploads/abc", "data": "UklGRg=="})
        );
    }

    #[test]
    fn test_request_envelope_id_wins() {
        let envelope = RequestEnvelope::new("real", json!({"id": "fake", "x": 1})).unwrap();
        assert_eq!(envelope.id, "real");
        assert!(!envelope.payload.contains_key("id"));
    }

    #[test]
    fn test_request_envelope_rejects_scalar_payload() {
        let err = RequestEnvelope::new("a", 5).unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadNotObject { kind: "number" }));
    }

    #[test]
    fn test_response_parse() {
        let env = ResponseEnvelope::parse(r#"{"id":"a","code":0,"fnames":["a.mid"]}"#).unwrap();
        assert_eq!(env.id, "a");
        assert_eq!(env.get("code"), Some(&json!(0)));
    }

    #[test]
    fn test_response_parse_errors() {
        assert!(ResponseEnvelope::parse("not json").is_err());
        assert!(ResponseEnvelope::parse("[1,2]").is_err());
        assert!(ResponseEnvelope::parse(r#"{"code":0}"#).is_err());
        let err = ResponseEnvelope::parse(r#"{"id":7}"#).unwrap_err();
        assert!(err.contains("string"));
    }
}
