//! Error types for the protocol module.

use thiserror::Error;

/// Errors that can occur while encoding or writing frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The envelope could not be serialized.
    #[error("Failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    /// A request payload must serialize to a JSON object.
    #[error("Request payload must be a JSON object, got {kind}")]
    PayloadNotObject { kind: &'static str },

    /// Writing to the worker's input stream failed.
    #[error("Failed to write to worker input: {0}")]
    Write(#[from] std::io::Error),

    /// The input stream was already closed for draining.
    #[error("Worker input is closed")]
    Closed,
}
