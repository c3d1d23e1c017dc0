use thiserror::Error;

/// Failure of a single request. Never affects other requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("Request {id} timed out after {timeout_ms} ms")]
    Timeout { id: String, timeout_ms: u64 },

    /// The worker answered, but the answer is structurally invalid or refers
    /// to output files that do not exist.
    #[error("Bad response for request {id}: {reason}")]
    BadResponse { id: String, reason: String },

    #[error("Worker terminated before request {id} completed: {reason}")]
    WorkerTerminated { id: String, reason: String },

    #[error("Request id {id} is already pending")]
    DuplicateId { id: String },

    #[error("Request {id} was cancelled")]
    Cancelled { id: String },
}

impl RequestError {
    pub fn id(&self) -> &str {
        match self {
            Self::Timeout { id, .. }
            | Self::BadResponse { id, .. }
            | Self::WorkerTerminated { id, .. }
            | Self::DuplicateId { id }
            | Self::Cancelled { id } => id,
        }
    }

    /// Label used for the request outcome metric.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::BadResponse { .. } => "bad_response",
            Self::WorkerTerminated { .. } => "worker_terminated",
            Self::DuplicateId { .. } => "duplicate_id",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}
