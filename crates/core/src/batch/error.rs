use thiserror::Error;

use crate::correlator::RequestError;
use crate::helper::HelperError;
use crate::worker::WorkerError;

use super::failure::FailureCode;
use super::workspace::WorkspaceError;

/// Why a single item failed.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("Unsupported media type: {name}")]
    UnsupportedMedia { name: String },

    /// The worker died before this item could be sent.
    #[error("Worker is not running, item was not processed")]
    WorkerUnavailable,

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Helper(#[from] HelperError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

impl ItemError {
    pub fn code(&self) -> FailureCode {
        match self {
            Self::UnsupportedMedia { .. } => FailureCode::UnsupportedMedia,
            Self::Request(RequestError::BadResponse { .. }) => FailureCode::BadInput,
            Self::Workspace(WorkspaceError::Removed { .. }) => FailureCode::DataRemoved,
            Self::Worker(WorkerError::Request(RequestError::BadResponse { .. })) => {
                FailureCode::BadInput
            }
            _ => FailureCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_failure_codes() {
        let unsupported = ItemError::UnsupportedMedia {
            name: "a.txt".to_string(),
        };
        assert_eq!(unsupported.code(), FailureCode::UnsupportedMedia);

        let bad = ItemError::from(RequestError::BadResponse {
            id: "a".to_string(),
            reason: "missing code".to_string(),
        });
        assert_eq!(bad.code(), FailureCode::BadInput);

        let timeout = ItemError::from(RequestError::Timeout {
            id: "a".to_string(),
            timeout_ms: 10,
        });
        assert_eq!(timeout.code(), FailureCode::Internal);

        let removed = ItemError::from(WorkspaceError::Removed {
            path: PathBuf::from("/tmp/x"),
        });
        assert_eq!(removed.code(), FailureCode::DataRemoved);

        assert_eq!(ItemError::WorkerUnavailable.code(), FailureCode::Internal);
    }
}
