//! Batch processing of uploaded files.
//!
//! `BatchDriver` validates the uploads, starts one worker session for the
//! batch, submits every accepted item, and runs each item's pipeline
//! (worker response, then the helper stages) independently. Per-item errors
//! become failure codes; a batch where nothing succeeded reports the most
//! relevant one according to the configured priority.

mod driver;
mod error;
mod failure;
mod types;
mod workspace;

pub use driver::BatchDriver;
pub use error::ItemError;
pub use failure::{FailureCode, FailurePriority};
pub use types::{
    BatchOutcome, BatchStatus, ItemArtifacts, ItemFailure, ItemOutcome, ItemResult, UploadItem,
    WorkerSummary,
};
pub use workspace::{ItemWorkspace, WorkspaceError};
