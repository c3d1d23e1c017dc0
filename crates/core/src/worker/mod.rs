//! Lifecycle of the persistent transcription worker.
//!
//! A `WorkerSession` owns one worker process for one batch. Two background
//! tasks service it: the stdout reader, which decodes frames and hands
//! responses to the correlator, and the termination watcher, which fails
//! every still-pending request once the process is gone.
//!
//! # Example
//!
//! ```ignore
//! let session = WorkerSession::start(&supervisor, &spec, options).await?;
//! let pending = session.submit("item-1", &job, RequestContext::with_work_dir(dir)).await?;
//! let outcome = session.shutdown().await;
//! let response = pending.wait().await?;
//! ```

mod error;
mod session;
mod state;

pub use error::WorkerError;
pub use session::{ShutdownOutcome, WorkerOptions, WorkerSession};
pub use state::WorkerState;
