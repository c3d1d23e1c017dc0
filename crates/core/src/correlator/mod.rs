//! Correlation of worker responses with in-flight requests.
//!
//! Each registered request owns a oneshot completion and a deadline timer.
//! Responses are matched purely by id, so the worker may answer in any order;
//! a response for an id that is no longer pending is dropped.

mod error;
mod pending;
mod validate;

pub use error::RequestError;
pub use pending::{PendingResponse, RequestContext, ResolveOutcome, TaskCorrelator};
pub use validate::{validate_response, WorkerResponse};
