//! One-shot helper processes for the secondary artifact stages.
//!
//! Helpers speak no structured protocol: they get positional arguments and
//! report through their exit code, with free-text stdout and stderr.

mod error;
mod invoker;
mod stages;

pub use error::HelperError;
pub use invoker::{HelperInvoker, HelperOutput};
pub use stages::{ArtifactStage, PreviewStage, ScoreRenderStage, StageContext, StageOutput};
