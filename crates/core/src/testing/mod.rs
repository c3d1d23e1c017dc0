//! Test doubles for the worker and the helper stages.
//!
//! [`FakeWorker`] writes a `sh` script that speaks the worker protocol, so
//! sessions and batches can be exercised against a real child process
//! without the transcription model.
//!
//! # Example
//!
//! ```rust,ignore
//! use notesheet_core::testing::{self, FakeWorker, RecordingStage};
//!
//! let script = FakeWorker::new().skip_request(2).write_to(dir.path())?;
//! let config = testing::sh_config(&script, uploads.path());
//!
//! let stage = RecordingStage::new("score");
//! let driver = BatchDriver::new(&config).with_stages(vec![Arc::new(stage.clone())]);
//! ```

mod fake_worker;
mod recording_stage;

pub use fake_worker::{sh_config, sh_helper, FakeWorker};
pub use recording_stage::RecordingStage;
