pub mod batch;
pub mod config;
pub mod correlator;
pub mod helper;
pub mod metrics;
pub mod protocol;
pub mod supervisor;
pub mod testing;
pub mod worker;

pub use batch::{
    BatchDriver, BatchOutcome, BatchStatus, FailureCode, ItemError, ItemResult, UploadItem,
};
pub use config::{load_config, load_config_from_str, validate_config, Config, ConfigError};
pub use correlator::{RequestError, TaskCorrelator, WorkerResponse};
pub use helper::{ArtifactStage, HelperError, HelperInvoker};
pub use supervisor::{LaunchSpec, ProcessSupervisor, SupervisorError};
pub use worker::{WorkerError, WorkerSession, WorkerState};
