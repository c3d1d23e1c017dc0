//! Runs a batch of uploads through one worker session and the helper stages.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::{BatchConfig, Config, StorageConfig, WorkerConfig};
use crate::correlator::{PendingResponse, RequestContext, RequestError};
use crate::helper::{ArtifactStage, HelperInvoker, PreviewStage, ScoreRenderStage, StageContext};
use crate::metrics;
use crate::protocol::TranscriptionJob;
use crate::supervisor::{LaunchSpec, ProcessSupervisor};
use crate::worker::{WorkerError, WorkerOptions, WorkerSession};

use super::error::ItemError;
use super::failure::{FailureCode, FailurePriority};
use super::types::{
    BatchOutcome, BatchStatus, ItemArtifacts, ItemFailure, ItemOutcome, ItemResult, UploadItem,
    WorkerSummary,
};
use super::workspace::ItemWorkspace;

/// Drives one batch: validation, worker session, per-item pipelines.
pub struct BatchDriver {
    supervisor: ProcessSupervisor,
    worker: WorkerConfig,
    options: WorkerOptions,
    storage: StorageConfig,
    batch: BatchConfig,
    priority: FailurePriority,
    stages: Vec<Arc<dyn ArtifactStage>>,
}

impl BatchDriver {
    /// Builds a driver with the score and preview helper stages.
    pub fn new(config: &Config) -> Self {
        let supervisor = ProcessSupervisor::from_config(&config.process);
        let invoker = HelperInvoker::new(supervisor.clone());
        let stages: Vec<Arc<dyn ArtifactStage>> = vec![
            Arc::new(ScoreRenderStage::new(
                invoker.clone(),
                config.helpers.score.clone(),
            )),
            Arc::new(PreviewStage::new(invoker, config.helpers.preview.clone())),
        ];

        Self {
            supervisor,
            worker: config.worker.clone(),
            options: WorkerOptions::from_config(&config.worker, &config.protocol),
            storage: config.storage.clone(),
            batch: config.batch.clone(),
            priority: FailurePriority::new(config.batch.failure_priority.clone()),
            stages,
        }
    }

    /// Replaces the artifact stages run after the worker.
    pub fn with_stages(mut self, stages: Vec<Arc<dyn ArtifactStage>>) -> Self {
        self.stages = stages;
        self
    }

    /// Whether the file name carries a supported extension.
    pub fn is_supported(&self, name: &str) -> bool {
        let Some(ext) = Path::new(name).extension() else {
            return false;
        };
        let ext = format!(".{}", ext.to_string_lossy());
        self.batch
            .supported_extensions
            .iter()
            .any(|supported| supported.eq_ignore_ascii_case(&ext))
    }

    /// Processes every item and reports per-item and batch-level results.
    ///
    /// Item failures never abort sibling items. Results keep input order.
    pub async fn run(&self, items: Vec<UploadItem>, job_class: Option<&str>) -> BatchOutcome {
        if items.is_empty() {
            warn!("Rejecting empty batch");
            return self.summarize(Vec::new(), None);
        }

        let mut items = items;
        if items.len() > self.batch.max_items {
            warn!(
                received = items.len(),
                max_items = self.batch.max_items,
                "Batch too large, ignoring extra items"
            );
            items.truncate(self.batch.max_items);
        }
        info!(items = items.len(), "Processing batch");

        let mut results: Vec<Option<ItemResult>> = vec![None; items.len()];
        let mut accepted = Vec::new();
        for (index, item) in items.into_iter().enumerate() {
            if self.is_supported(&item.name) {
                accepted.push((index, item));
            } else {
                let error = ItemError::UnsupportedMedia {
                    name: item.name.clone(),
                };
                results[index] = Some(failed(item.name, None, &error));
            }
        }

        let worker = if accepted.is_empty() {
            info!("No supported items, not starting the worker");
            None
        } else {
            self.process(accepted, job_class, &mut results).await
        };

        self.summarize(results.into_iter().flatten().collect(), worker)
    }

    async fn process(
        &self,
        accepted: Vec<(usize, UploadItem)>,
        job_class: Option<&str>,
        results: &mut [Option<ItemResult>],
    ) -> Option<WorkerSummary> {
        let job_class = job_class.unwrap_or(&self.batch.default_job_class);
        let spec = LaunchSpec::worker(&self.worker, job_class);

        let session = match WorkerSession::start(&self.supervisor, &spec, self.options.clone()).await
        {
            Ok(session) => session,
            Err(e) => {
                error!(job_class, "Worker could not be started: {}", e);
                let error = ItemError::from(e);
                let failure = ItemFailure::new(error.code(), error.to_string());
                for (index, item) in accepted {
                    metrics::BATCH_ITEMS
                        .with_label_values(&[failure.code.as_str()])
                        .inc();
                    results[index] = Some(ItemResult {
                        name: item.name,
                        id: None,
                        outcome: ItemOutcome::Failure(failure.clone()),
                    });
                }
                return None;
            }
        };

        let mut pipelines = Vec::new();
        let mut worker_lost = false;
        for (index, item) in accepted {
            if !worker_lost && !session.is_alive() {
                error!(worker = %session.name(), "Worker died, remaining items will not be sent");
                worker_lost = true;
            }
            if worker_lost {
                results[index] = Some(failed(item.name, None, &ItemError::WorkerUnavailable));
                continue;
            }

            let workspace =
                match ItemWorkspace::create(&self.storage, &item.name, &item.data).await {
                    Ok(workspace) => workspace,
                    Err(e) => {
                        results[index] = Some(failed(item.name, None, &e.into()));
                        continue;
                    }
                };

            let job = TranscriptionJob::new(workspace.dir(), &item.data);
            let context = RequestContext::with_work_dir(workspace.dir());
            match session.submit(workspace.id(), &job, context).await {
                Ok(pending) => {
                    pipelines.push(self.run_item(index, item.name, workspace, pending));
                }
                Err(e) => {
                    workspace.remove().await;
                    if matches!(e, WorkerError::NotAlive { .. } | WorkerError::Protocol(_)) {
                        worker_lost = true;
                    }
                    let id = Some(workspace.id().to_string());
                    results[index] = Some(failed(item.name, id, &e.into()));
                }
            }
        }

        // Drain right away; items keep waiting on their own deadlines.
        let (completed, shutdown) = tokio::join!(join_all(pipelines), session.shutdown());
        for (index, result) in completed {
            results[index] = Some(result);
        }

        Some(WorkerSummary {
            exit_code: shutdown.code(),
            forced_kill: shutdown.was_killed(),
        })
    }

    async fn run_item(
        &self,
        index: usize,
        name: String,
        workspace: ItemWorkspace,
        pending: PendingResponse,
    ) -> (usize, ItemResult) {
        let id = workspace.id().to_string();
        let result = match self.complete_item(&workspace, pending).await {
            Ok(artifacts) => {
                info!(item_id = %id, item = %name, "Item completed");
                metrics::BATCH_ITEMS.with_label_values(&["success"]).inc();
                if let Some(secs) = self.storage.retention_secs {
                    workspace.schedule_removal(Duration::from_secs(secs));
                }
                ItemResult {
                    name,
                    id: Some(id),
                    outcome: ItemOutcome::Success(artifacts),
                }
            }
            Err(e) => {
                workspace.remove().await;
                failed(name, Some(id), &e)
            }
        };
        (index, result)
    }

    async fn complete_item(
        &self,
        workspace: &ItemWorkspace,
        pending: PendingResponse,
    ) -> Result<ItemArtifacts, ItemError> {
        let response = pending.wait().await?;
        let midi = response
            .primary_output()
            .map(Path::to_path_buf)
            .ok_or_else(|| RequestError::BadResponse {
                id: response.id.clone(),
                reason: "no output file".to_string(),
            })?;
        let midi_name = midi
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        workspace.record("midi", Value::String(midi_name)).await?;

        let ctx = StageContext {
            item_id: workspace.id().to_string(),
            work_dir: workspace.dir().to_path_buf(),
            midi_path: midi.clone(),
            media_stem: workspace.media_stem(),
            title: workspace.download_name().to_string(),
        };
        let mut outputs = BTreeMap::new();
        for stage in &self.stages {
            let output = stage.produce(&ctx).await?;
            if let Some((key, value)) = output.metadata {
                workspace.record(&key, value).await?;
            }
            if let Some(artifact) = output.artifact {
                outputs.insert(stage.name().to_string(), artifact);
            }
        }

        Ok(ItemArtifacts {
            work_dir: workspace.dir().to_path_buf(),
            midi,
            outputs,
        })
    }

    fn summarize(&self, items: Vec<ItemResult>, worker: Option<WorkerSummary>) -> BatchOutcome {
        let succeeded = items.iter().filter(|item| item.is_success()).count();
        let (status, failure_code) = if items.is_empty() {
            (BatchStatus::Failure, Some(FailureCode::BadInput))
        } else if succeeded == items.len() {
            (BatchStatus::Success, None)
        } else if succeeded > 0 {
            (BatchStatus::PartialSuccess, None)
        } else {
            let code = self
                .priority
                .most_relevant(items.iter().filter_map(|i| i.failure().map(|f| f.code)))
                .unwrap_or(FailureCode::Internal);
            (BatchStatus::Failure, Some(code))
        };
        let http_status = failure_code.map_or(200, |code| code.http_status());

        let label = match status {
            BatchStatus::Success => "success",
            BatchStatus::PartialSuccess => "partial_success",
            BatchStatus::Failure => "failure",
        };
        metrics::BATCHES.with_label_values(&[label]).inc();
        info!(
            status = label,
            succeeded,
            failed = items.len() - succeeded,
            failure_code = ?failure_code,
            "Batch finished"
        );

        BatchOutcome {
            status,
            failure_code,
            http_status,
            items,
            worker,
        }
    }
}

fn failed(name: String, id: Option<String>, error: &ItemError) -> ItemResult {
    let code = error.code();
    warn!(item = %name, item_id = ?id, code = %code, "Item failed: {}", error);
    metrics::BATCH_ITEMS.with_label_values(&[code.as_str()]).inc();
    ItemResult {
        name,
        id,
        outcome: ItemOutcome::Failure(ItemFailure::new(code, error.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn driver() -> BatchDriver {
        let config = load_config_from_str(
            r#"
[worker]
script = "ml/transcribe_stdio.py"

[helpers.score]
script = "ml/convert_to_pdf.py"

[helpers.preview]
script = "ml/image_notes_generator.py"

[batch]
max_items = 2
"#,
        )
        .unwrap();
        BatchDriver::new(&config)
    }

    #[test]
    fn test_supported_extensions() {
        let driver = driver();
        assert!(driver.is_supported("song.mp3"));
        assert!(driver.is_supported("SONG.WAV"));
        assert!(!driver.is_supported("notes.txt"));
        assert!(!driver.is_supported("mp3"));
    }

    #[tokio::test]
    async fn test_empty_batch_is_bad_input() {
        let outcome = driver().run(Vec::new(), None).await;
        assert_eq!(outcome.status, BatchStatus::Failure);
        assert_eq!(outcome.failure_code, Some(FailureCode::BadInput));
        assert_eq!(outcome.http_status, 400);
        assert!(outcome.worker.is_none());
    }

    #[tokio::test]
    async fn test_unsupported_items_never_start_worker() {
        let items = vec![
            UploadItem::new("a.txt", b"x".to_vec()),
            UploadItem::new("b.pdf", b"y".to_vec()),
            UploadItem::new("c.doc", b"z".to_vec()),
        ];
        let outcome = driver().run(items, None).await;

        // Truncated to max_items before validation.
        assert_eq!(outcome.items.len(), 2);
        assert_eq!(outcome.failure_code, Some(FailureCode::UnsupportedMedia));
        assert_eq!(outcome.http_status, 415);
        assert!(outcome.worker.is_none());
        assert!(outcome.items.iter().all(|i| i.id.is_none()));
    }
}
