//! Artifact stages that run after the worker produced an item's MIDI file.

use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::config::HelperCommandConfig;
use crate::metrics;
use crate::supervisor::LaunchSpec;

use super::error::HelperError;
use super::invoker::{HelperInvoker, HelperOutput};

/// Everything a stage needs to know about the item it works on.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub item_id: String,
    pub work_dir: PathBuf,
    /// Primary output of the worker.
    pub midi_path: PathBuf,
    /// File stem of the stored upload, used to name derived artifacts.
    pub media_stem: String,
    /// Human readable title of the item.
    pub title: String,
}

/// What a stage produced.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    /// Entry to record in the item's metadata file, if any.
    pub metadata: Option<(String, Value)>,
    /// Artifact written by the stage, if it has a single one.
    pub artifact: Option<PathBuf>,
}

/// A secondary conversion stage run once per item.
#[async_trait]
pub trait ArtifactStage: Send + Sync {
    /// Stage name used in logs and metrics.
    fn name(&self) -> &str;

    async fn produce(&self, ctx: &StageContext) -> Result<StageOutput, HelperError>;
}

/// Stage 2: renders the MIDI file into a PDF notes sheet.
///
/// Invoked as `script <midi_path> <pdf_path> <title>`.
#[derive(Debug, Clone)]
pub struct ScoreRenderStage {
    invoker: HelperInvoker,
    config: HelperCommandConfig,
}

impl ScoreRenderStage {
    pub fn new(invoker: HelperInvoker, config: HelperCommandConfig) -> Self {
        Self { invoker, config }
    }

    pub fn pdf_name(media_stem: &str) -> String {
        format!("{}.pdf", media_stem)
    }
}

#[async_trait]
impl ArtifactStage for ScoreRenderStage {
    fn name(&self) -> &str {
        "score"
    }

    async fn produce(&self, ctx: &StageContext) -> Result<StageOutput, HelperError> {
        let pdf_name = Self::pdf_name(&ctx.media_stem);
        let pdf_path = ctx.work_dir.join(&pdf_name);
        let spec = LaunchSpec::helper(&self.config).with_args([
            ctx.midi_path.to_string_lossy().into_owned(),
            pdf_path.to_string_lossy().into_owned(),
            ctx.title.clone(),
        ]);

        run_stage(&self.invoker, self.name(), &ctx.item_id, &spec, &self.config).await?;

        if !pdf_path.is_file() {
            return Err(HelperError::MissingArtifact {
                stage: self.name().to_string(),
                path: pdf_path,
            });
        }
        Ok(StageOutput {
            metadata: Some(("pdf".to_string(), Value::String(pdf_name))),
            artifact: Some(pdf_path),
        })
    }
}

/// Stage 3: renders preview images of the notes sheet.
///
/// Invoked as `script <work_dir>`. The helper records the image names in the
/// item's metadata file itself.
#[derive(Debug, Clone)]
pub struct PreviewStage {
    invoker: HelperInvoker,
    config: HelperCommandConfig,
}

impl PreviewStage {
    pub fn new(invoker: HelperInvoker, config: HelperCommandConfig) -> Self {
        Self { invoker, config }
    }
}

#[async_trait]
impl ArtifactStage for PreviewStage {
    fn name(&self) -> &str {
        "preview"
    }

    async fn produce(&self, ctx: &StageContext) -> Result<StageOutput, HelperError> {
        let spec = LaunchSpec::helper(&self.config)
            .with_args([ctx.work_dir.to_string_lossy().into_owned()]);
        run_stage(&self.invoker, self.name(), &ctx.item_id, &spec, &self.config).await?;
        Ok(StageOutput::default())
    }
}

async fn run_stage(
    invoker: &HelperInvoker,
    stage: &str,
    item_id: &str,
    spec: &LaunchSpec,
    config: &HelperCommandConfig,
) -> Result<HelperOutput, HelperError> {
    let started = Instant::now();
    let result = invoker
        .run(spec, config.timeout(), config.ready_sentinel.as_deref())
        .await;

    metrics::HELPER_DURATION
        .with_label_values(&[stage])
        .observe(started.elapsed().as_secs_f64());
    let label = match &result {
        Ok(_) => "success",
        Err(e) => e.result_label(),
    };
    metrics::HELPER_RUNS.with_label_values(&[stage, label]).inc();
    if result.is_ok() {
        info!(item_id = %item_id, stage, "Stage finished");
    }
    result
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::supervisor::ProcessSupervisor;
    use tempfile::TempDir;

    fn helper_config(script: &str) -> HelperCommandConfig {
        HelperCommandConfig {
            launcher: "sh".to_string(),
            launcher_args: vec!["-c".to_string(), script.to_string()],
            script: PathBuf::from("stage"),
            timeout_ms: 5_000,
            ready_sentinel: None,
        }
    }

    fn invoker() -> HelperInvoker {
        HelperInvoker::new(ProcessSupervisor::new(vec!["sh".to_string()], 0))
    }

    fn context(dir: &TempDir) -> StageContext {
        StageContext {
            item_id: "item".to_string(),
            work_dir: dir.path().to_path_buf(),
            midi_path: dir.path().join("song.mid"),
            media_stem: "song-item".to_string(),
            title: "song".to_string(),
        }
    }

    // With `sh -c script stage a b c`, `$0` is "stage" and `$1..` are the args.

    #[tokio::test]
    async fn test_score_stage_records_pdf() {
        let dir = TempDir::new().unwrap();
        let stage = ScoreRenderStage::new(invoker(), helper_config("touch \"$2\""));
        let output = stage.produce(&context(&dir)).await.unwrap();

        assert_eq!(
            output.metadata,
            Some(("pdf".to_string(), Value::String("song-item.pdf".to_string())))
        );
        assert_eq!(output.artifact, Some(dir.path().join("song-item.pdf")));
    }

    #[tokio::test]
    async fn test_score_stage_without_pdf_fails() {
        let dir = TempDir::new().unwrap();
        let stage = ScoreRenderStage::new(invoker(), helper_config("exit 0"));
        let err = stage.produce(&context(&dir)).await.unwrap_err();
        assert!(matches!(err, HelperError::MissingArtifact { .. }));
    }

    #[tokio::test]
    async fn test_preview_stage_gets_work_dir() {
        let dir = TempDir::new().unwrap();
        let stage = PreviewStage::new(invoker(), helper_config("touch \"$1/preview-1.png\""));
        stage.produce(&context(&dir)).await.unwrap();
        assert!(dir.path().join("preview-1.png").is_file());
    }

    #[tokio::test]
    async fn test_preview_stage_failure() {
        let dir = TempDir::new().unwrap();
        let stage = PreviewStage::new(invoker(), helper_config("exit 4"));
        let err = stage.produce(&context(&dir)).await.unwrap_err();
        assert!(matches!(err, HelperError::Failed { code: Some(4), .. }));
    }
}
