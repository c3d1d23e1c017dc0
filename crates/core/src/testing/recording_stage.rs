//! Artifact stage that records its calls.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::helper::{ArtifactStage, HelperError, StageContext, StageOutput};

/// In-process [`ArtifactStage`] for tests.
///
/// Records every context it is called with and records `true` under its own
/// name in the item metadata. Items whose title is listed in `fail_titles`
/// fail with [`HelperError::Failed`].
#[derive(Debug, Clone)]
pub struct RecordingStage {
    name: String,
    calls: Arc<RwLock<Vec<StageContext>>>,
    fail_titles: Arc<RwLock<Vec<String>>>,
}

impl RecordingStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: Arc::new(RwLock::new(Vec::new())),
            fail_titles: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Fail for items with this title.
    pub async fn fail_for(&self, title: impl Into<String>) {
        self.fail_titles.write().await.push(title.into());
    }

    /// Contexts seen so far, in call order.
    pub async fn calls(&self) -> Vec<StageContext> {
        self.calls.read().await.clone()
    }
}

#[async_trait]
impl ArtifactStage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn produce(&self, ctx: &StageContext) -> Result<StageOutput, HelperError> {
        self.calls.write().await.push(ctx.clone());

        if self.fail_titles.read().await.contains(&ctx.title) {
            return Err(HelperError::Failed {
                name: self.name.clone(),
                code: Some(1),
                stderr: format!("refusing {}", ctx.title),
            });
        }

        Ok(StageOutput {
            metadata: Some((self.name.clone(), Value::Bool(true))),
            artifact: None,
        })
    }
}
