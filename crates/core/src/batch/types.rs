//! Types for the batch module.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use super::failure::FailureCode;

/// One uploaded file.
#[derive(Debug, Clone)]
pub struct UploadItem {
    /// File name as supplied by the client.
    pub name: String,
    pub data: Vec<u8>,
}

impl UploadItem {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Files produced for a successful item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemArtifacts {
    pub work_dir: PathBuf,
    pub midi: PathBuf,
    /// Artifacts of the helper stages, by stage name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemFailure {
    pub code: FailureCode,
    pub status: u16,
    pub message: String,
}

impl ItemFailure {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            status: code.http_status(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ItemOutcome {
    Success(ItemArtifacts),
    Failure(ItemFailure),
}

/// Result of one item, in submission order within the batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemResult {
    pub name: String,
    /// Assigned id, once the item got a workspace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

impl ItemResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Success(_))
    }

    pub fn failure(&self) -> Option<&ItemFailure> {
        match &self.outcome {
            ItemOutcome::Failure(failure) => Some(failure),
            ItemOutcome::Success(_) => None,
        }
    }

    pub fn artifacts(&self) -> Option<&ItemArtifacts> {
        match &self.outcome {
            ItemOutcome::Success(artifacts) => Some(artifacts),
            ItemOutcome::Failure(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every item succeeded.
    Success,
    /// At least one item succeeded and at least one failed.
    PartialSuccess,
    /// No item succeeded.
    Failure,
}

/// How the worker session of a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub exit_code: Option<i32>,
    pub forced_kill: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub status: BatchStatus,
    /// The single most relevant failure code when no item succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<FailureCode>,
    pub http_status: u16,
    pub items: Vec<ItemResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerSummary>,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> impl Iterator<Item = &ItemResult> {
        self.items.iter().filter(|item| item.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &ItemResult> {
        self.items.iter().filter(|item| !item.is_success())
    }
}
