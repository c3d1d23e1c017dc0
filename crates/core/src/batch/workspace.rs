//! Per-item working directories.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::StorageConfig;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid metadata in {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The item directory or its metadata disappeared while in use.
    #[error("Item data was removed: {path}")]
    Removed { path: PathBuf },
}

impl WorkspaceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == ErrorKind::NotFound {
            Self::Removed {
                path: path.to_path_buf(),
            }
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// A fresh directory holding one item's upload, metadata and artifacts.
#[derive(Debug, Clone)]
pub struct ItemWorkspace {
    id: String,
    dir: PathBuf,
    metadata_path: PathBuf,
    media_name: String,
    download_name: String,
}

impl ItemWorkspace {
    /// Creates `<upload_dir>/<uuid>/` with its metadata file and, if
    /// configured, the uploaded bytes stored as `<stem>-<uuid><ext>`.
    pub async fn create(
        storage: &StorageConfig,
        original_name: &str,
        data: &[u8],
    ) -> Result<Self, WorkspaceError> {
        let id = Uuid::new_v4().to_string();
        let dir = storage.upload_dir.join(&id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| WorkspaceError::io(&dir, e))?;

        // Only the final component of the client-supplied name is trusted.
        let file_name = Path::new(original_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let file_path = Path::new(&file_name);
        let stem = file_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.clone());
        let ext = file_path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let media_name = format!("{}-{}{}", stem, id, ext);

        let workspace = Self {
            metadata_path: dir.join(&storage.metadata_file_name),
            id,
            dir,
            media_name,
            download_name: stem,
        };

        let metadata = json!({
            "id": workspace.id,
            "originalName": file_name,
            "mediaName": workspace.media_name,
            "downloadName": workspace.download_name,
            "createdAt": Utc::now().to_rfc3339(),
        });
        let written = async {
            if storage.save_uploads {
                let media_path = workspace.dir.join(&workspace.media_name);
                tokio::fs::write(&media_path, data)
                    .await
                    .map_err(|e| WorkspaceError::io(&media_path, e))?;
            }
            workspace.write_metadata(metadata_map(metadata)).await
        }
        .await;
        if let Err(e) = written {
            workspace.remove().await;
            return Err(e);
        }

        debug!(item_id = %workspace.id, dir = %workspace.dir.display(), "Item workspace created");
        Ok(workspace)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    /// Name of the stored upload, `<stem>-<id><ext>`.
    pub fn media_name(&self) -> &str {
        &self.media_name
    }

    pub fn media_stem(&self) -> String {
        Path::new(&self.media_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.media_name.clone())
    }

    /// Name offered for downloads, the stem of the original file name.
    pub fn download_name(&self) -> &str {
        &self.download_name
    }

    pub async fn read_metadata(&self) -> Result<Map<String, Value>, WorkspaceError> {
        let raw = tokio::fs::read(&self.metadata_path)
            .await
            .map_err(|e| WorkspaceError::io(&self.metadata_path, e))?;
        serde_json::from_slice(&raw).map_err(|source| WorkspaceError::Metadata {
            path: self.metadata_path.clone(),
            source,
        })
    }

    /// Adds or replaces one key of the metadata file.
    pub async fn record(&self, key: &str, value: Value) -> Result<(), WorkspaceError> {
        let mut metadata = self.read_metadata().await?;
        metadata.insert(key.to_string(), value);
        self.write_metadata(metadata).await
    }

    async fn write_metadata(&self, metadata: Map<String, Value>) -> Result<(), WorkspaceError> {
        let raw = serde_json::to_vec(&metadata).map_err(|source| WorkspaceError::Metadata {
            path: self.metadata_path.clone(),
            source,
        })?;
        tokio::fs::write(&self.metadata_path, raw)
            .await
            .map_err(|e| WorkspaceError::io(&self.metadata_path, e))
    }

    /// Deletes the directory and everything in it. Missing directories are fine.
    pub async fn remove(&self) {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => debug!(item_id = %self.id, "Item workspace removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(item_id = %self.id, "Failed to remove {}: {}", self.dir.display(), e),
        }
    }

    /// Removes the directory after `delay` on a background task.
    pub fn schedule_removal(&self, delay: Duration) -> JoinHandle<()> {
        let workspace = self.clone();
        info!(item_id = %self.id, delay_secs = delay.as_secs(), "Scheduled workspace removal");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            workspace.remove().await;
        })
    }
}

fn metadata_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
