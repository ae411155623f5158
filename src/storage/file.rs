// Local file system artifact storage

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::StorageBackend;
use crate::{BackupError, Result};

/// Stores each artifact as a file below a root directory.
///
/// Keys are relative paths; the returned location is the same relative key,
/// so a catalog stays valid if the root directory moves.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(BackupError::Storage(format!("Invalid artifact key: {}", key)));
        }
        Ok(self.root.join(relative))
    }
}

async fn write_then_rename(tmp_path: &Path, path: &Path, data: &[u8]) -> Result<()> {
    let mut file = fs::File::create(tmp_path)
        .await
        .map_err(|e| BackupError::Io(format!("Failed to create backup file: {}", e)))?;
    file.write_all(data)
        .await
        .map_err(|e| BackupError::Io(format!("Failed to write backup data: {}", e)))?;
    file.sync_all()
        .await
        .map_err(|e| BackupError::Io(format!("Failed to flush backup data: {}", e)))?;
    drop(file);

    fs::rename(tmp_path, path)
        .await
        .map_err(|e| BackupError::Io(format!("Failed to finalize backup file: {}", e)))
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<String> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BackupError::Io(format!("Failed to create backup directory: {}", e)))?;
        }

        // Write to a sibling temp file first so a crash never leaves a truncated artifact.
        let tmp_path = path.with_extension("partial");
        if let Err(e) = write_then_rename(&tmp_path, &path, &data).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e);
        }

        debug!(path = %path.display(), bytes = data.len(), "Artifact written");
        Ok(key.to_string())
    }

    async fn get(&self, location: &str) -> Result<Vec<u8>> {
        let path = self.resolve(location)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(BackupError::Storage(format!("Artifact {} not found", location)));
        }
        fs::read(&path)
            .await
            .map_err(|e| BackupError::Io(format!("Failed to read backup data: {}", e)))
    }

    async fn delete(&self, location: &str) -> Result<()> {
        let path = self.resolve(location)?;
        if fs::try_exists(&path).await.unwrap_or(false) {
            fs::remove_file(&path)
                .await
                .map_err(|e| BackupError::Io(format!("Failed to delete backup file: {}", e)))?;
        }
        Ok(())
    }

    async fn exists(&self, location: &str) -> Result<bool> {
        let path = self.resolve(location)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }
}
