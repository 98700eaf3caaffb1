use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use tokio::fs;

use super::{ObjectStore, StorageResult};

/// Filesystem-backed object storage rooted at a base directory. Paths are
/// relative keys; traversal outside the root is rejected.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        if path.is_empty() || path.contains("..") || path.starts_with('/') {
            return Err(anyhow!("invalid object path: {path}"));
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn upload_file(&self, path: &str, bytes: &[u8]) -> StorageResult<()> {
        let target = self.resolve(path)?;
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        fs::write(&target, bytes)
            .await
            .with_context(|| format!("failed to write object {}", target.display()))
    }

    async fn get_file(&self, path: &str) -> StorageResult<Vec<u8>> {
        let target = self.resolve(path)?;
        fs::read(&target)
            .await
            .with_context(|| format!("failed to read object {}", target.display()))
    }

    async fn delete_file(&self, path: &str) -> StorageResult<()> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to delete object {}", target.display()))
            }
        }
    }

    async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(target) => target.exists(),
            Err(_) => false,
        }
    }
}
