//! Filesystem-backed object store.
//!
//! Each bucket is a directory under the root and keys are relative paths,
//! which makes local benchmark runs and tests independent of S3.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::store::{local_file_for, local_path_for, validate_key, ObjectStore};

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path backing an object.
    pub fn object_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        validate_key(bucket)?;
        validate_key(key)?;
        Ok(self.root.join(bucket).join(key))
    }

    /// All keys in a bucket, sorted.
    async fn keys(&self, bucket: &str) -> StorageResult<Vec<String>> {
        validate_key(bucket)?;
        let bucket_dir = self.root.join(bucket);
        let mut keys = Vec::new();
        let mut pending = vec![bucket_dir.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::list_failed(dir.display().to_string(), e)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&bucket_dir) {
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

async fn copy_into(src: &Path, dst: &Path) -> StorageResult<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::copy(src, dst).await?;
    Ok(())
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn fetch(&self, bucket: &str, key: &str, dest_dir: &Path) -> StorageResult<PathBuf> {
        let src = self.object_path(bucket, key)?;
        if !fs::try_exists(&src).await? {
            return Err(StorageError::not_found(bucket, key));
        }
        let dst = local_file_for(dest_dir, key);
        copy_into(&src, &dst).await?;
        debug!("Fetched {} -> {}", src.display(), dst.display());
        Ok(dst)
    }

    async fn fetch_prefix(
        &self,
        bucket: &str,
        prefix: &str,
        dest_dir: &Path,
    ) -> StorageResult<Vec<PathBuf>> {
        let keys: Vec<String> = self
            .keys(bucket)
            .await?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect();
        if keys.is_empty() {
            return Err(StorageError::not_found(bucket, prefix));
        }

        let mut paths = Vec::with_capacity(keys.len());
        for key in &keys {
            let dst = local_path_for(dest_dir, prefix, key);
            copy_into(&self.object_path(bucket, key)?, &dst).await?;
            paths.push(dst);
        }
        Ok(paths)
    }

    async fn publish(&self, bucket: &str, key: &str, local: &Path) -> StorageResult<()> {
        let dst = self.object_path(bucket, key)?;
        copy_into(local, &dst).await.map_err(|e| {
            StorageError::publish_failed(format!("{} -> {}", local.display(), dst.display()), e)
        })?;
        debug!("Published {} -> {}", local.display(), dst.display());
        Ok(())
    }
}
