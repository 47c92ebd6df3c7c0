//! The object store seam used by the pipeline.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use crate::error::{StorageError, StorageResult};

/// Remote storage for clips, overlay assets and published packages.
///
/// Operations may be slow; none of them retry.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download one object into `dest_dir`, returning the local path.
    async fn fetch(&self, bucket: &str, key: &str, dest_dir: &Path) -> StorageResult<PathBuf>;

    /// Download every object whose key starts with `prefix`.
    ///
    /// Paths below the prefix's directory are preserved under `dest_dir`.
    async fn fetch_prefix(
        &self,
        bucket: &str,
        prefix: &str,
        dest_dir: &Path,
    ) -> StorageResult<Vec<PathBuf>>;

    /// Upload a local file as `key`.
    async fn publish(&self, bucket: &str, key: &str, local: &Path) -> StorageResult<()>;
}

/// Reject keys that are empty or would escape a directory when used as a path.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.trim().is_empty() {
        return Err(StorageError::InvalidKey("empty key".to_string()));
    }
    let escapes = Path::new(key)
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if escapes {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Directory part of a key prefix: `gfx/lower/frame_` -> `gfx/lower/`.
pub fn prefix_dir(prefix: &str) -> &str {
    match prefix.rfind('/') {
        Some(idx) => &prefix[..=idx],
        None => "",
    }
}

/// Local destination for `key` when fetched as part of `prefix`.
pub fn local_path_for(dest_dir: &Path, prefix: &str, key: &str) -> PathBuf {
    let relative = key.strip_prefix(prefix_dir(prefix)).unwrap_or(key);
    dest_dir.join(relative)
}

/// Local destination for a single fetched object.
pub fn local_file_for(dest_dir: &Path, key: &str) -> PathBuf {
    let name = key
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(key);
    dest_dir.join(name)
}

/// Content type used when publishing.
pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("json") => "application/json",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}
