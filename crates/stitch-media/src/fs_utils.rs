//! Scratch areas and file moves for intermediate renders.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Per-run directory for crop outputs, filter scripts and join intermediates.
///
/// The directory and everything in it is removed when the area is dropped,
/// whether the run succeeded or not.
#[derive(Debug)]
pub struct ScratchArea {
    dir: TempDir,
    counter: AtomicUsize,
}

impl ScratchArea {
    /// Create a fresh scratch directory under `root`.
    pub fn create_in(root: impl AsRef<Path>, prefix: &str) -> MediaResult<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new().prefix(prefix).tempdir_in(root)?;
        debug!(path = %dir.path().display(), "Created scratch area");
        Ok(Self {
            dir,
            counter: AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path for a named file inside the area.
    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Unique path such as `merge_0003.mp4`.
    pub fn next_path(&self, stem: &str, extension: &str) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        self.join(format!("{}_{:04}.{}", stem, n, extension))
    }

    /// Subdirectory inside the area, created on demand.
    pub async fn subdir(&self, name: &str) -> MediaResult<PathBuf> {
        let path = self.join(name);
        fs::create_dir_all(&path).await?;
        Ok(path)
    }
}

/// Delete a file, logging instead of failing.
pub async fn remove_quietly(path: impl AsRef<Path>) {
    let path = path.as_ref();
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Move a file from `src` to `dst`, handling cross-device moves.
///
/// Tries a rename first; on EXDEV it copies into a sibling temp file and
/// renames that into place.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            debug!(
                "Cross-device rename, copying instead: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_then_remove(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// EXDEV is error code 18 on Linux and macOS.
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

async fn copy_then_remove(src: &Path, dst: &Path) -> MediaResult<()> {
    let staging = dst.with_extension("partial");

    fs::copy(src, &staging).await?;
    if let Err(e) = fs::rename(&staging, dst).await {
        remove_quietly(&staging).await;
        return Err(e.into());
    }
    remove_quietly(src).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scratch_area_removed_on_drop() {
        let root = TempDir::new().unwrap();
        let scratch = ScratchArea::create_in(root.path(), "run-").unwrap();
        let dir = scratch.path().to_path_buf();
        fs::write(scratch.join("merge.mp4"), b"x").await.unwrap();
        assert!(dir.exists());

        drop(scratch);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_scratch_areas_are_unique() {
        let root = TempDir::new().unwrap();
        let a = ScratchArea::create_in(root.path(), "run-").unwrap();
        let b = ScratchArea::create_in(root.path(), "run-").unwrap();
        assert_ne!(a.path(), b.path());

        let first = a.next_path("merge", "mp4");
        let second = a.next_path("merge", "mp4");
        assert_ne!(first, second);
        assert!(first.ends_with("merge_0000.mp4"));
    }

    #[tokio::test]
    async fn test_move_file_to_subdirectory() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("render.mp4");
        let dst = dir.path().join("out").join("package.mp4");
        fs::write(&src, b"video").await.unwrap();

        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"video");
    }

    #[tokio::test]
    async fn test_remove_quietly_ignores_missing() {
        let dir = TempDir::new().unwrap();
        remove_quietly(dir.path().join("missing.mp4")).await;
    }

    #[test]
    fn test_is_cross_device_error() {
        assert!(is_cross_device_error(&std::io::Error::from_raw_os_error(18)));
        assert!(!is_cross_device_error(&std::io::Error::from_raw_os_error(2)));
    }
}
