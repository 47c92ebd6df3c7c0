//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use stitch_models::{EncodingConfig, Resolution};

/// Constants for one pipeline instance.
///
/// Passed into [`crate::Pipeline`] at construction so runs with different
/// settings can share a process.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root for per-run scratch directories
    pub work_dir: PathBuf,
    /// Encoder settings shared by every transform step
    pub encoding: EncodingConfig,
    /// Crossfade length when the request does not set one
    pub fade_duration: f64,
    /// Subtracted from each crossfade offset so the fade ends before the last frame
    pub xfade_safety_buffer: f64,
    /// Clips per transition group (reported only)
    pub batch_size: usize,
    /// Clips per transition group when clips are cropped (reported only)
    pub batch_size_aspect_crop: usize,
    /// Join frame rate once clips have been cropped to vertical
    pub package_fps_vertical: u32,
    /// Canonical output size for cropped packages
    pub vertical_resolution: Resolution,
    /// Hard limit for a single FFmpeg invocation
    pub ffmpeg_timeout: Duration,
    /// Characters of stderr kept for failure reports
    pub stderr_tail_chars: usize,
    /// Bucket for outputs when the request names none
    pub default_bucket: String,
    /// Key prefix for generated output names
    pub output_prefix: String,
    /// Serve objects from this directory instead of S3
    pub local_store_root: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/stitch"),
            encoding: EncodingConfig::default(),
            fade_duration: 1.0,
            xfade_safety_buffer: 0.12,
            batch_size: 12,
            batch_size_aspect_crop: 12,
            package_fps_vertical: 50,
            vertical_resolution: Resolution::VERTICAL,
            ffmpeg_timeout: Duration::from_secs(3600), // 1 hour
            stderr_tail_chars: 1000,
            default_bucket: "si-davs-playgroundvideos".to_string(),
            output_prefix: "packagetest/".to_string(),
            local_store_root: None,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            work_dir: std::env::var("STITCH_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            encoding: match std::env::var("STITCH_VIDEO_BITRATE") {
                Ok(bitrate) if !bitrate.trim().is_empty() => {
                    defaults.encoding.with_video_bitrate(bitrate.trim())
                }
                _ => defaults.encoding,
            },
            fade_duration: std::env::var("STITCH_FADE_DURATION")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v: &f64| v.is_finite() && *v >= 0.0)
                .unwrap_or(defaults.fade_duration),
            xfade_safety_buffer: std::env::var("STITCH_XFADE_SAFETY_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v: &f64| v.is_finite() && *v >= 0.0)
                .unwrap_or(defaults.xfade_safety_buffer),
            batch_size: std::env::var("STITCH_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.batch_size),
            batch_size_aspect_crop: std::env::var("STITCH_BATCH_SIZE_ASPECT_CROP")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.batch_size_aspect_crop),
            package_fps_vertical: std::env::var("STITCH_PACKAGE_FPS_VERTICAL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.package_fps_vertical),
            vertical_resolution: std::env::var("STITCH_VERTICAL_RESOLUTION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.vertical_resolution),
            ffmpeg_timeout: Duration::from_secs(
                std::env::var("STITCH_FFMPEG_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
            stderr_tail_chars: std::env::var("STITCH_STDERR_TAIL_CHARS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.stderr_tail_chars),
            default_bucket: std::env::var("STITCH_DEFAULT_BUCKET")
                .unwrap_or(defaults.default_bucket),
            output_prefix: std::env::var("STITCH_OUTPUT_PREFIX")
                .unwrap_or(defaults.output_prefix),
            local_store_root: std::env::var("STITCH_LOCAL_STORE_ROOT")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    /// Batch threshold that applies to a run.
    pub fn batch_size_for(&self, cropped: bool) -> usize {
        if cropped {
            self.batch_size_aspect_crop
        } else {
            self.batch_size
        }
    }

    /// Forced join frame rate; uncropped packages keep their source rate.
    pub fn package_fps_for(&self, cropped: bool) -> Option<u32> {
        cropped.then_some(self.package_fps_vertical)
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.encoding.video_bitrate, "5M");
        assert_eq!(config.fade_duration, 1.0);
        assert_eq!(config.xfade_safety_buffer, 0.12);
        assert_eq!(config.batch_size, 12);
        assert_eq!(config.vertical_resolution, Resolution::new(1080, 1920));
        assert_eq!(config.ffmpeg_timeout, Duration::from_secs(3600));
        assert!(config.local_store_root.is_none());
    }

    #[test]
    fn test_cropped_runs_use_vertical_settings() {
        let config = PipelineConfig {
            batch_size: 8,
            batch_size_aspect_crop: 4,
            ..PipelineConfig::default()
        };
        assert_eq!(config.batch_size_for(false), 8);
        assert_eq!(config.batch_size_for(true), 4);
        assert_eq!(config.package_fps_for(false), None);
        assert_eq!(config.package_fps_for(true), Some(50));
    }
}
