//! Error types for media operations.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// How a failed FFmpeg process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Clean exit with a non-zero status
    ExitCode(i32),
    /// Killed by a signal (often the OOM killer)
    Signal(i32),
    /// Neither code nor signal was reported
    Unknown,
}

impl Termination {
    pub fn is_signal(&self) -> bool {
        matches!(self, Termination::Signal(_))
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::ExitCode(code) => write!(f, "exit code {}", code),
            Termination::Signal(signal) => {
                write!(f, "signal {} (possible resource exhaustion)", signal)
            }
            Termination::Unknown => write!(f, "unknown termination"),
        }
    }
}

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg {label} failed with {termination}")]
    TranscodeFailed {
        label: String,
        termination: Termination,
        stderr_tail: String,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("FFmpeg {label} timed out after {secs} seconds")]
    Timeout { label: String, secs: u64 },

    #[error("Cannot determine geometry of {path}: {reason}")]
    Geometry { path: PathBuf, reason: String },

    #[error("Crop box is empty: {0}")]
    EmptyCropInput(String),

    #[error("Overlay event {index} has no source for its kind: {reason}")]
    UnsupportedOverlayKind { index: usize, reason: String },

    #[error("Hardware encoder {0} is not available")]
    HardwareUnavailable(String),

    #[error("Nothing to join")]
    EmptyJoin,

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),
}

impl MediaError {
    /// Create a transcode failure error.
    pub fn transcode_failed(
        label: impl Into<String>,
        termination: Termination,
        stderr_tail: impl Into<String>,
    ) -> Self {
        Self::TranscodeFailed {
            label: label.into(),
            termination,
            stderr_tail: stderr_tail.into(),
        }
    }

    /// Create a geometry error.
    pub fn geometry(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Geometry {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an empty crop box error.
    pub fn empty_crop(reason: impl Into<String>) -> Self {
        Self::EmptyCropInput(reason.into())
    }

    /// Create an unsupported overlay error.
    pub fn unsupported_overlay(index: usize, reason: impl Into<String>) -> Self {
        Self::UnsupportedOverlayKind {
            index,
            reason: reason.into(),
        }
    }

    /// Captured stderr excerpt, if the failure carries one.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::TranscodeFailed { stderr_tail, .. } if !stderr_tail.is_empty() => {
                Some(stderr_tail)
            }
            Self::FfprobeFailed {
                stderr: Some(stderr),
                ..
            } if !stderr.is_empty() => Some(stderr),
            _ => None,
        }
    }
}
