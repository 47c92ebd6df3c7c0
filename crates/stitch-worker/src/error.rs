//! Worker error types.

use serde::Serialize;
use std::fmt;
use stitch_media::MediaError;
use stitch_models::{ManifestError, Stage};
use stitch_storage::StorageError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Failure category reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Geometry,
    EmptyCropInput,
    TranscodeFailure,
    Timeout,
    HardwareUnavailable,
    UnsupportedOverlayKind,
    TransferFailure,
    ManifestParseError,
    ConfigError,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Geometry => "geometry",
            ErrorKind::EmptyCropInput => "empty_crop_input",
            ErrorKind::TranscodeFailure => "transcode_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::HardwareUnavailable => "hardware_unavailable",
            ErrorKind::UnsupportedOverlayKind => "unsupported_overlay_kind",
            ErrorKind::TransferFailure => "transfer_failure",
            ErrorKind::ManifestParseError => "manifest_parse_error",
            ErrorKind::ConfigError => "config_error",
            ErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{stage} stage: {source}")]
    Media {
        stage: Stage,
        #[source]
        source: MediaError,
    },

    #[error("{stage} stage: {source}")]
    Transfer {
        stage: Stage,
        #[source]
        source: StorageError,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Hardware encoder {0} requested but not available")]
    HardwareUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn media(stage: Stage, source: MediaError) -> Self {
        Self::Media { stage, source }
    }

    pub fn transfer(stage: Stage, source: StorageError) -> Self {
        Self::Transfer { stage, source }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Stage the failure originated in.
    pub fn stage(&self) -> Stage {
        match self {
            WorkerError::Media { stage, .. } | WorkerError::Transfer { stage, .. } => *stage,
            WorkerError::Manifest(_)
            | WorkerError::HardwareUnavailable(_)
            | WorkerError::ConfigError(_) => Stage::Validate,
            // Scratch setup and output moves
            WorkerError::Io(_) => Stage::Publish,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::Media { source, .. } => match source {
                MediaError::Geometry { .. } | MediaError::InvalidVideo(_) => ErrorKind::Geometry,
                MediaError::EmptyCropInput(_) => ErrorKind::EmptyCropInput,
                MediaError::Timeout { .. } => ErrorKind::Timeout,
                MediaError::HardwareUnavailable(_) => ErrorKind::HardwareUnavailable,
                MediaError::UnsupportedOverlayKind { .. } => ErrorKind::UnsupportedOverlayKind,
                MediaError::FileNotFound(_) => ErrorKind::TransferFailure,
                MediaError::Io(_) => ErrorKind::Io,
                _ => ErrorKind::TranscodeFailure,
            },
            WorkerError::Transfer { source, .. } => match source {
                StorageError::Config(_) => ErrorKind::ConfigError,
                _ => ErrorKind::TransferFailure,
            },
            WorkerError::Manifest(_) => ErrorKind::ManifestParseError,
            WorkerError::HardwareUnavailable(_) => ErrorKind::HardwareUnavailable,
            WorkerError::ConfigError(_) => ErrorKind::ConfigError,
            WorkerError::Io(_) => ErrorKind::Io,
        }
    }

    /// Captured FFmpeg stderr excerpt, if any.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            WorkerError::Media { source, .. } => source.diagnostic(),
            _ => None,
        }
    }

    /// Check if the clip should pass through uncropped instead of failing the run.
    pub fn is_soft_crop_failure(&self) -> bool {
        self.kind() == ErrorKind::EmptyCropInput
    }

    pub fn report(&self) -> FailureReport {
        FailureReport {
            stage: self.stage(),
            kind: self.kind(),
            message: self.to_string(),
            diagnostic: self.diagnostic().map(str::to_string),
        }
    }
}

/// Terminal failure record printed by the worker binary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReport {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

/// Attach the originating stage to a crate-level error.
pub trait AtStage<T> {
    fn at_stage(self, stage: Stage) -> WorkerResult<T>;
}

impl<T> AtStage<T> for Result<T, MediaError> {
    fn at_stage(self, stage: Stage) -> WorkerResult<T> {
        self.map_err(|e| WorkerError::media(stage, e))
    }
}

impl<T> AtStage<T> for Result<T, StorageError> {
    fn at_stage(self, stage: Stage) -> WorkerResult<T> {
        self.map_err(|e| WorkerError::transfer(stage, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stitch_media::Termination;
    use stitch_models::ManifestKind;

    #[test]
    fn test_transcode_failure_carries_diagnostic() {
        let err = WorkerError::media(
            Stage::Join,
            MediaError::transcode_failed("xfade", Termination::Signal(9), "Killed"),
        );
        let report = err.report();

        assert_eq!(report.stage, Stage::Join);
        assert_eq!(report.kind, ErrorKind::TranscodeFailure);
        assert_eq!(report.diagnostic.as_deref(), Some("Killed"));
        assert!(report.message.contains("possible resource exhaustion"));
    }

    #[test]
    fn test_manifest_errors_belong_to_validation() {
        let err: WorkerError = ManifestError::invalid(ManifestKind::Clips, "no clips listed").into();
        assert_eq!(err.stage(), Stage::Validate);
        assert_eq!(err.kind(), ErrorKind::ManifestParseError);
    }

    #[test]
    fn test_only_empty_crop_is_soft() {
        let soft = WorkerError::media(Stage::Crop, MediaError::empty_crop("zero width"));
        let hard = WorkerError::media(Stage::Crop, MediaError::geometry("a.mp4", "no stream"));
        assert!(soft.is_soft_crop_failure());
        assert!(!hard.is_soft_crop_failure());
        assert_eq!(hard.kind(), ErrorKind::Geometry);
    }

    #[test]
    fn test_storage_errors_are_transfer_failures() {
        let err = Err::<(), _>(StorageError::not_found("media", "a.mp4"))
            .at_stage(Stage::Fetch)
            .unwrap_err();
        assert_eq!(err.stage(), Stage::Fetch);
        assert_eq!(err.kind(), ErrorKind::TransferFailure);

        let json = serde_json::to_value(err.report()).unwrap();
        assert_eq!(json["stage"], "fetch");
        assert_eq!(json["kind"], "transfer_failure");
        assert!(json.get("diagnostic").is_none());
    }
}
