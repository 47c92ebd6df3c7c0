//! FFmpeg CLI wrapper for the stitch packaging pipeline.
//!
//! This crate provides:
//! - FFmpeg command building and a subprocess runner behind [`Transcoder`]
//! - FFprobe-based geometry probing behind [`Prober`]
//! - The aspect-crop track builder
//! - Concat and crossfade waterfall joins
//! - The overlay timeline compositor
//! - Per-run scratch areas

pub mod command;
pub mod crop;
pub mod error;
pub mod fs_utils;
pub mod join;
pub mod overlay;
pub mod probe;
pub mod progress;

pub use command::{
    check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegInput, FfmpegRunner, Transcoder,
};
pub use crop::{crop_box, crop_clip, CropBox, CropJob, CropTrack, CroppedClip};
pub use error::{MediaError, MediaResult, Termination};
pub use fs_utils::{move_file, remove_quietly, ScratchArea};
pub use join::{
    crossfade_offset, execute_join, JoinOutcome, JoinPlan, JoinSettings, Normalization,
    Transition,
};
pub use overlay::{composite, plan_layers, LayerSource, OverlayLayer};
pub use probe::{FfprobeProber, Prober, VideoInfo};
pub use progress::FfmpegProgress;
