//! Shared data models for the stitch packaging pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Clip descriptors and package ordering
//! - Crop keyframes and target aspect ratios
//! - Overlay events and timelines
//! - Encoding configuration
//! - Stage timing and run reports
//! - Loose manifest parsing into the strict types above

pub mod aspect;
pub mod clip;
pub mod crop;
pub mod encoding;
pub mod locator;
pub mod manifest;
pub mod overlay;
pub mod package;
pub mod timing;

// Re-export common types
pub use aspect::{AspectRatio, AspectRatioParseError};
pub use clip::{order_clips, ClipDescriptor, ClipRole};
pub use crop::{CropKeyframe, CropWindow};
pub use encoding::{EncodingConfig, VideoEncodeOptions};
pub use locator::{Locator, LocatorParseError, OBJECT_SCHEME};
pub use manifest::{
    parse_clip_manifest, parse_crop_manifest, parse_overlay_manifest, ManifestError, ManifestKind,
    ManifestResult,
};
pub use overlay::{OverlayEvent, OverlayKind, OverlayTimeline};
pub use package::{HardwareFlags, JoinStrategy, Resolution};
pub use timing::{RunReport, Stage, StageTiming};
