//! Graphic overlay events and timelines.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::locator::Locator;

/// Default frame rate for image sequences.
pub const DEFAULT_OVERLAY_FPS: &str = "25";

/// How an overlay event sources its frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OverlayKind {
    /// Single still image held for the event duration
    LoopedImage,
    /// Numbered image sequence played at `frame_rate`
    ImageSequence,
}

impl OverlayKind {
    /// Map the legacy numeric graphic type (1 = sequence, 2 = static).
    pub fn from_gfx_type(gfx_type: i64) -> Self {
        match gfx_type {
            2 => OverlayKind::LoopedImage,
            _ => OverlayKind::ImageSequence,
        }
    }
}

/// One time-bounded overlay insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OverlayEvent {
    /// Start time in the base video (seconds)
    pub mark_in: f64,
    /// End time in the base video (seconds)
    pub mark_out: f64,
    pub kind: OverlayKind,
    /// Still image for looped overlays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<Locator>,
    /// Printf-style pattern for image sequences (e.g. `frame_%04d.png`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pattern: Option<Locator>,
    /// Sequence frame rate as understood by FFmpeg (`25`, `30000/1001`)
    #[serde(default = "default_frame_rate")]
    pub frame_rate: String,
}

fn default_frame_rate() -> String {
    DEFAULT_OVERLAY_FPS.to_string()
}

impl OverlayEvent {
    /// Visible duration in seconds.
    pub fn duration(&self) -> f64 {
        (self.mark_out - self.mark_in).max(0.0)
    }
}

/// Overlay events sorted by `mark_in`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct OverlayTimeline {
    events: Vec<OverlayEvent>,
}

impl OverlayTimeline {
    /// Build a timeline, sorting events by `mark_in` (stable).
    pub fn new(mut events: Vec<OverlayEvent>) -> Self {
        events.sort_by(|a, b| a.mark_in.total_cmp(&b.mark_in));
        Self { events }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn events(&self) -> &[OverlayEvent] {
        &self.events
    }

    pub fn iter(&self) -> impl Iterator<Item = &OverlayEvent> {
        self.events.iter()
    }
}
