//! Clip descriptors and package ordering.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::locator::Locator;

/// Position of a clip inside the package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClipRole {
    /// Slate shown before the content
    StartPlate,
    /// Main content clip, ordered by `order`
    Content,
    /// Slate shown after the content
    EndPlate,
}

impl ClipRole {
    /// Sort rank of the role within a package.
    pub fn rank(self) -> u8 {
        match self {
            ClipRole::StartPlate => 0,
            ClipRole::Content => 1,
            ClipRole::EndPlate => 2,
        }
    }

    /// Parse a role leniently; unknown values are content.
    pub fn from_loose(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "start_plate" | "startplate" | "start" => ClipRole::StartPlate,
            "end_plate" | "endplate" | "end" => ClipRole::EndPlate,
            _ => ClipRole::Content,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClipRole::StartPlate => "start_plate",
            ClipRole::Content => "content",
            ClipRole::EndPlate => "end_plate",
        }
    }
}

impl Default for ClipRole {
    fn default() -> Self {
        ClipRole::Content
    }
}

impl fmt::Display for ClipRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One input clip of a package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClipDescriptor {
    /// Where the clip lives
    pub path: Locator,
    /// Plate or content
    #[serde(default)]
    pub role: ClipRole,
    /// Content order (ignored for plates)
    #[serde(default)]
    pub order: i64,
    /// Crop keyframe manifest reference (local path or http(s) URL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_manifest: Option<String>,
}

impl ClipDescriptor {
    fn sort_key(&self) -> (u8, i64) {
        match self.role {
            ClipRole::Content => (self.role.rank(), self.order),
            _ => (self.role.rank(), 0),
        }
    }
}

/// Order clips for joining: start plates, content by `order`, end plates.
///
/// The sort is stable, so ties keep their input order.
pub fn order_clips(mut clips: Vec<ClipDescriptor>) -> Vec<ClipDescriptor> {
    clips.sort_by_key(ClipDescriptor::sort_key);
    clips
}
