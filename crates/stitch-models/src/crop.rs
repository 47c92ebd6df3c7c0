//! Crop keyframes and windows.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Horizontal crop window for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CropWindow {
    /// Left edge in source pixels
    pub min_x: f64,
    /// Right edge in source pixels
    pub max_x: f64,
}

impl CropWindow {
    pub fn new(min_x: f64, max_x: f64) -> Self {
        Self { min_x, max_x }
    }

    /// Window width in source pixels.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }
}

/// Sparse crop sample at a given frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CropKeyframe {
    /// Frame on the track's 1-based scale; index 0 applies from the first frame
    pub frame_index: u32,
    /// Left edge in source pixels
    pub min_x: f64,
    /// Right edge in source pixels
    pub max_x: f64,
    /// Source timestamp in seconds (informational)
    #[serde(default)]
    pub timestamp: f64,
}

impl CropKeyframe {
    pub fn new(frame_index: u32, min_x: f64, max_x: f64) -> Self {
        Self {
            frame_index,
            min_x,
            max_x,
            timestamp: 0.0,
        }
    }

    pub fn window(&self) -> CropWindow {
        CropWindow::new(self.min_x, self.max_x)
    }
}
