//! Stage timing and the per-run benchmark report.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::package::JoinStrategy;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Manifest parsing and capability checks
    Validate,
    Fetch,
    Crop,
    Join,
    Overlay,
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Fetch => "fetch",
            Stage::Crop => "crop",
            Stage::Join => "join",
            Stage::Overlay => "overlay",
            Stage::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Accumulated stage durations in milliseconds.
///
/// Crop and join both count as transform time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StageTiming {
    pub fetch_ms: f64,
    pub transform_ms: f64,
    pub overlay_ms: f64,
    pub publish_ms: f64,
}

impl StageTiming {
    /// Add a completed stage's duration.
    pub fn record(&mut self, stage: Stage, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        match stage {
            Stage::Validate => {}
            Stage::Fetch => self.fetch_ms += ms,
            Stage::Crop | Stage::Join => self.transform_ms += ms,
            Stage::Overlay => self.overlay_ms += ms,
            Stage::Publish => self.publish_ms += ms,
        }
    }

    /// Turnaround time: the sum of observed stage durations.
    pub fn turnaround_ms(&self) -> f64 {
        self.fetch_ms + self.transform_ms + self.overlay_ms + self.publish_ms
    }
}

/// Structured record emitted at the end of every successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    /// Sum of stage durations
    pub turnaround_ms: f64,
    /// Wall-clock span of the whole run, validation included
    pub wall_clock_ms: f64,
    pub stage_timings: StageTiming,
    pub output_location: String,
    pub strategy: JoinStrategy,
    pub clip_count: usize,
    /// Transcoder merges performed by the join stage
    pub merge_count: usize,
    pub cropped_clip_count: usize,
    pub overlay_count: usize,
    /// Configured batch threshold (informational)
    pub batch_size: usize,
    /// Expected package duration derived from the join plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_secs: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crop_and_join_accumulate_into_transform() {
        let mut timing = StageTiming::default();
        timing.record(Stage::Crop, Duration::from_millis(40));
        timing.record(Stage::Join, Duration::from_millis(60));
        timing.record(Stage::Publish, Duration::from_millis(5));

        assert!((timing.transform_ms - 100.0).abs() < 1e-6);
        assert_eq!(timing.overlay_ms, 0.0);
        assert!((timing.turnaround_ms() - 105.0).abs() < 1e-6);
    }

    #[test]
    fn test_validate_is_not_counted() {
        let mut timing = StageTiming::default();
        timing.record(Stage::Validate, Duration::from_secs(3));
        assert_eq!(timing.turnaround_ms(), 0.0);
    }

    #[test]
    fn test_timing_serializes_camel_case() {
        let json = serde_json::to_value(StageTiming::default()).unwrap();
        assert!(json.get("fetchMs").is_some());
        assert!(json.get("transformMs").is_some());
    }
}
