//! Run request document.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stitch_models::{
    AspectRatio, HardwareFlags, JoinStrategy, Locator, ManifestError, ManifestKind, Resolution,
};

/// A manifest given inline or by reference (local path or HTTP(S) URL).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ManifestSource {
    Reference(String),
    Inline(Value),
}

impl ManifestSource {
    pub fn inline(value: Value) -> Self {
        Self::Inline(value)
    }

    pub fn reference(reference: impl Into<String>) -> Self {
        Self::Reference(reference.into())
    }
}

/// One packaging run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Caller-chosen id; a UUID is generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    /// Clip ordering manifest
    pub clips: ManifestSource,

    #[serde(default)]
    pub strategy: JoinStrategy,

    /// Crossfade length in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade_duration: Option<f64>,

    /// Target ratio for clips that carry a crop manifest
    #[serde(default)]
    pub aspect_ratio: AspectRatio,

    /// Scale every clip to this size before a crossfade join
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_resolution: Option<Resolution>,

    #[serde(default)]
    pub hardware: HardwareFlags,

    /// Overlay timeline manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlays: Option<ManifestSource>,

    /// Bucket that relative clip paths are read from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_bucket: Option<String>,

    /// Where the package is published
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Locator>,

    /// Overrides the configured batch threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Validate and plan only; nothing is fetched or transcoded
    #[serde(default)]
    pub dry_run: bool,
}

impl RunRequest {
    /// Request with defaults for everything but the clip manifest.
    pub fn new(clips: ManifestSource) -> Self {
        Self {
            run_id: None,
            clips,
            strategy: JoinStrategy::default(),
            fade_duration: None,
            aspect_ratio: AspectRatio::default(),
            package_resolution: None,
            hardware: HardwareFlags::default(),
            overlays: None,
            input_bucket: None,
            output: None,
            batch_size: None,
            dry_run: false,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ManifestError> {
        serde_json::from_str(text).map_err(|e| ManifestError::json(ManifestKind::Request, e))
    }

    /// Reject values no run can use.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if let Some(fade) = self.fade_duration {
            if !fade.is_finite() || fade < 0.0 {
                return Err(ManifestError::invalid(
                    ManifestKind::Request,
                    format!("fadeDuration must be a non-negative number, got {}", fade),
                ));
            }
        }
        if self.batch_size == Some(0) {
            return Err(ManifestError::invalid(
                ManifestKind::Request,
                "batchSize must be at least 1",
            ));
        }
        if matches!(&self.input_bucket, Some(bucket) if bucket.trim().is_empty()) {
            return Err(ManifestError::invalid(
                ManifestKind::Request,
                "inputBucket cannot be empty",
            ));
        }
        Ok(())
    }

    /// Resolve a manifest path against `input_bucket`.
    ///
    /// Relative file paths become object keys in the input bucket; absolute
    /// paths and object locators are returned unchanged.
    pub fn resolve_input(&self, locator: &Locator) -> Locator {
        match (&self.input_bucket, locator) {
            (Some(bucket), Locator::File(path)) if path.is_relative() => {
                Locator::object(bucket.clone(), path.to_string_lossy().replace('\\', "/"))
            }
            _ => locator.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_minimal_request_defaults() {
        let request = RunRequest::from_json(r#"{"clips": "manifests/clips.json"}"#).unwrap();
        assert_eq!(request.clips, ManifestSource::reference("manifests/clips.json"));
        assert_eq!(request.strategy, JoinStrategy::Crossfade);
        assert_eq!(request.aspect_ratio, AspectRatio::Portrait);
        assert!(!request.hardware.any());
        assert!(!request.dry_run);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_full_request() {
        let request = RunRequest::from_json(
            &json!({
                "runId": "bench-1",
                "clips": {"clips": ["s3://media/a.mp4", "s3://media/b.mp4"]},
                "strategy": "concat",
                "fadeDuration": 0.5,
                "aspectRatio": "4:5",
                "packageResolution": "1280:720",
                "hardware": {"crop": true},
                "overlays": [{"markIn": 1, "markOut": 2, "imagePath": "logo.png", "gfx_type": 2}],
                "output": "s3://media/out/package.mp4",
                "batchSize": 6,
                "dryRun": true
            })
            .to_string(),
        )
        .unwrap();

        assert_eq!(request.run_id.as_deref(), Some("bench-1"));
        assert!(matches!(request.clips, ManifestSource::Inline(_)));
        assert_eq!(request.strategy, JoinStrategy::Concat);
        assert_eq!(request.aspect_ratio, AspectRatio::InstagramPortrait);
        assert_eq!(request.package_resolution, Some(Resolution::new(1280, 720)));
        assert!(request.hardware.crop && !request.hardware.join);
        assert!(matches!(request.overlays, Some(ManifestSource::Inline(_))));
        assert_eq!(request.output, Some(Locator::object("media", "out/package.mp4")));
        assert_eq!(request.batch_size, Some(6));
        assert!(request.dry_run);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut request = RunRequest::new(ManifestSource::inline(json!([])));
        request.fade_duration = Some(-1.0);
        assert!(request.validate().is_err());

        request.fade_duration = None;
        request.batch_size = Some(0);
        assert!(request.validate().is_err());

        assert!(RunRequest::from_json(r#"{"clips": [], "aspectRatio": "2:1"}"#).is_err());
    }

    #[test]
    fn test_relative_paths_resolve_into_input_bucket() {
        let mut request = RunRequest::new(ManifestSource::inline(json!([])));
        request.input_bucket = Some("media".to_string());

        assert_eq!(
            request.resolve_input(&Locator::file("clips/a.mp4")),
            Locator::object("media", "clips/a.mp4")
        );
        assert_eq!(
            request.resolve_input(&Locator::file("/data/a.mp4")),
            Locator::file("/data/a.mp4")
        );
    }
}
