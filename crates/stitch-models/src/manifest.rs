//! Parse-and-normalize for loosely structured manifests.
//!
//! Crop, overlay and clip ordering manifests arrive as permissive JSON: a bare
//! list, a wrapper object holding the list, or a single record. Field names
//! come in camelCase or snake_case and numbers are sometimes strings. Every
//! function here converts that shape into the strict model types once, so the
//! loose form never leaves this module.

use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::clip::{ClipDescriptor, ClipRole};
use crate::crop::CropKeyframe;
use crate::locator::Locator;
use crate::overlay::{OverlayEvent, OverlayKind, OverlayTimeline, DEFAULT_OVERLAY_FPS};

/// Result type for manifest parsing.
pub type ManifestResult<T> = Result<T, ManifestError>;

/// Which manifest a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Clips,
    Crop,
    Overlay,
    Request,
}

impl ManifestKind {
    /// Key of the wrapper object holding the record list.
    fn wrapper_key(&self) -> &'static str {
        match self {
            ManifestKind::Clips => "clips",
            ManifestKind::Crop => "frames",
            ManifestKind::Overlay => "overlays",
            ManifestKind::Request => "request",
        }
    }
}

impl fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ManifestKind::Clips => "clip ordering",
            ManifestKind::Crop => "crop",
            ManifestKind::Overlay => "overlay",
            ManifestKind::Request => "run request",
        };
        write!(f, "{}", name)
    }
}

/// Manifest validation failures.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Invalid {kind} manifest{}: {reason}", record_suffix(*.record))]
    Invalid {
        kind: ManifestKind,
        record: Option<usize>,
        reason: String,
    },

    #[error("Could not read {kind} manifest {reference}: {reason}")]
    Unreadable {
        kind: ManifestKind,
        reference: String,
        reason: String,
    },

    #[error("Malformed {kind} manifest JSON: {source}")]
    Json {
        kind: ManifestKind,
        #[source]
        source: serde_json::Error,
    },
}

fn record_suffix(record: Option<usize>) -> String {
    record
        .map(|index| format!(" (record {})", index))
        .unwrap_or_default()
}

impl ManifestError {
    pub fn invalid(kind: ManifestKind, reason: impl Into<String>) -> Self {
        Self::Invalid {
            kind,
            record: None,
            reason: reason.into(),
        }
    }

    pub fn invalid_record(kind: ManifestKind, record: usize, reason: impl Into<String>) -> Self {
        Self::Invalid {
            kind,
            record: Some(record),
            reason: reason.into(),
        }
    }

    pub fn unreadable(
        kind: ManifestKind,
        reference: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Unreadable {
            kind,
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    pub fn json(kind: ManifestKind, source: serde_json::Error) -> Self {
        Self::Json { kind, source }
    }

    pub fn kind(&self) -> ManifestKind {
        match self {
            Self::Invalid { kind, .. } | Self::Unreadable { kind, .. } | Self::Json { kind, .. } => {
                *kind
            }
        }
    }
}

/// Number that may arrive as a JSON number or a numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum LooseNumber {
    Number(f64),
    Text(String),
}

impl LooseNumber {
    fn as_f64(&self) -> Option<f64> {
        let value = match self {
            LooseNumber::Number(n) => *n,
            LooseNumber::Text(s) => s.trim().parse().ok()?,
        };
        value.is_finite().then_some(value)
    }

    /// Render for FFmpeg options that accept rationals (`30000/1001`).
    fn as_rate(&self) -> Option<String> {
        match self {
            LooseNumber::Number(n) => Some(n.to_string()),
            LooseNumber::Text(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        }
    }
}

/// Split a document into its records.
fn records(kind: ManifestKind, doc: &Value) -> ManifestResult<Vec<&Value>> {
    match doc {
        Value::Array(items) => Ok(items.iter().collect()),
        Value::Object(map) => match map.get(kind.wrapper_key()) {
            Some(Value::Array(items)) => Ok(items.iter().collect()),
            Some(_) => Err(ManifestError::invalid(
                kind,
                format!("'{}' must be a list", kind.wrapper_key()),
            )),
            None => Ok(vec![doc]),
        },
        Value::Null => Ok(Vec::new()),
        _ => Err(ManifestError::invalid(
            kind,
            "expected a list of records or an object",
        )),
    }
}

fn record<'de, T: Deserialize<'de>>(
    kind: ManifestKind,
    index: usize,
    value: &'de Value,
) -> ManifestResult<T> {
    if !value.is_object() {
        return Err(ManifestError::invalid_record(kind, index, "record must be an object"));
    }
    T::deserialize(value).map_err(|e| ManifestError::invalid_record(kind, index, e.to_string()))
}

// =============================================================================
// Crop manifest
// =============================================================================

#[derive(Debug, Deserialize)]
struct LooseCropRecord {
    #[serde(default, alias = "frameIndex", alias = "frame_index")]
    frame: Option<LooseNumber>,
    #[serde(default, rename = "xMin")]
    x_min: Option<LooseNumber>,
    #[serde(default, rename = "minX", alias = "min_x")]
    min_x: Option<LooseNumber>,
    #[serde(default, rename = "xMax")]
    x_max: Option<LooseNumber>,
    #[serde(default, rename = "maxX", alias = "max_x")]
    max_x: Option<LooseNumber>,
    #[serde(default, alias = "timestamp")]
    time: Option<LooseNumber>,
}

/// Parse a crop keyframe manifest.
///
/// Records without a usable frame index are dropped; missing coordinates
/// default to zero. The result is sorted by frame index.
pub fn parse_crop_manifest(doc: &Value) -> ManifestResult<Vec<CropKeyframe>> {
    let kind = ManifestKind::Crop;
    let mut keyframes = Vec::new();

    for (index, value) in records(kind, doc)?.into_iter().enumerate() {
        let raw: LooseCropRecord = record(kind, index, value)?;
        let Some(frame) = raw.frame.as_ref().and_then(LooseNumber::as_f64) else {
            continue;
        };
        if frame < 0.0 || frame > u32::MAX as f64 {
            continue;
        }

        let coord = |primary: &Option<LooseNumber>, fallback: &Option<LooseNumber>| {
            primary
                .as_ref()
                .and_then(LooseNumber::as_f64)
                .or_else(|| fallback.as_ref().and_then(LooseNumber::as_f64))
                .unwrap_or(0.0)
        };

        keyframes.push(CropKeyframe {
            frame_index: frame as u32,
            min_x: coord(&raw.x_min, &raw.min_x),
            max_x: coord(&raw.x_max, &raw.max_x),
            timestamp: raw.time.as_ref().and_then(LooseNumber::as_f64).unwrap_or(0.0),
        });
    }

    keyframes.sort_by_key(|k| k.frame_index);
    Ok(keyframes)
}

// =============================================================================
// Overlay manifest
// =============================================================================

#[derive(Debug, Deserialize)]
struct LooseOverlayRecord {
    #[serde(default, rename = "markIn", alias = "mark_in")]
    mark_in: Option<LooseNumber>,
    #[serde(default, rename = "markOut", alias = "mark_out")]
    mark_out: Option<LooseNumber>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    gfx_type: Option<LooseNumber>,
    #[serde(default, rename = "imagePath", alias = "image_path", alias = "graphics_thumbnail_path")]
    image_path: Option<String>,
    #[serde(default, rename = "imagePattern", alias = "image_pattern")]
    image_pattern: Option<String>,
    #[serde(default)]
    png_base_url: Option<String>,
    #[serde(default, alias = "frameRate", alias = "frame_rate")]
    fps: Option<LooseNumber>,
}

impl LooseOverlayRecord {
    fn kind(&self, kind: ManifestKind, index: usize) -> ManifestResult<OverlayKind> {
        if let Some(name) = &self.kind {
            return match name.trim().to_lowercase().as_str() {
                "looped_image" | "loopedimage" | "static" | "image" => Ok(OverlayKind::LoopedImage),
                "image_sequence" | "imagesequence" | "sequence" => Ok(OverlayKind::ImageSequence),
                other => Err(ManifestError::invalid_record(
                    kind,
                    index,
                    format!("unknown overlay kind '{}'", other),
                )),
            };
        }
        let gfx_type = self
            .gfx_type
            .as_ref()
            .and_then(LooseNumber::as_f64)
            .map(|n| n as i64)
            .unwrap_or(1);
        Ok(OverlayKind::from_gfx_type(gfx_type))
    }

    fn pattern(&self) -> Option<String> {
        match (&self.png_base_url, &self.image_pattern) {
            (Some(base), Some(pattern)) if !base.is_empty() => Some(format!("{}{}", base, pattern)),
            (_, pattern) => pattern.clone(),
        }
    }
}

fn optional_locator(
    kind: ManifestKind,
    index: usize,
    value: Option<String>,
) -> ManifestResult<Option<Locator>> {
    match value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|e| ManifestError::invalid_record(kind, index, format!("{}", e))),
        None => Ok(None),
    }
}

/// Parse an overlay manifest into a timeline sorted by `mark_in`.
///
/// Records without `markIn` are dropped. `markOut` is required for the rest
/// and may not precede `markIn`.
pub fn parse_overlay_manifest(doc: &Value) -> ManifestResult<OverlayTimeline> {
    let kind = ManifestKind::Overlay;
    let mut events = Vec::new();

    for (index, value) in records(kind, doc)?.into_iter().enumerate() {
        let raw: LooseOverlayRecord = record(kind, index, value)?;
        let Some(mark_in) = raw.mark_in.as_ref().and_then(LooseNumber::as_f64) else {
            continue;
        };
        let mark_out = raw
            .mark_out
            .as_ref()
            .and_then(LooseNumber::as_f64)
            .ok_or_else(|| ManifestError::invalid_record(kind, index, "missing markOut"))?;
        if mark_out < mark_in {
            return Err(ManifestError::invalid_record(
                kind,
                index,
                format!("markOut {} precedes markIn {}", mark_out, mark_in),
            ));
        }

        events.push(OverlayEvent {
            mark_in,
            mark_out,
            kind: raw.kind(kind, index)?,
            image_path: optional_locator(kind, index, raw.image_path.clone())?,
            image_pattern: optional_locator(kind, index, raw.pattern())?,
            frame_rate: raw
                .fps
                .as_ref()
                .and_then(LooseNumber::as_rate)
                .unwrap_or_else(|| DEFAULT_OVERLAY_FPS.to_string()),
        });
    }

    Ok(OverlayTimeline::new(events))
}

// =============================================================================
// Clip ordering manifest
// =============================================================================

#[derive(Debug, Deserialize)]
struct LooseClipRecord {
    #[serde(default)]
    path: Option<String>,
    #[serde(default, rename = "clipType", alias = "clip_type", alias = "role")]
    clip_type: Option<String>,
    #[serde(default, rename = "orderId", alias = "order_id", alias = "order")]
    order_id: Option<LooseNumber>,
    #[serde(
        default,
        rename = "aspectJsonPath",
        alias = "aspect_json_path",
        alias = "cropManifest",
        alias = "crop_manifest"
    )]
    crop_manifest: Option<String>,
}

/// Parse a clip ordering manifest. Records are returned in input order;
/// use [`crate::clip::order_clips`] to sort them for joining.
pub fn parse_clip_manifest(doc: &Value) -> ManifestResult<Vec<ClipDescriptor>> {
    let kind = ManifestKind::Clips;
    let mut clips = Vec::new();

    for (index, value) in records(kind, doc)?.into_iter().enumerate() {
        let raw = match value {
            Value::String(path) => LooseClipRecord {
                path: Some(path.clone()),
                clip_type: None,
                order_id: None,
                crop_manifest: None,
            },
            _ => record(kind, index, value)?,
        };

        let path = raw
            .path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ManifestError::invalid_record(kind, index, "missing path"))?;
        let path: Locator = path
            .parse()
            .map_err(|e| ManifestError::invalid_record(kind, index, format!("{}", e)))?;

        clips.push(ClipDescriptor {
            path,
            role: raw
                .clip_type
                .as_deref()
                .map(ClipRole::from_loose)
                .unwrap_or_default(),
            order: raw
                .order_id
                .as_ref()
                .and_then(LooseNumber::as_f64)
                .map(|n| n as i64)
                .unwrap_or(0),
            crop_manifest: raw
                .crop_manifest
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        });
    }

    if clips.is_empty() {
        return Err(ManifestError::invalid(kind, "no clips listed"));
    }
    Ok(clips)
}
