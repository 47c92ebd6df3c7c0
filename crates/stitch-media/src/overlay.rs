//! Overlay timeline compositor.
//!
//! Each overlay event becomes an extra FFmpeg input, shifted to its
//! `mark_in` and stacked onto the base video in timeline order.

use std::path::{Path, PathBuf};
use stitch_models::{EncodingConfig, Locator, OverlayKind, OverlayTimeline, VideoEncodeOptions};
use tracing::info;

use crate::command::{FfmpegCommand, Transcoder};
use crate::error::{MediaError, MediaResult};

/// How a layer's frames are produced.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerSource {
    /// One image looped for the layer duration
    Still,
    /// Numbered images played at `fps`
    Sequence { fps: String },
}

/// A validated overlay event ready for compositing.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayLayer {
    pub mark_in: f64,
    pub duration: f64,
    pub source: LayerSource,
    /// Image or pattern; must be a local file before compositing
    pub asset: Locator,
}

impl OverlayLayer {
    /// Replace the asset with its fetched local copy.
    pub fn with_local_asset(mut self, path: impl Into<PathBuf>) -> Self {
        self.asset = Locator::File(path.into());
        self
    }

    fn input_args(&self) -> Vec<String> {
        match &self.source {
            LayerSource::Still => vec![
                "-loop".to_string(),
                "1".to_string(),
                "-t".to_string(),
                self.duration.to_string(),
            ],
            LayerSource::Sequence { fps } => vec!["-framerate".to_string(), fps.clone()],
        }
    }

    fn input_chain(&self) -> String {
        let shift = format!("setpts=PTS-STARTPTS+{}/TB", self.mark_in);
        match &self.source {
            LayerSource::Still => shift,
            LayerSource::Sequence { fps } => {
                format!("fps={},trim=duration={},{}", fps, self.duration, shift)
            }
        }
    }
}

/// Validate a timeline and resolve each event's source.
///
/// The event kind picks the preferred source; an event carrying only the
/// other kind of reference falls back to it. Events with neither fail.
pub fn plan_layers(timeline: &OverlayTimeline) -> MediaResult<Vec<OverlayLayer>> {
    timeline
        .iter()
        .enumerate()
        .map(|(index, event)| {
            let still = event.image_path.clone().map(|asset| (LayerSource::Still, asset));
            let sequence = event.image_pattern.clone().map(|asset| {
                (
                    LayerSource::Sequence {
                        fps: event.frame_rate.clone(),
                    },
                    asset,
                )
            });
            let resolved = match event.kind {
                OverlayKind::LoopedImage => still.or(sequence),
                OverlayKind::ImageSequence => sequence.or(still),
            };
            let (source, asset) = resolved.ok_or_else(|| {
                MediaError::unsupported_overlay(
                    index,
                    "neither an image path nor an image pattern is set",
                )
            })?;
            Ok(OverlayLayer {
                mark_in: event.mark_in,
                duration: event.duration(),
                source,
                asset,
            })
        })
        .collect()
}

/// Filter graph compositing every layer onto input 0, ending in `[out]`.
pub fn overlay_filter(layers: &[OverlayLayer]) -> String {
    let mut graph = String::from("[0:v]setpts=PTS-STARTPTS[base];");
    for (i, layer) in layers.iter().enumerate() {
        graph.push_str(&format!("[{}:v]{}[seq{}];", i + 1, layer.input_chain(), i + 1));
    }

    let mut current = "base".to_string();
    let overlays: Vec<String> = (1..=layers.len())
        .map(|j| {
            let next = if j == layers.len() {
                "out".to_string()
            } else {
                format!("v{}", j)
            };
            let step = format!("[{}][seq{}]overlay=0:0:eof_action=pass[{}]", current, j, next);
            current = next;
            step
        })
        .collect();
    graph.push_str(&overlays.join(";"));
    graph
}

/// Composite `layers` onto `base`.
///
/// With no layers the base path is returned and nothing is invoked.
pub async fn composite<T>(
    transcoder: &T,
    base: &Path,
    layers: &[OverlayLayer],
    output: &Path,
    hardware: bool,
    encoding: &EncodingConfig,
) -> MediaResult<PathBuf>
where
    T: Transcoder + ?Sized,
{
    if layers.is_empty() {
        return Ok(base.to_path_buf());
    }

    let mut cmd = FfmpegCommand::new("overlay", output).input(base);
    for layer in layers {
        let path = match &layer.asset {
            Locator::File(path) => path,
            remote @ Locator::Object { .. } => {
                return Err(MediaError::FileNotFound(PathBuf::from(remote.to_string())))
            }
        };
        cmd = cmd.input_with(layer.input_args(), path);
    }

    let cmd = cmd
        .filter_complex(overlay_filter(layers))
        .map("[out]")
        .map("0:a?")
        .output_args(encoding.audio_args())
        .map("0:s?")
        .output_args(encoding.video_args(VideoEncodeOptions {
            hardware,
            with_bitrate: false,
            gop_tuned: true,
        }))
        .output_args(encoding.container_args());

    let output = transcoder.invoke(&cmd).await?;
    info!(layers = layers.len(), output = %output.display(), "Composited overlays");
    Ok(output)
}
