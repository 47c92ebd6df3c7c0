//! Aspect-crop track builder.
//!
//! Turns a sparse set of crop keyframes into one crop window per frame and
//! renders it as a frame-indexed FFmpeg `crop` expression. Only the
//! horizontal offset varies per frame; box size and `y` are fixed per clip.

use std::path::{Path, PathBuf};
use stitch_models::{
    AspectRatio, CropKeyframe, CropWindow, EncodingConfig, Resolution, VideoEncodeOptions,
};
use tracing::{debug, info};

use crate::command::{FfmpegCommand, Transcoder};
use crate::error::{MediaError, MediaResult};
use crate::probe::{Prober, VideoInfo};

/// Fixed crop box for one clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub width: u32,
    pub height: u32,
    pub y: u32,
    /// Scale the cropped frame to this size (vertical packages only)
    pub upscale: Option<Resolution>,
}

fn round_up_even(n: u32) -> u32 {
    n + (n % 2)
}

/// Size the crop box for a source frame.
pub fn crop_box(
    width: u32,
    height: u32,
    aspect: AspectRatio,
    vertical: Resolution,
) -> MediaResult<CropBox> {
    // Sources with an odd height lose their bottom row
    let even_height = height - (height % 2);
    let crop = match aspect {
        AspectRatio::Square => {
            // Rounding an odd shorter side up would overflow the source
            let limit = width.min(height);
            let side = limit - (limit % 2);
            let y = if height > width {
                (((height - side) as f64 / 4.0).round() as u32) * 2
            } else {
                0
            };
            CropBox {
                width: side,
                height: side,
                y,
                upscale: None,
            }
        }
        AspectRatio::InstagramPortrait => CropBox {
            width: round_up_even((even_height as f64 * 4.0 / 5.0).ceil() as u32),
            height: even_height,
            y: 0,
            upscale: None,
        },
        AspectRatio::Portrait => CropBox {
            width: round_up_even((even_height as f64 * 9.0 / 16.0).ceil() as u32),
            height: even_height,
            y: 0,
            upscale: Some(vertical),
        },
    };

    if crop.width == 0 || crop.height == 0 {
        return Err(MediaError::empty_crop(format!(
            "{} box for {}x{} source is {}x{}",
            aspect, width, height, crop.width, crop.height
        )));
    }
    if crop.width > width || crop.height + crop.y > height {
        return Err(MediaError::empty_crop(format!(
            "{} box {}x{} does not fit {}x{} source",
            aspect, crop.width, crop.height, width, height
        )));
    }
    Ok(crop)
}

/// Dense crop windows for frames `1..=N`.
#[derive(Debug, Clone, PartialEq)]
pub struct CropTrack {
    /// `windows[i]` belongs to frame `i + 1`
    windows: Vec<CropWindow>,
}

/// Accumulator threaded through the per-frame fold.
struct CarryForward<'a> {
    keyframes: &'a [CropKeyframe],
    next: usize,
    last_known: Option<CropWindow>,
}

impl<'a> CarryForward<'a> {
    /// Consume every keyframe at or before `frame`.
    fn advance(&mut self, frame: u32) -> Option<CropWindow> {
        while let Some(keyframe) = self.keyframes.get(self.next) {
            if keyframe.frame_index > frame {
                break;
            }
            self.last_known = Some(keyframe.window());
            self.next += 1;
        }
        self.last_known
    }
}

impl CropTrack {
    /// Build the track for an `N`-frame clip.
    ///
    /// Frames before the first keyframe (or all frames, without keyframes) use
    /// the centered window. From the first keyframe on, each frame takes the
    /// most recent keyframe at or before it, which also holds the last
    /// keyframe to the end. When two keyframes share an index the first wins.
    pub fn build(
        frame_count: u32,
        source_width: u32,
        crop_width: u32,
        keyframes: &[CropKeyframe],
    ) -> Self {
        let mut sorted = keyframes.to_vec();
        sorted.sort_by_key(|k| k.frame_index);
        sorted.dedup_by_key(|k| k.frame_index);

        let center_x = (source_width as f64 - crop_width as f64) / 2.0;
        let centered = CropWindow::new(center_x, center_x + crop_width as f64);
        let first = sorted.first().map(|k| k.frame_index);

        let mut state = CarryForward {
            keyframes: &sorted,
            next: 0,
            last_known: None,
        };
        let windows = (1..=frame_count)
            .map(|frame| {
                let known = state.advance(frame);
                match first {
                    Some(first) if frame >= first => known.unwrap_or(centered),
                    _ => centered,
                }
            })
            .collect();

        Self { windows }
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Window for a 1-based frame index.
    pub fn window(&self, frame: u32) -> Option<CropWindow> {
        let index = frame.checked_sub(1)? as usize;
        self.windows.get(index).copied()
    }

    /// `(frame, window)` pairs in frame order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, CropWindow)> + '_ {
        self.windows
            .iter()
            .enumerate()
            .map(|(i, w)| (i as u32 + 1, *w))
    }

    /// Sum of per-frame indicator terms selecting each frame's left edge.
    ///
    /// FFmpeg's `n` is 0-based, so frame `i` matches `n = i - 1`.
    pub fn x_expression(&self) -> String {
        self.iter()
            .map(|(frame, window)| format!("if(eq(n\\,{})\\,{})", frame - 1, window.min_x))
            .collect::<Vec<_>>()
            .join("+")
    }

    /// Complete `filter_complex` script producing `[v]`.
    pub fn filter_script(&self, crop: &CropBox) -> String {
        let scale = crop
            .upscale
            .map(|r| format!(",scale={}:{}:flags=lanczos", r.width, r.height))
            .unwrap_or_default();
        format!(
            "[0:v]crop=w={}:h={}:x={}:y={}{}[v]",
            crop.width,
            crop.height,
            self.x_expression(),
            crop.y,
            scale
        )
    }
}

/// Inputs for cropping one clip.
#[derive(Debug, Clone)]
pub struct CropJob<'a> {
    pub input: &'a Path,
    pub output: PathBuf,
    /// Where the filter script is written
    pub script_path: PathBuf,
    pub keyframes: &'a [CropKeyframe],
    pub aspect: AspectRatio,
    pub vertical: Resolution,
    pub hardware: bool,
    pub encoding: &'a EncodingConfig,
}

/// Result of a crop render.
#[derive(Debug, Clone)]
pub struct CroppedClip {
    pub path: PathBuf,
    pub crop: CropBox,
    pub frames: usize,
}

/// Check that probed geometry is usable for cropping.
pub fn require_geometry(path: &Path, info: &VideoInfo) -> MediaResult<()> {
    if info.width == 0 || info.height == 0 {
        return Err(MediaError::geometry(
            path,
            format!("reported size {}x{}", info.width, info.height),
        ));
    }
    if info.frame_count == 0 {
        return Err(MediaError::geometry(path, "frame count is zero"));
    }
    Ok(())
}

/// Probe, build the crop track and render the cropped clip.
pub async fn crop_clip<T, P>(transcoder: &T, prober: &P, job: CropJob<'_>) -> MediaResult<CroppedClip>
where
    T: Transcoder + ?Sized,
    P: Prober + ?Sized,
{
    if job.keyframes.is_empty() {
        return Err(MediaError::empty_crop("keyframe set is empty"));
    }

    let info = prober.probe(job.input).await?;
    require_geometry(job.input, &info)?;

    let crop = crop_box(info.width, info.height, job.aspect, job.vertical)?;
    let track = CropTrack::build(info.frame_count, info.width, crop.width, job.keyframes);
    debug!(
        input = %job.input.display(),
        frames = track.len(),
        crop_width = crop.width,
        crop_height = crop.height,
        crop_y = crop.y,
        "Built crop track"
    );

    tokio::fs::write(&job.script_path, track.filter_script(&crop)).await?;

    let cmd = FfmpegCommand::new("crop", &job.output)
        .input(job.input)
        .filter_complex_script(&job.script_path)
        .map("[v]")
        .map("0:a?")
        .output_args(job.encoding.audio_args())
        .output_args(job.encoding.video_args(VideoEncodeOptions {
            hardware: job.hardware,
            with_bitrate: true,
            gop_tuned: true,
        }))
        .output_args(job.encoding.container_args())
        .expected_duration(info.duration);

    let path = transcoder.invoke(&cmd).await?;
    info!(
        input = %job.input.display(),
        output = %path.display(),
        aspect = %job.aspect,
        "Cropped clip"
    );

    Ok(CroppedClip {
        path,
        crop,
        frames: track.len(),
    })
}
