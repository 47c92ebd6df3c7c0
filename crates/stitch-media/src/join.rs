//! Join engine: straight concat and the pairwise crossfade waterfall.
//!
//! The waterfall merges clip 1 with clip 2, then that result with clip 3 and
//! so on, so FFmpeg never holds more than two transition inputs at once.

use std::path::{Path, PathBuf};
use stitch_models::{EncodingConfig, JoinStrategy, Resolution, VideoEncodeOptions};
use tracing::{debug, info};

use crate::command::{FfmpegCommand, Transcoder};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::{remove_quietly, ScratchArea};

/// Truncate to two decimal places, tolerating float noise just below a step.
fn floor2(value: f64) -> f64 {
    (value * 100.0 + 1e-6).floor() / 100.0
}

/// Crossfade start offset into the running output.
///
/// The safety buffer pulls the transition back so it ends before the last
/// frame of the left input. The result is always below `cumulative` for a
/// positive running duration, even when fade and buffer are tiny.
pub fn crossfade_offset(cumulative: f64, fade: f64, safety_buffer: f64) -> f64 {
    let offset = floor2((cumulative - fade - safety_buffer).max(0.0));
    if offset > 0.0 && offset >= cumulative {
        floor2(offset - 0.01).max(0.0)
    } else {
        offset
    }
}

/// Per-input normalization applied before transitions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub resolution: Resolution,
    /// Force a constant frame rate and reset the timebase
    pub fps: Option<u32>,
    pub audio_sample_rate: u32,
}

impl Normalization {
    pub fn video_chain(&self) -> String {
        let size = format!("scale={}:{}", self.resolution.width, self.resolution.height);
        match self.fps {
            Some(fps) => format!("{},fps={},setpts=PTS-STARTPTS,settb=AVTB", size, fps),
            None => format!("{},setpts=PTS-STARTPTS", size),
        }
    }

    pub fn audio_chain(&self) -> String {
        format!("aresample={},asetpts=PTS-STARTPTS", self.audio_sample_rate)
    }
}

/// One planned crossfade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    /// Index of the clip being faded in
    pub clip: usize,
    /// Start of the fade in the running output (seconds)
    pub offset: f64,
    /// Running output duration after this merge
    pub cumulative: f64,
}

/// Ordered join inputs with derived transition offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinPlan {
    pub strategy: JoinStrategy,
    pub inputs: Vec<PathBuf>,
    pub durations: Vec<f64>,
    pub fade_duration: f64,
    pub transitions: Vec<Transition>,
    pub estimated_duration: f64,
}

impl JoinPlan {
    /// Plan a straight concatenation.
    pub fn concat(inputs: Vec<(PathBuf, f64)>) -> MediaResult<Self> {
        if inputs.is_empty() {
            return Err(MediaError::EmptyJoin);
        }
        let (inputs, durations): (Vec<_>, Vec<_>) = inputs.into_iter().unzip();
        Ok(Self {
            strategy: JoinStrategy::Concat,
            estimated_duration: durations.iter().sum(),
            inputs,
            durations,
            fade_duration: 0.0,
            transitions: Vec::new(),
        })
    }

    /// Plan a waterfall crossfade: one transition per clip after the first.
    pub fn crossfade(
        inputs: Vec<(PathBuf, f64)>,
        fade_duration: f64,
        safety_buffer: f64,
    ) -> MediaResult<Self> {
        if inputs.is_empty() {
            return Err(MediaError::EmptyJoin);
        }
        let (inputs, durations): (Vec<_>, Vec<_>) = inputs.into_iter().unzip();

        let (transitions, estimated_duration) = durations.iter().enumerate().skip(1).fold(
            (Vec::with_capacity(durations.len() - 1), durations[0]),
            |(mut transitions, cumulative), (clip, duration)| {
                let offset = crossfade_offset(cumulative, fade_duration, safety_buffer);
                let cumulative = offset + duration;
                transitions.push(Transition {
                    clip,
                    offset,
                    cumulative,
                });
                (transitions, cumulative)
            },
        );

        Ok(Self {
            strategy: JoinStrategy::Crossfade,
            inputs,
            durations,
            fade_duration,
            transitions,
            estimated_duration,
        })
    }

    /// Transcoder invocations needed to execute the plan.
    pub fn merge_count(&self) -> usize {
        match self.strategy {
            JoinStrategy::Concat => 1,
            JoinStrategy::Crossfade => self.transitions.len().max(1),
        }
    }
}

/// Encoder policy for a join.
#[derive(Debug, Clone)]
pub struct JoinSettings<'a> {
    pub normalize: Option<Normalization>,
    pub hardware: bool,
    pub encoding: &'a EncodingConfig,
}

/// What a join produced.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    pub output: PathBuf,
    pub merges: usize,
    pub estimated_duration: f64,
}

/// Concat demuxer list: one `file '<path>'` line per input.
pub fn concat_list(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|path| {
            let escaped = path
                .to_string_lossy()
                .replace('\\', "/")
                .replace('\'', "'\\''");
            format!("file '{}'", escaped)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Filter graph for one two-input crossfade merge.
pub fn crossfade_filter(offset: f64, fade: f64, normalize: Option<&Normalization>) -> String {
    let mut parts = Vec::new();
    let (v0, v1, a0, a1) = match normalize {
        Some(norm) => {
            for i in 0..2 {
                parts.push(format!("[{}:v]{}[v{}]", i, norm.video_chain(), i));
            }
            for i in 0..2 {
                parts.push(format!("[{}:a]{}[a{}]", i, norm.audio_chain(), i));
            }
            ("v0", "v1", "a0", "a1")
        }
        None => ("0:v", "1:v", "0:a", "1:a"),
    };
    parts.push(format!(
        "[{}][{}]xfade=transition=fade:duration={}:offset={},format=yuv420p[vout]",
        v0, v1, fade, offset
    ));
    parts.push(format!("[{}][{}]acrossfade=d={}[aout]", a0, a1, fade));
    parts.join(";")
}

fn pass_through_command(
    input: &Path,
    output: &Path,
    duration: f64,
    settings: &JoinSettings<'_>,
) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new("pass-through", output).input(input);
    if let Some(norm) = &settings.normalize {
        cmd = cmd
            .filter_complex(format!(
                "[0:v]{},format=yuv420p[v0];[0:a]{}[a0]",
                norm.video_chain(),
                norm.audio_chain()
            ))
            .map("[v0]")
            .map("[a0]");
    }
    cmd.output_args(settings.encoding.video_args(VideoEncodeOptions {
        hardware: settings.hardware,
        ..Default::default()
    }))
    .output_args(settings.encoding.audio_args())
    .output_args(["-movflags", "+faststart"])
    .expected_duration(duration)
}

fn merge_command(
    left: &Path,
    right: &Path,
    output: &Path,
    plan: &JoinPlan,
    transition: &Transition,
    settings: &JoinSettings<'_>,
) -> FfmpegCommand {
    FfmpegCommand::new("crossfade", output)
        .input(left)
        .input(right)
        .filter_complex(crossfade_filter(
            transition.offset,
            plan.fade_duration,
            settings.normalize.as_ref(),
        ))
        .map("[vout]")
        .map("[aout]")
        .output_args(settings.encoding.audio_args())
        .output_args(settings.encoding.video_args(VideoEncodeOptions {
            hardware: settings.hardware,
            ..Default::default()
        }))
        .output_args(settings.encoding.container_args())
        .expected_duration(transition.cumulative)
}

/// Execute a join plan, writing the package to `output`.
///
/// Waterfall intermediates live in `scratch` and are deleted as soon as the
/// next merge has consumed them.
pub async fn execute_join<T>(
    transcoder: &T,
    plan: &JoinPlan,
    output: &Path,
    scratch: &ScratchArea,
    settings: &JoinSettings<'_>,
) -> MediaResult<JoinOutcome>
where
    T: Transcoder + ?Sized,
{
    match plan.strategy {
        JoinStrategy::Concat => concat_join(transcoder, plan, output, scratch, settings).await,
        JoinStrategy::Crossfade => waterfall_join(transcoder, plan, output, scratch, settings).await,
    }
}

async fn concat_join<T>(
    transcoder: &T,
    plan: &JoinPlan,
    output: &Path,
    scratch: &ScratchArea,
    settings: &JoinSettings<'_>,
) -> MediaResult<JoinOutcome>
where
    T: Transcoder + ?Sized,
{
    let list_path = scratch.next_path("concat", "txt");
    tokio::fs::write(&list_path, concat_list(&plan.inputs)).await?;

    let cmd = FfmpegCommand::new("concat", output)
        .input_with(["-f", "concat", "-safe", "0"], &list_path)
        .map("0:v:0")
        .map("0:a:0")
        .output_args(settings.encoding.audio_args())
        .output_args(settings.encoding.video_args(VideoEncodeOptions {
            hardware: settings.hardware,
            with_bitrate: true,
            gop_tuned: false,
        }))
        .output_args(settings.encoding.container_args())
        .expected_duration(plan.estimated_duration);

    let output = transcoder.invoke(&cmd).await?;
    info!(clips = plan.inputs.len(), output = %output.display(), "Concatenated clips");

    Ok(JoinOutcome {
        output,
        merges: 1,
        estimated_duration: plan.estimated_duration,
    })
}

async fn waterfall_join<T>(
    transcoder: &T,
    plan: &JoinPlan,
    output: &Path,
    scratch: &ScratchArea,
    settings: &JoinSettings<'_>,
) -> MediaResult<JoinOutcome>
where
    T: Transcoder + ?Sized,
{
    let first = plan.inputs.first().ok_or(MediaError::EmptyJoin)?;

    if plan.transitions.is_empty() {
        let cmd = pass_through_command(first, output, plan.estimated_duration, settings);
        let output = transcoder.invoke(&cmd).await?;
        info!(output = %output.display(), "Single clip, re-encoded without transitions");
        return Ok(JoinOutcome {
            output,
            merges: 1,
            estimated_duration: plan.estimated_duration,
        });
    }

    let mut current = first.clone();
    let mut current_is_intermediate = false;

    for (step, transition) in plan.transitions.iter().enumerate() {
        let is_last = step + 1 == plan.transitions.len();
        let target = if is_last {
            output.to_path_buf()
        } else {
            scratch.next_path("waterfall", "mp4")
        };
        let right = &plan.inputs[transition.clip];

        debug!(
            step = step + 1,
            total = plan.transitions.len(),
            offset = transition.offset,
            left = %current.display(),
            right = %right.display(),
            "Merging waterfall step"
        );
        let cmd = merge_command(&current, right, &target, plan, transition, settings);
        let merged = transcoder.invoke(&cmd).await?;

        if current_is_intermediate {
            remove_quietly(&current).await;
        }
        current = merged;
        current_is_intermediate = !is_last;
    }

    info!(
        clips = plan.inputs.len(),
        merges = plan.transitions.len(),
        estimated_duration = plan.estimated_duration,
        "Crossfaded clips"
    );

    Ok(JoinOutcome {
        output: current,
        merges: plan.transitions.len(),
        estimated_duration: plan.estimated_duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records commands and touches each output file.
    #[derive(Default)]
    struct RecordingTranscoder {
        calls: Mutex<Vec<FfmpegCommand>>,
    }

    #[async_trait]
    impl Transcoder for RecordingTranscoder {
        async fn invoke(&self, cmd: &FfmpegCommand) -> MediaResult<PathBuf> {
            tokio::fs::write(cmd.output(), b"media").await?;
            self.calls.lock().unwrap().push(cmd.clone());
            Ok(cmd.output().to_path_buf())
        }

        async fn supports_encoder(&self, _encoder: &str) -> MediaResult<bool> {
            Ok(false)
        }
    }

    fn clips(durations: &[f64]) -> Vec<(PathBuf, f64)> {
        durations
            .iter()
            .enumerate()
            .map(|(i, d)| (PathBuf::from(format!("clip{}.mp4", i)), *d))
            .collect()
    }

    #[test]
    fn test_offsets_follow_running_duration() {
        let plan = JoinPlan::crossfade(clips(&[5.0, 6.0, 7.0, 4.0]), 1.0, 0.12).unwrap();
        let offsets: Vec<f64> = plan.transitions.iter().map(|t| t.offset).collect();
        assert_eq!(offsets, vec![3.88, 8.76, 14.64]);
        assert_eq!(plan.merge_count(), 3);
        assert!((plan.estimated_duration - (22.0 - 3.0 * 1.12)).abs() < 0.011);
    }

    #[test]
    fn test_offset_clamped_and_below_running_duration() {
        assert_eq!(crossfade_offset(0.5, 1.0, 0.12), 0.0);
        for cumulative in [0.3, 1.0, 2.5, 10.0, 123.456] {
            for fade in [0.0, 0.001, 0.5, 1.0, 2.0] {
                for buffer in [0.0, 0.001, 0.004, 0.12] {
                    let offset = crossfade_offset(cumulative, fade, buffer);
                    assert!(offset >= 0.0);
                    assert!(offset < cumulative, "{} !< {}", offset, cumulative);
                }
            }
        }
    }

    #[test]
    fn test_tiny_fade_stays_before_last_frame() {
        assert_eq!(crossfade_offset(1.0, 0.001, 0.0), 0.99);
        assert_eq!(crossfade_offset(1.0, 0.0, 0.0), 0.99);
        assert_eq!(crossfade_offset(0.3, 0.0, 0.0), 0.29);
        assert_eq!(crossfade_offset(10.0, 0.5, 0.005), 9.49);
        assert_eq!(crossfade_offset(5.0, 1.0, 0.12), 3.88);
    }

    #[test]
    fn test_single_clip_has_no_transitions() {
        let plan = JoinPlan::crossfade(clips(&[5.0]), 1.0, 0.12).unwrap();
        assert!(plan.transitions.is_empty());
        assert_eq!(plan.merge_count(), 1);
        assert!(JoinPlan::crossfade(Vec::new(), 1.0, 0.12).is_err());
    }

    #[test]
    fn test_concat_list_escaping() {
        let list = concat_list(&[PathBuf::from("/tmp/a.mp4"), PathBuf::from("/tmp/it's.mp4")]);
        assert_eq!(list, "file '/tmp/a.mp4'\nfile '/tmp/it'\\''s.mp4'");
    }

    #[test]
    fn test_crossfade_filter_without_normalization() {
        assert_eq!(
            crossfade_filter(3.88, 1.0, None),
            "[0:v][1:v]xfade=transition=fade:duration=1:offset=3.88,format=yuv420p[vout];\
             [0:a][1:a]acrossfade=d=1[aout]"
        );
    }

    #[test]
    fn test_crossfade_filter_with_vertical_normalization() {
        let norm = Normalization {
            resolution: Resolution::VERTICAL,
            fps: Some(50),
            audio_sample_rate: 48_000,
        };
        let filter = crossfade_filter(2.0, 1.0, Some(&norm));
        assert!(filter.starts_with(
            "[0:v]scale=1080:1920,fps=50,setpts=PTS-STARTPTS,settb=AVTB[v0];"
        ));
        assert!(filter.contains("[1:a]aresample=48000,asetpts=PTS-STARTPTS[a1]"));
        assert!(filter.contains("[v0][v1]xfade="));
        assert!(filter.ends_with("[a0][a1]acrossfade=d=1[aout]"));
    }

    #[tokio::test]
    async fn test_waterfall_executes_pairwise_and_cleans_intermediates() {
        let root = tempfile::TempDir::new().unwrap();
        let scratch = ScratchArea::create_in(root.path(), "join-").unwrap();
        let output = root.path().join("package.mp4");
        let encoding = EncodingConfig::default();
        let settings = JoinSettings {
            normalize: None,
            hardware: false,
            encoding: &encoding,
        };
        let transcoder = RecordingTranscoder::default();

        let plan = JoinPlan::crossfade(clips(&[5.0, 6.0, 7.0, 4.0]), 1.0, 0.12).unwrap();
        let outcome = execute_join(&transcoder, &plan, &output, &scratch, &settings)
            .await
            .unwrap();

        assert_eq!(outcome.merges, 3);
        assert_eq!(outcome.output, output);

        let calls = transcoder.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| c.inputs().len() == 2));
        assert_eq!(calls[0].inputs()[0].path, PathBuf::from("clip0.mp4"));
        assert_eq!(calls[1].inputs()[0].path, calls[0].output());
        assert_eq!(calls[2].inputs()[1].path, PathBuf::from("clip3.mp4"));
        assert_eq!(calls[2].output(), output.as_path());

        // Only the final output survives; intermediates were consumed
        assert!(!calls[0].output().exists());
        assert!(!calls[1].output().exists());
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_single_clip_pass_through() {
        let root = tempfile::TempDir::new().unwrap();
        let scratch = ScratchArea::create_in(root.path(), "join-").unwrap();
        let encoding = EncodingConfig::default();
        let settings = JoinSettings {
            normalize: None,
            hardware: false,
            encoding: &encoding,
        };
        let transcoder = RecordingTranscoder::default();

        let plan = JoinPlan::crossfade(clips(&[5.0]), 1.0, 0.12).unwrap();
        let outcome = execute_join(&transcoder, &plan, &root.path().join("out.mp4"), &scratch, &settings)
            .await
            .unwrap();

        assert_eq!(outcome.merges, 1);
        let calls = transcoder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].label(), "pass-through");
        assert_eq!(calls[0].output_value("-filter_complex"), None);
    }

    #[tokio::test]
    async fn test_concat_writes_list_and_invokes_once() {
        let root = tempfile::TempDir::new().unwrap();
        let scratch = ScratchArea::create_in(root.path(), "join-").unwrap();
        let encoding = EncodingConfig::default();
        let settings = JoinSettings {
            normalize: None,
            hardware: false,
            encoding: &encoding,
        };
        let transcoder = RecordingTranscoder::default();

        let plan = JoinPlan::concat(clips(&[2.0, 3.0])).unwrap();
        assert_eq!(plan.estimated_duration, 5.0);
        execute_join(&transcoder, &plan, &root.path().join("out.mp4"), &scratch, &settings)
            .await
            .unwrap();

        let calls = transcoder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let list_input = &calls[0].inputs()[0];
        assert_eq!(list_input.args, vec!["-f", "concat", "-safe", "0"]);
        let list = std::fs::read_to_string(&list_input.path).unwrap();
        assert_eq!(list, "file 'clip0.mp4'\nfile 'clip1.mp4'");
        assert_eq!(calls[0].output_value("-b:v"), Some("5M"));
    }
}
