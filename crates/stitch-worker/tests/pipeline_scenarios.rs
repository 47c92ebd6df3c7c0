//! End-to-end pipeline runs against recording fakes and a local object store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use stitch_media::{FfmpegCommand, MediaError, MediaResult, Prober, Termination, Transcoder, VideoInfo};
use stitch_models::{JoinStrategy, Locator, Stage};
use stitch_storage::LocalStore;
use stitch_worker::{ErrorKind, ManifestSource, Pipeline, PipelineConfig, RunRequest};

/// Records every command, writes a placeholder output and takes a little time.
#[derive(Default)]
struct RecordingTranscoder {
    commands: Mutex<Vec<FfmpegCommand>>,
    filter_scripts: Mutex<Vec<String>>,
    encoder_queries: AtomicUsize,
    hardware_unavailable: bool,
    fail_label: Option<&'static str>,
}

impl RecordingTranscoder {
    fn failing(label: &'static str) -> Self {
        Self {
            fail_label: Some(label),
            ..Self::default()
        }
    }

    fn without_hardware() -> Self {
        Self {
            hardware_unavailable: true,
            ..Self::default()
        }
    }

    fn labels(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(|cmd| cmd.label().to_string())
            .collect()
    }

    fn commands(&self) -> Vec<FfmpegCommand> {
        self.commands.lock().unwrap().clone()
    }

    fn invocations(&self) -> usize {
        self.commands.lock().unwrap().len()
    }
}

#[async_trait]
impl Transcoder for RecordingTranscoder {
    async fn invoke(&self, cmd: &FfmpegCommand) -> MediaResult<PathBuf> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if let Some(script) = cmd.output_value("-filter_complex_script") {
            let text = tokio::fs::read_to_string(script).await?;
            self.filter_scripts.lock().unwrap().push(text);
        }
        self.commands.lock().unwrap().push(cmd.clone());

        if self.fail_label == Some(cmd.label()) {
            return Err(MediaError::transcode_failed(
                cmd.label(),
                Termination::Signal(9),
                "Killed",
            ));
        }
        tokio::fs::write(cmd.output(), b"rendered").await?;
        Ok(cmd.output().to_path_buf())
    }

    async fn supports_encoder(&self, _encoder: &str) -> MediaResult<bool> {
        self.encoder_queries.fetch_add(1, Ordering::SeqCst);
        Ok(!self.hardware_unavailable)
    }
}

/// Answers probes from a table keyed by file name.
struct FakeProber {
    /// name -> (width, height, duration)
    clips: HashMap<&'static str, (u32, u32, f64)>,
    calls: AtomicUsize,
}

impl FakeProber {
    fn new(clips: &[(&'static str, u32, u32, f64)]) -> Self {
        Self {
            clips: clips.iter().map(|&(n, w, h, d)| (n, (w, h, d))).collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, path: &Path) -> MediaResult<VideoInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let (width, height, duration) = self
            .clips
            .get(name.as_str())
            .copied()
            .unwrap_or((1920, 1080, 10.0));
        Ok(VideoInfo {
            duration,
            width,
            height,
            fps: 25.0,
            frame_count: (duration * 25.0).round() as u32,
            codec: "h264".to_string(),
            has_audio: true,
        })
    }
}

struct Harness {
    store_root: TempDir,
    work: TempDir,
    files: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            store_root: TempDir::new().unwrap(),
            work: TempDir::new().unwrap(),
            files: TempDir::new().unwrap(),
        }
    }

    fn seed(&self, key: &str) {
        let path = self.store_root.path().join("media").join(key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"clip").unwrap();
    }

    fn write_file(&self, name: &str, body: &str) -> PathBuf {
        let path = self.files.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn pipeline<T: Transcoder>(
        &self,
        transcoder: T,
        prober: FakeProber,
    ) -> Pipeline<T, FakeProber, LocalStore> {
        let config = PipelineConfig::default().with_work_dir(self.work.path());
        Pipeline::new(config, transcoder, prober, LocalStore::new(self.store_root.path())).unwrap()
    }

    fn published(&self, key: &str) -> bool {
        self.store_root.path().join("media").join(key).exists()
    }

    fn scratch_is_clean(&self) -> bool {
        std::fs::read_dir(self.work.path()).unwrap().next().is_none()
    }
}

#[tokio::test]
async fn test_single_clip_concat_runs_one_transcode() {
    let harness = Harness::new();
    harness.seed("clips/a.mp4");
    let pipeline = harness.pipeline(RecordingTranscoder::default(), FakeProber::new(&[]));

    let request = RunRequest {
        strategy: JoinStrategy::Concat,
        output: Some(Locator::object("media", "out/a.mp4")),
        ..RunRequest::new(ManifestSource::inline(json!(["s3://media/clips/a.mp4"])))
    };
    let report = assert_ok!(pipeline.run(request).await);

    assert_eq!(pipeline.transcoder().labels(), vec!["concat"]);
    assert!(report.stage_timings.transform_ms > 0.0);
    assert_eq!(report.stage_timings.overlay_ms, 0.0);
    assert_eq!(report.turnaround_ms, report.stage_timings.turnaround_ms());
    assert_eq!(report.clip_count, 1);
    assert_eq!(report.merge_count, 1);
    assert_eq!(report.output_location, "s3://media/out/a.mp4");
    assert!(harness.published("out/a.mp4"));
    assert!(harness.scratch_is_clean());
}

#[tokio::test]
async fn test_four_clip_crossfade_waterfall() {
    let harness = Harness::new();
    for name in ["start", "c1", "c2", "end"] {
        harness.seed(&format!("clips/{}.mp4", name));
    }
    let prober = FakeProber::new(&[
        ("start.mp4", 1920, 1080, 5.0),
        ("c1.mp4", 1920, 1080, 10.0),
        ("c2.mp4", 1920, 1080, 12.0),
        ("end.mp4", 1920, 1080, 4.0),
    ]);
    let pipeline = harness.pipeline(RecordingTranscoder::default(), prober);

    let clips = json!({"clips": [
        {"path": "s3://media/clips/end.mp4", "clipType": "end_plate"},
        {"path": "s3://media/clips/c2.mp4", "clipType": "content", "orderId": 2},
        {"path": "s3://media/clips/start.mp4", "clipType": "start_plate"},
        {"path": "s3://media/clips/c1.mp4", "clipType": "content", "orderId": 1}
    ]});
    let request = RunRequest {
        fade_duration: Some(1.0),
        output: Some(Locator::object("media", "out/package.mp4")),
        ..RunRequest::new(ManifestSource::inline(clips))
    };
    let report = assert_ok!(pipeline.run(request).await);

    assert_eq!(report.merge_count, 3);
    assert_eq!(
        pipeline.transcoder().labels(),
        vec!["crossfade", "crossfade", "crossfade"]
    );
    let estimated = report.estimated_duration_secs.unwrap();
    assert!((estimated - (31.0 - 3.0 * 1.12)).abs() < 1e-9);

    let commands = pipeline.transcoder().commands();
    let first_inputs: Vec<String> = commands[0]
        .inputs()
        .iter()
        .map(|input| input.path.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(first_inputs, vec!["start.mp4", "c1.mp4"]);
    assert!(commands[0]
        .output_value("-filter_complex")
        .unwrap()
        .contains("offset=3.88"));
    assert!(commands[2]
        .output_value("-filter_complex")
        .unwrap()
        .contains("offset=23.64"));
    // Each merge consumes the previous output
    assert_eq!(commands[1].inputs()[0].path, commands[0].output());
    assert_eq!(commands[2].output().file_name().unwrap(), "package.mp4");

    assert!(harness.published("out/package.mp4"));
    assert!(harness.scratch_is_clean());
}

#[tokio::test]
async fn test_crop_track_carries_keyframes_forward() {
    let harness = Harness::new();
    harness.seed("clips/a.mp4");
    let manifest = harness.write_file(
        "aspect.json",
        r#"{"frames": [
            {"frame": 20, "xMin": 900, "xMax": 1508, "time": 0.8},
            {"frame": 10, "xMin": 100, "xMax": 708, "time": 0.4}
        ]}"#,
    );
    // 1.2 s at 25 fps = 30 frames
    let prober = FakeProber::new(&[("a.mp4", 1920, 1080, 1.2)]);
    let pipeline = harness.pipeline(RecordingTranscoder::default(), prober);

    let clips = json!([{"path": "s3://media/clips/a.mp4", "aspectJsonPath": manifest}]);
    let mut request = RunRequest {
        strategy: JoinStrategy::Concat,
        output: Some(Locator::object("media", "out/vertical.mp4")),
        ..RunRequest::new(ManifestSource::inline(clips))
    };
    request.hardware.join = true;
    let report = assert_ok!(pipeline.run(request).await);

    assert_eq!(report.cropped_clip_count, 1);
    assert_eq!(pipeline.transcoder().labels(), vec!["crop", "concat"]);
    assert!(report.stage_timings.transform_ms > 0.0);

    let scripts = pipeline.transcoder().filter_scripts.lock().unwrap().clone();
    let script = &scripts[0];
    assert!(script.starts_with("[0:v]crop=w=608:h=1080:x="));
    assert!(script.ends_with(",scale=1080:1920:flags=lanczos[v]"));
    assert_eq!(script.matches("if(eq(n").count(), 30);
    // Frame 5 is centered, 15 holds frame 10, 25 holds frame 20
    assert!(script.contains("if(eq(n\\,4)\\,656)"));
    assert!(script.contains("if(eq(n\\,8)\\,656)"));
    assert!(script.contains("if(eq(n\\,9)\\,100)"));
    assert!(script.contains("if(eq(n\\,14)\\,100)"));
    assert!(script.contains("if(eq(n\\,24)\\,900)"));
    assert!(script.contains("if(eq(n\\,29)\\,900)"));

    // Cropped clips never join on the hardware encoder
    let concat = &pipeline.transcoder().commands()[1];
    assert_eq!(concat.output_value("-c:v"), Some("libx264"));
}

#[tokio::test]
async fn test_unfit_and_empty_crops_pass_clips_through() {
    let harness = Harness::new();
    harness.seed("clips/narrow.mp4");
    harness.seed("clips/plain.mp4");
    let keyframes = harness.write_file("narrow.json", r#"[{"frame": 1, "xMin": 0, "xMax": 200}]"#);
    let empty = harness.write_file("empty.json", r#"{"frames": []}"#);
    let prober = FakeProber::new(&[("narrow.mp4", 400, 1920, 2.0)]);
    let pipeline = harness.pipeline(RecordingTranscoder::default(), prober);

    let clips = json!([
        {"path": "s3://media/clips/narrow.mp4", "cropManifest": keyframes},
        {"path": "s3://media/clips/plain.mp4", "cropManifest": empty}
    ]);
    let request = RunRequest {
        strategy: JoinStrategy::Concat,
        output: Some(Locator::object("media", "out/mixed.mp4")),
        ..RunRequest::new(ManifestSource::inline(clips))
    };
    let report = assert_ok!(pipeline.run(request).await);

    assert_eq!(report.cropped_clip_count, 0);
    assert_eq!(pipeline.transcoder().labels(), vec!["concat"]);
    assert!(harness.published("out/mixed.mp4"));
}

#[tokio::test]
async fn test_malformed_manifest_fails_before_any_subprocess() {
    let harness = Harness::new();
    let pipeline = harness.pipeline(RecordingTranscoder::default(), FakeProber::new(&[]));

    let mut request = RunRequest::new(ManifestSource::inline(
        json!({"clips": [{"clipType": "content", "orderId": 1}]}),
    ));
    request.hardware.overlay = true;
    let err = assert_err!(pipeline.run(request).await);

    assert_eq!(err.kind(), ErrorKind::ManifestParseError);
    assert_eq!(err.stage(), Stage::Validate);
    assert_eq!(pipeline.transcoder().invocations(), 0);
    assert_eq!(pipeline.transcoder().encoder_queries.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.prober().calls.load(Ordering::SeqCst), 0);
    assert!(harness.scratch_is_clean());
}

#[tokio::test]
async fn test_unreadable_crop_manifest_is_a_manifest_error() {
    let harness = Harness::new();
    harness.seed("clips/a.mp4");
    let pipeline = harness.pipeline(RecordingTranscoder::default(), FakeProber::new(&[]));

    let missing = harness.files.path().join("missing.json");
    let clips = json!([{"path": "s3://media/clips/a.mp4", "aspectJsonPath": missing}]);
    let err = assert_err!(pipeline.run(RunRequest::new(ManifestSource::inline(clips))).await);

    assert_eq!(err.kind(), ErrorKind::ManifestParseError);
    assert_eq!(pipeline.transcoder().invocations(), 0);
}

#[tokio::test]
async fn test_missing_hardware_encoder_fails_validation() {
    let harness = Harness::new();
    harness.seed("clips/a.mp4");
    let pipeline = harness.pipeline(RecordingTranscoder::without_hardware(), FakeProber::new(&[]));

    let mut request = RunRequest::new(ManifestSource::inline(json!(["s3://media/clips/a.mp4"])));
    request.hardware.crop = true;
    let err = assert_err!(pipeline.run(request).await);

    assert_eq!(err.kind(), ErrorKind::HardwareUnavailable);
    assert_eq!(err.stage(), Stage::Validate);
    assert_eq!(pipeline.transcoder().encoder_queries.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.transcoder().invocations(), 0);
    assert!(harness.scratch_is_clean());
}

#[tokio::test]
async fn test_transcode_failure_reports_stage_and_stderr() {
    let harness = Harness::new();
    harness.seed("clips/a.mp4");
    harness.seed("clips/b.mp4");
    let pipeline = harness.pipeline(RecordingTranscoder::failing("crossfade"), FakeProber::new(&[]));

    let clips = json!(["s3://media/clips/a.mp4", "s3://media/clips/b.mp4"]);
    let request = RunRequest {
        output: Some(Locator::object("media", "out/never.mp4")),
        ..RunRequest::new(ManifestSource::inline(clips))
    };
    let err = assert_err!(pipeline.run(request).await);

    let report = err.report();
    assert_eq!(report.stage, Stage::Join);
    assert_eq!(report.kind, ErrorKind::TranscodeFailure);
    assert_eq!(report.diagnostic.as_deref(), Some("Killed"));
    assert!(!harness.published("out/never.mp4"));
    assert!(harness.scratch_is_clean());
}

#[tokio::test]
async fn test_overlay_composites_after_join_and_publishes_to_file() {
    let harness = Harness::new();
    harness.seed("clips/a.mp4");
    let logo = harness.write_file("logo.png", "png");
    let output = harness.files.path().join("out").join("package.mp4");
    let pipeline = harness.pipeline(RecordingTranscoder::default(), FakeProber::new(&[]));

    let request = RunRequest {
        strategy: JoinStrategy::Concat,
        overlays: Some(ManifestSource::inline(json!({"overlays": [
            {"markIn": 1, "markOut": 3, "gfx_type": 2, "imagePath": logo}
        ]}))),
        output: Some(Locator::File(output.clone())),
        ..RunRequest::new(ManifestSource::inline(json!(["s3://media/clips/a.mp4"])))
    };
    let report = assert_ok!(pipeline.run(request).await);

    assert_eq!(pipeline.transcoder().labels(), vec!["concat", "overlay"]);
    assert_eq!(report.overlay_count, 1);
    assert!(report.stage_timings.overlay_ms > 0.0);

    let overlay = &pipeline.transcoder().commands()[1];
    assert_eq!(overlay.inputs()[1].args, vec!["-loop", "1", "-t", "2"]);
    assert_eq!(overlay.inputs()[1].path, logo);
    assert_eq!(std::fs::read(&output).unwrap(), b"rendered");
    assert!(harness.scratch_is_clean());
}

#[tokio::test]
async fn test_dry_run_plans_without_fetching() {
    let harness = Harness::new();
    let pipeline = harness.pipeline(RecordingTranscoder::default(), FakeProber::new(&[]));

    let clips = json!(["s3://media/a.mp4", "s3://media/b.mp4", "s3://media/c.mp4", "s3://media/d.mp4"]);
    let request = RunRequest {
        dry_run: true,
        ..RunRequest::new(ManifestSource::inline(clips))
    };
    let report = assert_ok!(pipeline.run(request).await);

    assert_eq!(report.clip_count, 4);
    assert_eq!(report.merge_count, 3);
    assert_eq!(report.batch_size, 12);
    assert_eq!(report.turnaround_ms, 0.0);
    assert!(report
        .output_location
        .starts_with("s3://si-davs-playgroundvideos/packagetest/stitched-"));
    assert_eq!(pipeline.transcoder().invocations(), 0);
    assert_eq!(pipeline.prober().calls.load(Ordering::SeqCst), 0);
}
