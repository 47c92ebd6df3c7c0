//! FFmpeg command builder, runner and the `Transcoder` seam.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, trace, warn};

use crate::error::{MediaError, MediaResult, Termination};
use crate::progress::{ProgressLine, ProgressParser};

/// Default number of stderr characters kept for failure reports.
pub const DEFAULT_STDERR_TAIL_CHARS: usize = 1000;

/// One `-i` input with the options that precede it.
#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegInput {
    /// Input options (before -i)
    pub args: Vec<String>,
    /// Input file, pattern or concat list
    pub path: PathBuf,
}

/// One FFmpeg invocation: inputs, output options and a single output file.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Short operation name used in logs and errors
    label: String,
    inputs: Vec<FfmpegInput>,
    output: PathBuf,
    /// Output arguments (after the last -i)
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
    /// Expected output duration, used for progress reporting
    expected_duration: Option<f64>,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command writing to `output`.
    pub fn new(label: impl Into<String>, output: impl AsRef<Path>) -> Self {
        Self {
            label: label.into(),
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
            expected_duration: None,
        }
    }

    /// Add a plain input.
    pub fn input(self, path: impl AsRef<Path>) -> Self {
        self.input_with(Vec::<String>::new(), path)
    }

    /// Add an input with its own options.
    pub fn input_with<I, S>(mut self, args: I, path: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.push(FfmpegInput {
            args: args.into_iter().map(Into::into).collect(),
            path: path.as_ref().to_path_buf(),
        });
        self
    }

    /// Add an output argument.
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Append arguments placed after the inputs.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set filter complex.
    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    /// Read the filter graph from a script file.
    pub fn filter_complex_script(self, script: impl AsRef<Path>) -> Self {
        let script = script.as_ref().to_string_lossy().to_string();
        self.output_arg("-filter_complex_script").output_arg(script)
    }

    /// Map a stream or filter label into the output.
    pub fn map(self, spec: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(spec)
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Record the expected output duration in seconds.
    pub fn expected_duration(mut self, secs: f64) -> Self {
        self.expected_duration = Some(secs);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn inputs(&self) -> &[FfmpegInput] {
        &self.inputs
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn expected_duration_secs(&self) -> Option<f64> {
        self.expected_duration
    }

    /// Value following the first occurrence of `flag` in the output args.
    pub fn output_value(&self, flag: &str) -> Option<&str> {
        self.output_args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.output_args.get(i + 1))
            .map(String::as_str)
    }

    /// Full argv, excluding the `ffmpeg` program name.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.path.to_string_lossy().to_string());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Executes FFmpeg commands.
///
/// Every transform step goes through this trait so runs can be exercised
/// without spawning processes.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Run a command to completion and return its output path.
    async fn invoke(&self, cmd: &FfmpegCommand) -> MediaResult<PathBuf>;

    /// Whether FFmpeg lists `encoder` among its encoders.
    async fn supports_encoder(&self, encoder: &str) -> MediaResult<bool>;
}

/// Runner for FFmpeg commands with timeout and stderr capture.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    /// `ffmpeg`, or a path to a compatible binary
    program: PathBuf,
    /// Timeout in seconds
    timeout_secs: Option<u64>,
    stderr_tail_chars: usize,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            timeout_secs: None,
            stderr_tail_chars: DEFAULT_STDERR_TAIL_CHARS,
        }
    }

    /// Use a different FFmpeg binary.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Set how much stderr is attached to failures.
    pub fn with_stderr_tail(mut self, chars: usize) -> Self {
        self.stderr_tail_chars = chars;
        self
    }

    fn locate(&self) -> MediaResult<PathBuf> {
        which::which(&self.program).map_err(|_| MediaError::FfmpegNotFound)
    }

    async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<PathBuf> {
        let program = self.locate()?;

        let args = cmd.build_args();
        debug!(
            label = cmd.label(),
            "Running FFmpeg: {} {}",
            program.display(),
            args.join(" ")
        );

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child.stderr.take().ok_or_else(|| {
            MediaError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "FFmpeg stderr was not captured",
            ))
        })?;

        let label = cmd.label().to_string();
        let expected = cmd.expected_duration_secs();
        let tail_chars = self.stderr_tail_chars;

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut parser = ProgressParser::new();
            let mut diagnostics = String::new();

            while let Ok(Some(line)) = lines.next_line().await {
                match parser.feed(&line) {
                    ProgressLine::Snapshot => {
                        let progress = parser.current();
                        trace!(
                            label = %label,
                            frame = progress.frame,
                            percent = ?expected.map(|secs| progress.percentage(secs)),
                            speed = progress.speed,
                            "FFmpeg progress"
                        );
                    }
                    ProgressLine::Field => {}
                    ProgressLine::Diagnostic => {
                        diagnostics.push_str(&line);
                        diagnostics.push('\n');
                        // Keep the buffer bounded; only the tail is reported
                        if diagnostics.len() > tail_chars * 4 + 4096 {
                            let keep = tail_chars_of(&diagnostics, tail_chars * 2).to_string();
                            diagnostics = keep;
                        }
                    }
                }
            }
            tail_chars_of(diagnostics.trim_end(), tail_chars).to_string()
        });

        let started = Instant::now();
        let status = match self.timeout_secs {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(
                        label = cmd.label(),
                        "FFmpeg timed out after {} seconds, killing process", secs
                    );
                    let _ = child.kill().await;
                    reader.abort();
                    record_invocation(cmd.label(), "timeout", started.elapsed());
                    return Err(MediaError::Timeout {
                        label: cmd.label().to_string(),
                        secs,
                    });
                }
            },
            None => child.wait().await?,
        };
        let stderr_tail = reader.await.unwrap_or_default();

        if status.success() {
            record_invocation(cmd.label(), "success", started.elapsed());
            debug!(
                label = cmd.label(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "FFmpeg finished"
            );
            Ok(cmd.output().to_path_buf())
        } else {
            let termination = termination_of(&status);
            record_invocation(cmd.label(), "failure", started.elapsed());
            warn!(label = cmd.label(), %termination, "FFmpeg failed");
            Err(MediaError::transcode_failed(
                cmd.label(),
                termination,
                stderr_tail,
            ))
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegRunner {
    async fn invoke(&self, cmd: &FfmpegCommand) -> MediaResult<PathBuf> {
        self.run(cmd).await
    }

    async fn supports_encoder(&self, encoder: &str) -> MediaResult<bool> {
        let program = self.locate()?;

        let output = Command::new(&program)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::transcode_failed(
                "encoder listing",
                termination_of(&output.status),
                tail_chars_of(stderr.trim_end(), self.stderr_tail_chars),
            ));
        }

        Ok(lists_encoder(&String::from_utf8_lossy(&output.stdout), encoder))
    }
}

fn record_invocation(label: &str, outcome: &'static str, elapsed: Duration) {
    let labels = [("label", label.to_string()), ("outcome", outcome.to_string())];
    metrics::counter!("stitch_ffmpeg_invocations_total", &labels).increment(1);
    metrics::histogram!("stitch_ffmpeg_duration_seconds", &labels).record(elapsed.as_secs_f64());
}

/// Classify how a process ended.
pub fn termination_of(status: &ExitStatus) -> Termination {
    if let Some(code) = status.code() {
        return Termination::ExitCode(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Termination::Signal(signal);
        }
    }
    Termination::Unknown
}

/// Last `max` characters of `text`, on a char boundary.
pub fn tail_chars_of(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    let skip = count - max;
    match text.char_indices().nth(skip) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}

/// Whether an `ffmpeg -encoders` listing contains `encoder`.
fn lists_encoder(listing: &str, encoder: &str) -> bool {
    listing
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(encoder))
}

/// Locate `ffmpeg` on `PATH`.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Locate `ffprobe` on `PATH`.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder_multiple_inputs() {
        let cmd = FfmpegCommand::new("overlay", "out.mp4")
            .input("base.mp4")
            .input_with(["-loop", "1", "-t", "3"], "logo.png")
            .filter_complex("[0:v][1:v]overlay=0:0[out]")
            .map("[out]");

        let args = cmd.build_args();
        assert_eq!(&args[..6], &["-y", "-v", "error", "-progress", "pipe:2", "-i"]);
        assert_eq!(args[6], "base.mp4");
        assert_eq!(&args[7..13], &["-loop", "1", "-t", "3", "-i", "logo.png"]);
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
        assert_eq!(cmd.output_value("-map"), Some("[out]"));
        assert_eq!(cmd.inputs().len(), 2);
    }

    #[test]
    fn test_tail_chars_respects_char_boundaries() {
        assert_eq!(tail_chars_of("abcdef", 3), "def");
        assert_eq!(tail_chars_of("abc", 10), "abc");
        assert_eq!(tail_chars_of("ééé", 2), "éé");
        assert_eq!(tail_chars_of("abc", 0), "");
    }

    #[test]
    fn test_lists_encoder() {
        let listing = "Encoders:\n V..... = Video\n ------\n V....D libx264   libx264 H.264\n V....D h264_nvenc  NVIDIA NVENC H.264 encoder\n";
        assert!(lists_encoder(listing, "h264_nvenc"));
        assert!(lists_encoder(listing, "libx264"));
        assert!(!lists_encoder(listing, "hevc_nvenc"));
    }

    #[cfg(unix)]
    #[test]
    fn test_termination_distinguishes_signal() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(
            termination_of(&ExitStatus::from_raw(1 << 8)),
            Termination::ExitCode(1)
        );
        assert_eq!(termination_of(&ExitStatus::from_raw(9)), Termination::Signal(9));
    }

    #[cfg(unix)]
    fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_ffmpeg_is_killed_after_timeout() {
        let dir = tempfile::TempDir::new().unwrap();
        let runner = FfmpegRunner::new()
            .with_program(fake_ffmpeg(dir.path(), "sleep 30"))
            .with_timeout(1);
        let cmd = FfmpegCommand::new("crossfade", dir.path().join("out.mp4")).input("a.mp4");

        let started = Instant::now();
        let err = runner.invoke(&cmd).await.unwrap_err();
        assert!(matches!(err, MediaError::Timeout { ref label, secs: 1 } if label == "crossfade"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_ffmpeg_reports_exit_code_and_stderr_tail() {
        let dir = tempfile::TempDir::new().unwrap();
        let runner = FfmpegRunner::new()
            .with_program(fake_ffmpeg(dir.path(), "echo 'Conversion failed!' >&2; exit 3"))
            .with_timeout(10);
        let cmd = FfmpegCommand::new("concat", dir.path().join("out.mp4")).input("a.mp4");

        match runner.invoke(&cmd).await.unwrap_err() {
            MediaError::TranscodeFailed {
                termination,
                stderr_tail,
                ..
            } => {
                assert_eq!(termination, Termination::ExitCode(3));
                assert!(stderr_tail.contains("Conversion failed!"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_not_found() {
        let runner = FfmpegRunner::new().with_program("/nonexistent/ffmpeg-build");
        let cmd = FfmpegCommand::new("concat", "out.mp4");
        assert!(matches!(
            runner.invoke(&cmd).await,
            Err(MediaError::FfmpegNotFound)
        ));
    }
}
