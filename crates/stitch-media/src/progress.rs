//! FFmpeg `-progress` stream parsing.

use serde::{Deserialize, Serialize};

/// Progress snapshot from FFmpeg.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Set once FFmpeg reports `progress=end`
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Progress percentage given the expected output duration in seconds.
    pub fn percentage(&self, expected_secs: f64) -> f64 {
        if expected_secs <= 0.0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / (expected_secs * 1000.0)) * 100.0).min(100.0)
    }
}

/// Outcome of feeding one stderr line to [`ProgressParser`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressLine {
    /// A `progress=` line closed a block
    Snapshot,
    /// Any other `key=value` progress field
    Field,
    /// Regular diagnostic output
    Diagnostic,
}

/// Incremental parser for the `key=value` blocks FFmpeg writes with
/// `-progress pipe:2`.
#[derive(Debug, Default)]
pub struct ProgressParser {
    current: FfmpegProgress,
}

const PROGRESS_KEYS: &[&str] = &[
    "frame",
    "fps",
    "stream_0_0_q",
    "bitrate",
    "total_size",
    "out_time_us",
    "out_time_ms",
    "out_time",
    "dup_frames",
    "drop_frames",
    "speed",
    "progress",
];

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest accumulated snapshot.
    pub fn current(&self) -> &FfmpegProgress {
        &self.current
    }

    /// Classify and absorb one stderr line.
    pub fn feed(&mut self, line: &str) -> ProgressLine {
        let line = line.trim();
        let Some((key, value)) = line.split_once('=') else {
            return ProgressLine::Diagnostic;
        };
        if !PROGRESS_KEYS.contains(&key) && !key.starts_with("stream_") {
            return ProgressLine::Diagnostic;
        }

        match key {
            "out_time_us" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.current.out_time_ms = us / 1000;
                }
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    self.current.frame = frame;
                }
            }
            "speed" => {
                if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                    self.current.speed = speed;
                }
            }
            "progress" => {
                self.current.is_complete = value == "end";
                return ProgressLine::Snapshot;
            }
            _ => {}
        }
        ProgressLine::Field
    }
}
