//! Pipeline metrics.

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};
use stitch_models::{JoinStrategy, Stage, StageTiming};

/// Metric names as constants for consistency.
pub mod names {
    pub const STAGE_DURATION_MS: &str = "stitch_stage_duration_ms";
    pub const RUNS_TOTAL: &str = "stitch_runs_total";
    pub const RUNS_FAILED_TOTAL: &str = "stitch_runs_failed_total";
    pub const RUN_TURNAROUND_MS: &str = "stitch_run_turnaround_ms";
    pub const CROP_SOFT_FAILURES_TOTAL: &str = "stitch_crop_soft_failures_total";
    pub const RUN_CLIPS: &str = "stitch_run_clips";
}

/// Record a finished stage.
pub fn record_stage(stage: Stage, elapsed: Duration) {
    let labels = [("stage", stage.as_str().to_string())];
    histogram!(names::STAGE_DURATION_MS, &labels).record(elapsed.as_secs_f64() * 1000.0);
}

/// Record a completed run.
pub fn record_run_completed(strategy: JoinStrategy, clips: usize, turnaround_ms: f64) {
    let labels = [("outcome", "completed".to_string())];
    counter!(names::RUNS_TOTAL, &labels).increment(1);
    let labels = [("strategy", strategy.as_str().to_string())];
    histogram!(names::RUN_TURNAROUND_MS, &labels).record(turnaround_ms);
    gauge!(names::RUN_CLIPS).set(clips as f64);
}

/// Record a failed run.
pub fn record_run_failed(stage: Stage, kind: &str) {
    let labels = [("outcome", "failed".to_string())];
    counter!(names::RUNS_TOTAL, &labels).increment(1);
    let labels = [
        ("stage", stage.as_str().to_string()),
        ("kind", kind.to_string()),
    ];
    counter!(names::RUNS_FAILED_TOTAL, &labels).increment(1);
}

/// Record a clip that passed through uncropped.
pub fn record_crop_soft_failure() {
    counter!(names::CROP_SOFT_FAILURES_TOTAL).increment(1);
}

/// Accumulates stage durations for one run.
#[derive(Debug)]
pub struct StageClock {
    timing: StageTiming,
    started: Instant,
}

impl StageClock {
    pub fn new() -> Self {
        Self {
            timing: StageTiming::default(),
            started: Instant::now(),
        }
    }

    /// Start timing a stage.
    pub fn start(&self, stage: Stage) -> StageTimer {
        StageTimer {
            stage,
            started: Instant::now(),
        }
    }

    /// Stop a timer, adding its elapsed time to the run totals.
    pub fn stop(&mut self, timer: StageTimer) -> Duration {
        let elapsed = timer.started.elapsed();
        self.timing.record(timer.stage, elapsed);
        record_stage(timer.stage, elapsed);
        elapsed
    }

    pub fn timing(&self) -> StageTiming {
        self.timing
    }

    pub fn wall_clock_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for StageClock {
    fn default() -> Self {
        Self::new()
    }
}

/// A running stage measurement.
#[derive(Debug)]
#[must_use = "stop the timer with StageClock::stop"]
pub struct StageTimer {
    stage: Stage,
    started: Instant,
}

impl StageTimer {
    pub fn stage(&self) -> Stage {
        self.stage
    }
}
