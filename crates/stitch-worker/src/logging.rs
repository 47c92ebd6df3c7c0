//! Structured run logging.
//!
//! Every pipeline event carries the run id and the stage it came from so a
//! run can be followed through JSON logs.

use std::time::Duration;
use stitch_models::Stage;
use tracing::{error, info, warn, Span};

/// Logger bound to a single pipeline run.
#[derive(Debug, Clone)]
pub struct RunLogger {
    run_id: String,
}

impl RunLogger {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    /// Log the start of a run.
    pub fn log_start(&self, message: &str) {
        info!(run_id = %self.run_id, "Run started: {}", message);
    }

    /// Log the start of a stage.
    pub fn log_stage(&self, stage: Stage, message: &str) {
        info!(run_id = %self.run_id, stage = %stage, "{}", message);
    }

    /// Log a finished stage with its elapsed time.
    pub fn log_stage_done(&self, stage: Stage, elapsed: Duration) {
        info!(
            run_id = %self.run_id,
            stage = %stage,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "Stage finished"
        );
    }

    pub fn log_warning(&self, stage: Stage, message: &str) {
        warn!(run_id = %self.run_id, stage = %stage, "Run warning: {}", message);
    }

    pub fn log_error(&self, stage: Stage, message: &str) {
        error!(run_id = %self.run_id, stage = %stage, "Run failed: {}", message);
    }

    /// Log the completion of a run.
    pub fn log_completion(&self, turnaround_ms: f64, output: &str) {
        info!(
            run_id = %self.run_id,
            turnaround_ms,
            output,
            "Run completed"
        );
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Span covering the whole run.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("run", run_id = %self.run_id)
    }
}
