//! Packaging worker: run requests through the crop, join and overlay pipeline.
//!
//! This crate provides:
//! - [`PipelineConfig`] with environment-driven defaults
//! - The [`RunRequest`] document and manifest loading
//! - The stage-timed [`Pipeline`] orchestrator
//! - The worker error taxonomy and failure reports

pub mod config;
pub mod error;
pub mod logging;
pub mod manifest_source;
pub mod metrics;
pub mod pipeline;
pub mod request;

pub use config::PipelineConfig;
pub use error::{AtStage, ErrorKind, FailureReport, WorkerError, WorkerResult};
pub use logging::RunLogger;
pub use manifest_source::ManifestLoader;
pub use pipeline::Pipeline;
pub use request::{ManifestSource, RunRequest};
