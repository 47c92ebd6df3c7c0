//! Packaging worker binary.
//!
//! Usage: `stitch-worker <request.json>` runs one request and prints the run
//! report; `stitch-worker --schema` prints the request schema.

use std::process::ExitCode;

use schemars::schema_for;
use tokio::io::AsyncReadExt;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stitch_media::{FfmpegRunner, FfprobeProber, Transcoder};
use stitch_models::{ManifestError, ManifestKind, RunReport};
use stitch_storage::{LocalStore, ObjectStore, S3Store};
use stitch_worker::{Pipeline, PipelineConfig, RunRequest, WorkerError};

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let Some(arg) = std::env::args().nth(1) else {
        eprintln!("usage: stitch-worker <request.json | -> | --schema");
        return ExitCode::from(2);
    };

    if arg == "--schema" {
        let schema = schema_for!(RunRequest);
        return match serde_json::to_string_pretty(&schema) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Failed to render schema: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let config = PipelineConfig::from_env();
    info!("Pipeline config: {:?}", config);

    let runner = FfmpegRunner::new()
        .with_timeout(config.ffmpeg_timeout.as_secs())
        .with_stderr_tail(config.stderr_tail_chars);

    let result = match config.local_store_root.clone() {
        Some(root) => {
            info!(root = %root.display(), "Using local object store");
            run(config, runner, LocalStore::new(root), &arg).await
        }
        None => match S3Store::from_env().await {
            Ok(store) => run(config, runner, store, &arg).await,
            Err(e) => Err(WorkerError::config_error(e.to_string())),
        },
    };

    match result {
        Ok(report) => {
            print_json(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Run failed: {}", e);
            print_json(&e.report());
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stitch_worker=info,stitch_media=info,stitch_storage=info"));

    // stdout carries the report, so logs go to stderr
    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run<S: ObjectStore>(
    config: PipelineConfig,
    transcoder: impl Transcoder,
    store: S,
    source: &str,
) -> Result<RunReport, WorkerError> {
    let text = read_request(source)
        .await
        .map_err(|e| ManifestError::unreadable(ManifestKind::Request, source, e.to_string()))?;
    let request = RunRequest::from_json(&text)?;

    let pipeline = Pipeline::new(config, transcoder, FfprobeProber, store)?;
    pipeline.run(request).await
}

/// Request text from a file, or stdin for `-`.
async fn read_request(source: &str) -> std::io::Result<String> {
    if source == "-" {
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await?;
        return Ok(buf);
    }
    tokio::fs::read_to_string(source).await
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to serialize output: {}", e),
    }
}
