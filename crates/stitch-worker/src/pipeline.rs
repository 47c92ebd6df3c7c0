//! Stage-timed packaging pipeline.
//!
//! A run moves strictly forward through
//! `Validate -> Fetch -> Crop -> Join -> Overlay -> Publish`. Validation
//! parses every manifest and checks encoder capability before anything is
//! fetched, so bad input fails without touching storage or FFmpeg. Any later
//! failure aborts the run; nothing is retried and the scratch area is
//! removed either way.

use std::path::{Path, PathBuf};

use stitch_media::{
    composite, crop_clip, execute_join, move_file, plan_layers, CropJob, JoinPlan, JoinSettings,
    LayerSource, MediaError, Normalization, OverlayLayer, Prober, ScratchArea, Transcoder,
};
use stitch_models::{
    order_clips, parse_clip_manifest, parse_crop_manifest, parse_overlay_manifest,
    ClipDescriptor, CropKeyframe, JoinStrategy, Locator, ManifestKind, OverlayTimeline,
    Resolution, RunReport, Stage,
};
use stitch_storage::store::local_path_for;
use stitch_storage::ObjectStore;
use tracing::{debug, info, Instrument};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{AtStage, WorkerError, WorkerResult};
use crate::logging::RunLogger;
use crate::manifest_source::ManifestLoader;
use crate::metrics::{self, StageClock};
use crate::request::RunRequest;

/// A clip after validation.
#[derive(Debug, Clone)]
struct PlannedClip {
    descriptor: ClipDescriptor,
    source: Locator,
    /// Present when the clip listed a crop manifest, possibly empty
    keyframes: Option<Vec<CropKeyframe>>,
}

/// Everything a run needs, resolved before the first fetch.
#[derive(Debug, Clone)]
struct RunPlan {
    clips: Vec<PlannedClip>,
    layers: Vec<OverlayLayer>,
    /// At least one clip listed a crop manifest
    cropped: bool,
    join_hardware: bool,
    fade_duration: f64,
    batch_size: usize,
    output: Locator,
}

impl RunPlan {
    fn planned_merges(&self, strategy: JoinStrategy) -> usize {
        match strategy {
            JoinStrategy::Concat => 1,
            JoinStrategy::Crossfade => self.clips.len().saturating_sub(1).max(1),
        }
    }
}

/// Runs packaging requests against a transcoder, prober and object store.
pub struct Pipeline<T, P, S> {
    config: PipelineConfig,
    transcoder: T,
    prober: P,
    store: S,
    manifests: ManifestLoader,
}

impl<T, P, S> Pipeline<T, P, S>
where
    T: Transcoder,
    P: Prober,
    S: ObjectStore,
{
    pub fn new(config: PipelineConfig, transcoder: T, prober: P, store: S) -> WorkerResult<Self> {
        Ok(Self {
            config,
            transcoder,
            prober,
            store,
            manifests: ManifestLoader::new()?,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn transcoder(&self) -> &T {
        &self.transcoder
    }

    pub fn prober(&self) -> &P {
        &self.prober
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Execute one run and report its stage timings.
    pub async fn run(&self, request: RunRequest) -> WorkerResult<RunReport> {
        let run_id = request
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let logger = RunLogger::new(&run_id);
        let span = logger.create_span();

        let result = self.execute(&request, &logger).instrument(span).await;
        match &result {
            Ok(report) => {
                metrics::record_run_completed(
                    report.strategy,
                    report.clip_count,
                    report.turnaround_ms,
                );
                logger.log_completion(report.turnaround_ms, &report.output_location);
            }
            Err(e) => {
                metrics::record_run_failed(e.stage(), e.kind().as_str());
                logger.log_error(e.stage(), &e.to_string());
            }
        }
        result
    }

    async fn execute(&self, request: &RunRequest, logger: &RunLogger) -> WorkerResult<RunReport> {
        let mut clock = StageClock::new();
        logger.log_start(&format!(
            "strategy={} aspect={} dry_run={}",
            request.strategy, request.aspect_ratio, request.dry_run
        ));

        let timer = clock.start(Stage::Validate);
        let plan = self.validate(request, logger).await?;
        logger.log_stage_done(Stage::Validate, clock.stop(timer));

        if request.dry_run {
            logger.log_stage(Stage::Validate, "Dry run, skipping fetch and transforms");
            return Ok(RunReport {
                run_id: logger.run_id().to_string(),
                turnaround_ms: 0.0,
                wall_clock_ms: clock.wall_clock_ms(),
                stage_timings: clock.timing(),
                output_location: plan.output.to_string(),
                strategy: request.strategy,
                clip_count: plan.clips.len(),
                merge_count: plan.planned_merges(request.strategy),
                cropped_clip_count: 0,
                overlay_count: plan.layers.len(),
                batch_size: plan.batch_size,
                estimated_duration_secs: None,
            });
        }

        let scratch = ScratchArea::create_in(&self.config.work_dir, "stitch-")
            .at_stage(Stage::Fetch)?;

        // Fetch
        let timer = clock.start(Stage::Fetch);
        logger.log_stage(Stage::Fetch, &format!("Fetching {} clips", plan.clips.len()));
        let local_clips = self.fetch_clips(&plan.clips, &scratch).await?;
        let layers = self.fetch_overlay_assets(&plan.layers, &scratch).await?;
        logger.log_stage_done(Stage::Fetch, clock.stop(timer));

        // Crop
        let mut inputs = local_clips;
        let mut cropped_clip_count = 0;
        if plan.cropped {
            let timer = clock.start(Stage::Crop);
            for (index, clip) in plan.clips.iter().enumerate() {
                if let Some(path) = self
                    .crop_one(index, clip, &inputs[index], request, &scratch, logger)
                    .await?
                {
                    inputs[index] = path;
                    cropped_clip_count += 1;
                }
            }
            logger.log_stage_done(Stage::Crop, clock.stop(timer));
        }

        // Join
        let timer = clock.start(Stage::Join);
        let durations = self.probe_inputs(&inputs, logger).await;
        let join_plan = self.plan_join(request, &plan, &inputs, durations)?;
        let package = scratch.join("package.mp4");
        let join_output = if layers.is_empty() {
            package.clone()
        } else {
            scratch.join("stitched.mp4")
        };
        let normalize = self.normalization(request, plan.cropped);
        let settings = JoinSettings {
            normalize,
            hardware: plan.join_hardware,
            encoding: &self.config.encoding,
        };
        logger.log_stage(
            Stage::Join,
            &format!(
                "Joining {} clips with {} ({} merges)",
                join_plan.inputs.len(),
                join_plan.strategy,
                join_plan.merge_count()
            ),
        );
        let joined = execute_join(&self.transcoder, &join_plan, &join_output, &scratch, &settings)
            .await
            .at_stage(Stage::Join)?;
        logger.log_stage_done(Stage::Join, clock.stop(timer));

        // Overlay
        let final_path = if layers.is_empty() {
            joined.output.clone()
        } else {
            let timer = clock.start(Stage::Overlay);
            let path = composite(
                &self.transcoder,
                &joined.output,
                &layers,
                &package,
                request.hardware.overlay,
                &self.config.encoding,
            )
            .await
            .at_stage(Stage::Overlay)?;
            logger.log_stage_done(Stage::Overlay, clock.stop(timer));
            path
        };

        // Publish
        let timer = clock.start(Stage::Publish);
        self.publish(&final_path, &plan.output).await?;
        logger.log_stage_done(Stage::Publish, clock.stop(timer));

        let timing = clock.timing();
        Ok(RunReport {
            run_id: logger.run_id().to_string(),
            turnaround_ms: timing.turnaround_ms(),
            wall_clock_ms: clock.wall_clock_ms(),
            stage_timings: timing,
            output_location: plan.output.to_string(),
            strategy: request.strategy,
            clip_count: plan.clips.len(),
            merge_count: joined.merges,
            cropped_clip_count,
            overlay_count: layers.len(),
            batch_size: plan.batch_size,
            estimated_duration_secs: (joined.estimated_duration > 0.0)
                .then_some(joined.estimated_duration),
        })
    }

    /// Parse and resolve every input. The only subprocess allowed here is
    /// the encoder capability query.
    async fn validate(&self, request: &RunRequest, logger: &RunLogger) -> WorkerResult<RunPlan> {
        request.validate()?;

        let clip_doc = self.manifests.load(ManifestKind::Clips, &request.clips).await?;
        let descriptors = order_clips(parse_clip_manifest(&clip_doc)?);

        let mut clips = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let keyframes = match &descriptor.crop_manifest {
                Some(reference) => {
                    let doc = self
                        .manifests
                        .load_reference(ManifestKind::Crop, reference)
                        .await?;
                    Some(parse_crop_manifest(&doc)?)
                }
                None => None,
            };
            clips.push(PlannedClip {
                source: request.resolve_input(&descriptor.path),
                descriptor,
                keyframes,
            });
        }

        let timeline = match &request.overlays {
            Some(source) => {
                let doc = self.manifests.load(ManifestKind::Overlay, source).await?;
                parse_overlay_manifest(&doc)?
            }
            None => OverlayTimeline::default(),
        };
        let layers = plan_layers(&timeline)
            .at_stage(Stage::Validate)?
            .into_iter()
            .map(|mut layer| {
                layer.asset = request.resolve_input(&layer.asset);
                layer
            })
            .collect::<Vec<_>>();

        if request.hardware.any() {
            let codec = &self.config.encoding.hardware_codec;
            let available = self
                .transcoder
                .supports_encoder(codec)
                .await
                .at_stage(Stage::Validate)?;
            if !available {
                return Err(WorkerError::HardwareUnavailable(codec.clone()));
            }
        }

        let cropped = clips.iter().any(|clip| clip.keyframes.is_some());
        // Hardware crossfades over cropped vertical clips crash the encoder.
        let join_hardware = request.hardware.join && !cropped;
        if request.hardware.join && cropped {
            logger.log_warning(
                Stage::Validate,
                "Hardware join disabled because clips are cropped",
            );
        }

        let batch_size = request
            .batch_size
            .unwrap_or_else(|| self.config.batch_size_for(cropped));
        let output = request.output.clone().unwrap_or_else(|| self.default_output());

        debug!(
            clips = clips.len(),
            overlays = layers.len(),
            cropped,
            join_hardware,
            output = %output,
            "Run validated"
        );

        Ok(RunPlan {
            clips,
            layers,
            cropped,
            join_hardware,
            fade_duration: request.fade_duration.unwrap_or(self.config.fade_duration),
            batch_size,
            output,
        })
    }

    fn default_output(&self) -> Locator {
        Locator::object(
            self.config.default_bucket.clone(),
            format!(
                "{}stitched-{}.mp4",
                self.config.output_prefix,
                chrono::Utc::now().timestamp_millis()
            ),
        )
    }

    async fn fetch_clips(
        &self,
        clips: &[PlannedClip],
        scratch: &ScratchArea,
    ) -> WorkerResult<Vec<PathBuf>> {
        let mut paths = Vec::with_capacity(clips.len());
        for (index, clip) in clips.iter().enumerate() {
            let path = match &clip.source {
                Locator::File(path) => {
                    let exists = tokio::fs::try_exists(path)
                        .await
                        .map_err(MediaError::from)
                        .at_stage(Stage::Fetch)?;
                    if !exists {
                        return Err(WorkerError::media(
                            Stage::Fetch,
                            MediaError::FileNotFound(path.clone()),
                        ));
                    }
                    path.clone()
                }
                Locator::Object { bucket, key } => {
                    let dir = scratch
                        .subdir(&format!("clip_{:03}", index))
                        .await
                        .at_stage(Stage::Fetch)?;
                    self.store
                        .fetch(bucket, key, &dir)
                        .await
                        .at_stage(Stage::Fetch)?
                }
            };
            debug!(
                index,
                role = %clip.descriptor.role,
                order = clip.descriptor.order,
                path = %path.display(),
                "Clip ready"
            );
            paths.push(path);
        }
        Ok(paths)
    }

    /// Download remote overlay assets; sequences are fetched by pattern prefix.
    async fn fetch_overlay_assets(
        &self,
        layers: &[OverlayLayer],
        scratch: &ScratchArea,
    ) -> WorkerResult<Vec<OverlayLayer>> {
        let mut local = Vec::with_capacity(layers.len());
        for (index, layer) in layers.iter().enumerate() {
            let Locator::Object { bucket, key } = &layer.asset else {
                local.push(layer.clone());
                continue;
            };
            let dir = scratch
                .subdir(&format!("overlay_{:03}", index))
                .await
                .at_stage(Stage::Fetch)?;

            let path = match layer.source {
                LayerSource::Still => self
                    .store
                    .fetch(bucket, key, &dir)
                    .await
                    .at_stage(Stage::Fetch)?,
                LayerSource::Sequence { .. } => {
                    let prefix = sequence_prefix(key);
                    let frames = self
                        .store
                        .fetch_prefix(bucket, prefix, &dir)
                        .await
                        .at_stage(Stage::Fetch)?;
                    debug!(index, frames = frames.len(), "Fetched overlay sequence");
                    local_path_for(&dir, prefix, key)
                }
            };
            local.push(layer.clone().with_local_asset(path));
        }
        Ok(local)
    }

    /// Crop one clip, returning the cropped path or `None` to keep the source.
    async fn crop_one(
        &self,
        index: usize,
        clip: &PlannedClip,
        input: &Path,
        request: &RunRequest,
        scratch: &ScratchArea,
        logger: &RunLogger,
    ) -> WorkerResult<Option<PathBuf>> {
        let Some(keyframes) = &clip.keyframes else {
            return Ok(None);
        };
        if keyframes.is_empty() {
            logger.log_warning(
                Stage::Crop,
                &format!("Clip {} has an empty crop manifest, using it uncropped", index),
            );
            return Ok(None);
        }

        let job = CropJob {
            input,
            output: scratch.join(format!("crop_{}.mp4", index)),
            script_path: scratch.join(format!("crop_{}.filter", index)),
            keyframes,
            aspect: request.aspect_ratio,
            vertical: self.config.vertical_resolution,
            hardware: request.hardware.crop,
            encoding: &self.config.encoding,
        };

        match crop_clip(&self.transcoder, &self.prober, job)
            .await
            .at_stage(Stage::Crop)
        {
            Ok(cropped) => {
                debug!(index, frames = cropped.frames, "Clip cropped");
                Ok(Some(cropped.path))
            }
            Err(e) if e.is_soft_crop_failure() => {
                metrics::record_crop_soft_failure();
                logger.log_warning(
                    Stage::Crop,
                    &format!("Clip {} passed through uncropped: {}", index, e),
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Probe every join input for logging and durations.
    ///
    /// A failed probe is only a warning here; it becomes fatal later if the
    /// join strategy needs that clip's duration.
    async fn probe_inputs(
        &self,
        inputs: &[PathBuf],
        logger: &RunLogger,
    ) -> Vec<Result<f64, MediaError>> {
        let mut durations = Vec::with_capacity(inputs.len());
        for (index, path) in inputs.iter().enumerate() {
            match self.prober.probe(path).await {
                Ok(info) => {
                    debug!(
                        index,
                        path = %path.display(),
                        width = info.width,
                        height = info.height,
                        fps = info.fps,
                        duration = info.duration,
                        codec = %info.codec,
                        has_audio = info.has_audio,
                        "Join input"
                    );
                    durations.push(Ok(info.duration));
                }
                Err(e) => {
                    logger.log_warning(
                        Stage::Join,
                        &format!("Could not probe join input {}: {}", path.display(), e),
                    );
                    durations.push(Err(e));
                }
            }
        }
        durations
    }

    fn plan_join(
        &self,
        request: &RunRequest,
        plan: &RunPlan,
        inputs: &[PathBuf],
        durations: Vec<Result<f64, MediaError>>,
    ) -> WorkerResult<JoinPlan> {
        let join_plan = match request.strategy {
            JoinStrategy::Concat => {
                let pairs = inputs
                    .iter()
                    .cloned()
                    .zip(durations.into_iter().map(|d| d.unwrap_or(0.0)))
                    .collect();
                JoinPlan::concat(pairs)
            }
            JoinStrategy::Crossfade => {
                let mut pairs = Vec::with_capacity(inputs.len());
                for (path, duration) in inputs.iter().zip(durations) {
                    pairs.push((path.clone(), duration.at_stage(Stage::Join)?));
                }
                JoinPlan::crossfade(pairs, plan.fade_duration, self.config.xfade_safety_buffer)
            }
        };
        join_plan.at_stage(Stage::Join)
    }

    fn normalization(&self, request: &RunRequest, cropped: bool) -> Option<Normalization> {
        let resolution: Option<Resolution> = request
            .package_resolution
            .or_else(|| cropped.then_some(self.config.vertical_resolution));
        resolution.map(|resolution| Normalization {
            resolution,
            fps: self.config.package_fps_for(cropped),
            audio_sample_rate: self.config.encoding.audio_sample_rate,
        })
    }

    async fn publish(&self, local: &Path, output: &Locator) -> WorkerResult<()> {
        match output {
            Locator::Object { bucket, key } => {
                self.store
                    .publish(bucket, key, local)
                    .await
                    .at_stage(Stage::Publish)?;
            }
            Locator::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                move_file(local, path).await.at_stage(Stage::Publish)?;
            }
        }
        info!(output = %output, "Published package");
        Ok(())
    }
}

/// Key prefix shared by every frame of an image-sequence pattern.
fn sequence_prefix(pattern: &str) -> &str {
    match pattern.find('%') {
        Some(idx) => &pattern[..idx],
        None => pattern,
    }
}
