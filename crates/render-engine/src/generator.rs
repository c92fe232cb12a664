//! Reel generation entry points.
//!
//! [`ReelGenerator`] owns the long-lived pieces (engine session, asset
//! cache, capture platform, strategy selector) and runs one job per call:
//! - [`generate_reel`](ReelGenerator::generate_reel): scenes → video via
//!   live capture or frame-sequence export
//! - [`generate_multi_clip_reel`](ReelGenerator::generate_multi_clip_reel):
//!   clips → video via engine concat, falling back to frame recapture

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reelkit_capture_engine::{
    CapturePlatform, SceneReelEncoder, StrategySelector, SystemPlatform, TranscodeStage,
};
use reelkit_codec_engine::{EngineSession, EngineState};
use reelkit_common::clock::{with_timeout, JobClock};
use reelkit_common::config::{AppConfig, PipelineTuning};
use reelkit_common::error::{ReelError, ReelResult};
use reelkit_common::progress::{ProgressCallback, ProgressCoordinator, StageProgress};
use reelkit_compositor::{AssetCache, ClipOverlay, Compositor, Typesetter};
use reelkit_scene_model::clip::{total_clip_duration_secs, Clip};
use reelkit_scene_model::color::Color;
use reelkit_scene_model::job::{
    Artifact, ArtifactFormat, EncodingJob, JobInput, OutputSpec, Strategy,
};
use reelkit_scene_model::scene::TimedScene;

use crate::concat::{ConcatPipeline, ConcatStages};
use crate::recapture::FrameRecapture;

/// Progress plan for scene reels.
pub const SCENE_REEL_STAGES: [(&str, f64); 3] =
    [("assets", 10.0), ("encode", 80.0), ("finalize", 10.0)];

/// Progress plan for multi-clip reels.
pub const MULTI_CLIP_STAGES: [(&str, f64); 4] = [
    ("load", 20.0),
    ("normalize", 60.0),
    ("concat", 15.0),
    ("finalize", 5.0),
];

/// Per-call options.
#[derive(Clone, Default)]
pub struct ReelOptions {
    pub output: OutputSpec,
    pub progress: Option<ProgressCallback>,
    /// Overall time budget for the job.
    pub budget: Option<Duration>,
    /// Branding drawn over clips when they are recaptured.
    pub overlay: ClipOverlay,
}

impl std::fmt::Debug for ReelOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReelOptions")
            .field("output", &self.output)
            .field("progress", &self.progress.is_some())
            .field("budget", &self.budget)
            .field("overlay", &self.overlay)
            .finish()
    }
}

impl ReelOptions {
    /// Options with the configured output defaults.
    pub fn from_config(config: &AppConfig) -> ReelResult<Self> {
        Ok(Self {
            output: OutputSpec {
                width: config.output.width,
                height: config.output.height,
                fps: config.output.fps,
                format: ArtifactFormat::from_name(&config.output.format)?,
            },
            ..Self::default()
        })
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }
}

pub struct ReelGenerator {
    session: Arc<EngineSession>,
    platform: Arc<dyn CapturePlatform>,
    cache: Arc<AssetCache>,
    selector: Arc<StrategySelector>,
    typesetter: Typesetter,
    fill: Color,
    tuning: PipelineTuning,
}

impl ReelGenerator {
    /// Generator using the process-wide engine session and the system
    /// capture platform.
    pub fn from_config(config: &AppConfig) -> Self {
        let session = EngineSession::shared(&config.engine);
        let platform: Arc<dyn CapturePlatform> =
            Arc::new(SystemPlatform::detect(&config.engine.primary, &config.capture));
        Self::with_parts(session, platform, Arc::new(AssetCache::default()), config)
    }

    /// Generator over explicit parts.
    pub fn with_parts(
        session: Arc<EngineSession>,
        platform: Arc<dyn CapturePlatform>,
        cache: Arc<AssetCache>,
        config: &AppConfig,
    ) -> Self {
        let fill = config.render.background.parse().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid render.background, using black");
            Color::BLACK
        });
        let selector = Arc::new(StrategySelector::new(platform.as_ref()));
        Self {
            session,
            platform,
            cache,
            selector,
            typesetter: Typesetter::load_or_fallback(config.render.font_path.as_deref()),
            fill,
            tuning: config.pipeline.clone(),
        }
    }

    /// Replace the asset cache, e.g. one resolving paths against a
    /// document's directory.
    pub fn with_asset_cache(mut self, cache: Arc<AssetCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn session(&self) -> &Arc<EngineSession> {
        &self.session
    }

    pub fn cache(&self) -> &Arc<AssetCache> {
        &self.cache
    }

    pub fn selector(&self) -> &StrategySelector {
        &self.selector
    }

    /// Compositor for one output size.
    pub fn compositor(&self, output: &OutputSpec) -> Arc<Compositor> {
        Arc::new(
            Compositor::new(output.width, output.height, self.typesetter.clone()).with_fill(self.fill),
        )
    }

    /// Render `scenes` into one video.
    pub async fn generate_reel(
        &self,
        scenes: Vec<TimedScene>,
        options: ReelOptions,
    ) -> ReelResult<Artifact> {
        let asset_ids: BTreeSet<String> = scenes
            .iter()
            .flat_map(|s| s.scene.asset_ids())
            .map(str::to_string)
            .collect();
        let mut job = EncodingJob::scenes(scenes, options.output).with_budget(options.budget);
        job.validate()?;
        let coordinator = ProgressCoordinator::new(options.progress.clone(), &SCENE_REEL_STAGES)?;
        let clock = JobClock::start();
        job.start()?;

        let result = within_budget(
            options.budget,
            self.encode_scenes(&mut job, &asset_ids, &coordinator),
        )
        .await;
        conclude(&mut job, &coordinator, &clock, result)
    }

    /// Join `clips` into one video.
    pub async fn generate_multi_clip_reel(
        &self,
        clips: Vec<Clip>,
        options: ReelOptions,
    ) -> ReelResult<Artifact> {
        let mut job = EncodingJob::clips(clips, options.output).with_budget(options.budget);
        job.validate()?;
        let coordinator = ProgressCoordinator::new(options.progress.clone(), &MULTI_CLIP_STAGES)?;
        let clock = JobClock::start();
        job.start()?;

        let result = within_budget(
            options.budget,
            self.encode_clips(&mut job, &options.overlay, &coordinator),
        )
        .await;
        conclude(&mut job, &coordinator, &clock, result)
    }

    async fn encode_scenes(
        &self,
        job: &mut EncodingJob,
        asset_ids: &BTreeSet<String>,
        coordinator: &ProgressCoordinator,
    ) -> ReelResult<Artifact> {
        self.preload_assets(asset_ids, &coordinator.stage("assets")).await;

        let encoder = SceneReelEncoder::new(
            self.compositor(&job.output),
            self.cache.clone(),
            self.platform.clone(),
            self.session.clone(),
            self.selector.clone(),
            &self.tuning,
        );
        let artifact = encoder
            .encode_with_fallback(job, &coordinator.stage("encode"))
            .await?;
        coordinator.stage("finalize").report_labeled(0.5, "finalizing");
        Ok(artifact)
    }

    /// Warm the cache. Missing assets render as absent, so failures are
    /// only logged.
    async fn preload_assets(&self, asset_ids: &BTreeSet<String>, progress: &StageProgress) {
        progress.begin();
        let total = asset_ids.len().max(1);
        for (done, id) in asset_ids.iter().enumerate() {
            if let Err(e) = self.cache.get_or_load(id).await {
                tracing::warn!(asset = %id, error = %e, "Asset unavailable; layer will be skipped");
            }
            progress.report((done + 1) as f64 / total as f64);
        }
        progress.complete();
    }

    async fn encode_clips(
        &self,
        job: &mut EncodingJob,
        overlay: &ClipOverlay,
        coordinator: &ProgressCoordinator,
    ) -> ReelResult<Artifact> {
        let clips = match &job.input {
            JobInput::Clips(clips) => clips.clone(),
            JobInput::Scenes(_) => {
                return Err(ReelError::invalid_input("multi-clip reel was given scenes"))
            }
        };
        let output = job.output;
        let stages = ConcatStages {
            load: coordinator.stage("load"),
            normalize: coordinator.stage("normalize"),
            join: coordinator.stage("concat"),
        };
        let concat = ConcatPipeline::new(self.session.clone(), self.tuning.exec_timeout(), self.fill);

        job.attempt(Strategy::EngineConcat);
        let engine_error = match self.engine_concat(&concat, &clips, &output, &stages).await {
            Ok(artifact) => {
                job.succeed(Strategy::EngineConcat);
                return Ok(artifact);
            }
            Err(e) if falls_back_to_recapture(&e) => e,
            Err(e) => return Err(e),
        };

        let recapture = FrameRecapture::new(
            self.platform.clone(),
            self.cache.clone(),
            self.tuning.stall_window(),
        );
        if !recapture.is_available() {
            tracing::warn!(error = %engine_error, "Engine concat failed and frame recapture is unavailable");
            return Err(engine_error);
        }
        tracing::warn!(job = %job.id, error = %engine_error, "Engine concat failed; recapturing frames");

        job.attempt(Strategy::FrameRecapture);
        match self
            .recapture(&recapture, &clips, overlay, &output, coordinator)
            .await
        {
            Ok(artifact) => {
                job.succeed(Strategy::FrameRecapture);
                Ok(artifact)
            }
            Err(stall @ ReelError::Stall { .. }) => {
                tracing::warn!(job = %job.id, error = %stall, "Recapture stalled; retrying the engine once");
                job.attempt(Strategy::EngineConcat);
                match self.engine_concat(&concat, &clips, &output, &stages).await {
                    Ok(artifact) => {
                        job.succeed(Strategy::EngineConcat);
                        Ok(artifact)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Engine retry failed");
                        Err(stall)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn engine_concat(
        &self,
        concat: &ConcatPipeline,
        clips: &[Clip],
        output: &OutputSpec,
        stages: &ConcatStages,
    ) -> ReelResult<Artifact> {
        let bytes = concat.run(clips, output, stages).await?;
        Artifact {
            bytes,
            format: output.format,
            strategy: Strategy::EngineConcat,
            duration_ms: clips_duration_ms(clips),
        }
        .ensure_plausible(self.tuning.min_artifact_bytes)
    }

    async fn recapture(
        &self,
        recapture: &FrameRecapture,
        clips: &[Clip],
        overlay: &ClipOverlay,
        output: &OutputSpec,
        coordinator: &ProgressCoordinator,
    ) -> ReelResult<Artifact> {
        let progress = coordinator
            .stage("normalize")
            .sub_stage(0.0, 1.0, "recapturing");
        let recording = recapture
            .recapture(clips, overlay, self.compositor(output), output, &progress)
            .await?;
        if recording.bytes.len() < self.tuning.min_artifact_bytes {
            return Err(ReelError::EmptyOutput {
                bytes: recording.bytes.len(),
                min_bytes: self.tuning.min_artifact_bytes,
            });
        }

        let duration_ms = clips_duration_ms(clips);
        let mut bytes = recording.bytes;
        let mut format = recording.format;
        // Only convert when the engine is already up; loading it again here
        // would repeat the failure that sent us down this path.
        if TranscodeStage::is_needed(format, output) && self.session.state() == EngineState::Loaded {
            let stage = TranscodeStage::new(self.session.clone(), self.tuning.transcode_timeout());
            match stage
                .transcode(&bytes, format, output, duration_ms as f64 / 1000.0, &coordinator.stage("concat"))
                .await
            {
                Ok(converted) => {
                    bytes = converted;
                    format = output.format;
                }
                Err(e) => tracing::warn!(error = %e, "Transcode failed; keeping the recording's container"),
            }
        } else if format != output.format {
            tracing::warn!(
                requested = output.format.extension(),
                delivered = format.extension(),
                "Engine unavailable; delivering the recording's native container"
            );
        }

        Artifact {
            bytes,
            format,
            strategy: Strategy::FrameRecapture,
            duration_ms,
        }
        .ensure_plausible(self.tuning.min_artifact_bytes)
    }
}

fn falls_back_to_recapture(error: &ReelError) -> bool {
    error.is_engine_failure()
        || matches!(error, ReelError::Timeout(_) | ReelError::EmptyOutput { .. })
}

fn clips_duration_ms(clips: &[Clip]) -> u64 {
    (total_clip_duration_secs(clips) * 1000.0).round() as u64
}

async fn within_budget<T, F>(budget: Option<Duration>, work: F) -> ReelResult<T>
where
    F: Future<Output = ReelResult<T>>,
{
    match budget {
        Some(budget) => with_timeout("reel", budget, work).await?,
        None => work.await,
    }
}

fn conclude(
    job: &mut EncodingJob,
    coordinator: &ProgressCoordinator,
    clock: &JobClock,
    result: ReelResult<Artifact>,
) -> ReelResult<Artifact> {
    match result {
        Ok(artifact) => {
            coordinator.finish("done");
            tracing::info!(
                job = %job.id,
                strategy = artifact.strategy.as_str(),
                bytes = artifact.len(),
                mime = artifact.mime_type(),
                elapsed_secs = clock.elapsed_secs(),
                "Reel ready"
            );
            Ok(artifact)
        }
        Err(e) => {
            job.fail(&e);
            Err(e)
        }
    }
}
