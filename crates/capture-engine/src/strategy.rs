//! Strategy selection and the fallback coordinator for scene reels.
//!
//! [`StrategySelector::plan`] decides which strategies are worth trying, in
//! order. [`SceneReelEncoder`] walks that list: any recoverable failure of
//! one strategy (error, timeout, implausibly small artifact) moves on to the
//! next, and only the last failure reaches the caller. Live capture falls
//! back on any error at all, since the recorder is platform code whose
//! failures carry no useful classification.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use reelkit_codec_engine::EngineSession;
use reelkit_common::config::PipelineTuning;
use reelkit_common::error::{ReelError, ReelResult};
use reelkit_common::progress::StageProgress;
use reelkit_compositor::{AssetCache, Compositor, FrameScheduler};
use reelkit_scene_model::job::{Artifact, EncodingJob, JobInput, OutputSpec, Strategy};
use reelkit_scene_model::scene::{total_duration_ms, TimedScene};

use crate::frame_sequence::FrameSequenceExport;
use crate::live::LiveCapture;
use crate::platform::CapturePlatform;
use crate::transcode::TranscodeStage;

/// Share of a live attempt spent recording; the rest is transcoding.
const RECORD_SHARE: f64 = 0.85;

/// Common contract of everything that turns a job into an artifact.
#[async_trait]
pub trait SceneEncoder: Send + Sync {
    async fn encode(&self, job: &mut EncodingJob, progress: &StageProgress) -> ReelResult<Artifact>;
}

/// Picks the ordered list of strategies for the next job.
///
/// A live-capture failure is sticky: once live capture has failed in this
/// selector, later plans skip it.
#[derive(Debug)]
pub struct StrategySelector {
    live_capture: bool,
    live_failed: AtomicBool,
}

impl StrategySelector {
    pub fn new(platform: &dyn CapturePlatform) -> Self {
        Self {
            live_capture: platform.capabilities().live_capture,
            live_failed: AtomicBool::new(false),
        }
    }

    pub fn plan(&self) -> Vec<Strategy> {
        if self.live_capture && !self.live_failed.load(Ordering::SeqCst) {
            vec![Strategy::LiveCapture, Strategy::FrameSequence]
        } else {
            vec![Strategy::FrameSequence]
        }
    }

    /// Remember that live capture failed so later jobs skip it.
    pub fn record_live_failure(&self, error: &ReelError) {
        if !self.live_failed.swap(true, Ordering::SeqCst) {
            tracing::warn!(error = %error, "Live capture disabled for the rest of this process");
        }
    }

    pub fn live_failed(&self) -> bool {
        self.live_failed.load(Ordering::SeqCst)
    }
}

/// Scene-reel encoder with strategy fallback.
pub struct SceneReelEncoder {
    compositor: Arc<Compositor>,
    cache: Arc<AssetCache>,
    selector: Arc<StrategySelector>,
    live: LiveCapture,
    sequence: FrameSequenceExport,
    transcode: TranscodeStage,
    min_artifact_bytes: usize,
}

impl SceneReelEncoder {
    pub fn new(
        compositor: Arc<Compositor>,
        cache: Arc<AssetCache>,
        platform: Arc<dyn CapturePlatform>,
        session: Arc<EngineSession>,
        selector: Arc<StrategySelector>,
        tuning: &PipelineTuning,
    ) -> Self {
        Self {
            compositor,
            cache,
            selector,
            live: LiveCapture::new(platform, tuning.live_capture_slack()),
            sequence: FrameSequenceExport::new(session.clone(), tuning.exec_timeout()),
            transcode: TranscodeStage::new(session, tuning.transcode_timeout()),
            min_artifact_bytes: tuning.min_artifact_bytes,
        }
    }

    pub fn selector(&self) -> &StrategySelector {
        &self.selector
    }

    /// Try each planned strategy in order until one yields a plausible
    /// artifact.
    pub async fn encode_with_fallback(
        &self,
        job: &mut EncodingJob,
        progress: &StageProgress,
    ) -> ReelResult<Artifact> {
        let scenes = match &job.input {
            JobInput::Scenes(scenes) => scenes.clone(),
            JobInput::Clips(_) => {
                return Err(ReelError::invalid_input("scene encoder was given a clip job"))
            }
        };
        let output = job.output;
        let plan = self.selector.plan();
        tracing::info!(job = %job.id, plan = ?plan, "Encoding scene reel");

        let mut last_error = None;
        let attempts = plan.len();
        for (n, strategy) in plan.into_iter().enumerate() {
            let has_next = n + 1 < attempts;
            job.attempt(strategy);
            let attempt = match strategy {
                Strategy::LiveCapture => self.live_attempt(&scenes, &output, progress).await,
                Strategy::FrameSequence => self.sequence_attempt(&scenes, &output, progress).await,
                other => Err(ReelError::invalid_input(format!(
                    "{} cannot encode scenes",
                    other.as_str()
                ))),
            };
            match attempt {
                Ok(artifact) => {
                    job.succeed(strategy);
                    return Ok(artifact);
                }
                Err(e) if e.is_recoverable() || (has_next && strategy == Strategy::LiveCapture) => {
                    tracing::warn!(
                        job = %job.id,
                        strategy = strategy.as_str(),
                        error = %e,
                        "Strategy failed; falling back"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| ReelError::render("no encoding strategy available")))
    }

    async fn live_attempt(
        &self,
        scenes: &[TimedScene],
        output: &OutputSpec,
        progress: &StageProgress,
    ) -> ReelResult<Artifact> {
        let mut scheduler = self.scheduler(scenes, output)?;
        let recorded = self
            .live
            .record(
                &mut scheduler,
                output.width,
                output.height,
                &progress.sub_stage(0.0, RECORD_SHARE, "recording"),
            )
            .await
            .and_then(|recording| {
                if recording.bytes.len() < self.min_artifact_bytes {
                    return Err(ReelError::EmptyOutput {
                        bytes: recording.bytes.len(),
                        min_bytes: self.min_artifact_bytes,
                    });
                }
                Ok(recording)
            });
        let recording = match recorded {
            Ok(recording) => recording,
            Err(e) => {
                self.selector.record_live_failure(&e);
                return Err(e);
            }
        };

        let duration_ms = total_duration_ms(scenes);
        let bytes = if TranscodeStage::is_needed(recording.format, output) {
            self.transcode
                .transcode(
                    &recording.bytes,
                    recording.format,
                    output,
                    duration_ms as f64 / 1000.0,
                    &progress.sub_stage(RECORD_SHARE, 1.0, "transcoding"),
                )
                .await?
        } else {
            recording.bytes
        };

        Artifact {
            bytes,
            format: output.format,
            strategy: Strategy::LiveCapture,
            duration_ms,
        }
        .ensure_plausible(self.min_artifact_bytes)
    }

    async fn sequence_attempt(
        &self,
        scenes: &[TimedScene],
        output: &OutputSpec,
        progress: &StageProgress,
    ) -> ReelResult<Artifact> {
        let mut scheduler = self.scheduler(scenes, output)?;
        let bytes = self.sequence.export(&mut scheduler, output, progress).await?;
        Artifact {
            bytes,
            format: output.format,
            strategy: Strategy::FrameSequence,
            duration_ms: total_duration_ms(scenes),
        }
        .ensure_plausible(self.min_artifact_bytes)
    }

    fn scheduler(&self, scenes: &[TimedScene], output: &OutputSpec) -> ReelResult<FrameScheduler> {
        FrameScheduler::new(
            self.compositor.clone(),
            self.cache.clone(),
            scenes.to_vec(),
            output.fps,
        )
    }
}

#[async_trait]
impl SceneEncoder for SceneReelEncoder {
    async fn encode(&self, job: &mut EncodingJob, progress: &StageProgress) -> ReelResult<Artifact> {
        self.encode_with_fallback(job, progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    use reelkit_codec_engine::testing::{MemoryRuntime, ScriptedLoader};
    use reelkit_common::progress::ProgressCoordinator;
    use reelkit_compositor::Typesetter;
    use reelkit_scene_model::job::ArtifactFormat;
    use reelkit_scene_model::scene::SceneDescriptor;

    use crate::testing::FakePlatform;

    const W: u32 = 36;
    const H: u32 = 64;

    struct Fixture {
        runtime: MemoryRuntime,
        platform: Arc<FakePlatform>,
        encoder: SceneReelEncoder,
    }

    fn fixture(platform: FakePlatform, tuning: PipelineTuning) -> Fixture {
        let runtime = MemoryRuntime::new();
        let loader = ScriptedLoader::new().succeed("memory", runtime.clone());
        let session = Arc::new(EngineSession::new(
            Arc::new(loader),
            vec!["memory".to_string()],
            Duration::from_secs(5),
        ));
        let platform = Arc::new(platform);
        let selector = Arc::new(StrategySelector::new(platform.as_ref()));
        let encoder = SceneReelEncoder::new(
            Arc::new(Compositor::new(W, H, Typesetter::without_font())),
            Arc::new(AssetCache::default()),
            platform.clone(),
            session,
            selector,
            &tuning,
        );
        Fixture {
            runtime,
            platform,
            encoder,
        }
    }

    fn listing_job() -> EncodingJob {
        let mut scenes: Vec<TimedScene> = (0..5)
            .map(|_| TimedScene::new(SceneDescriptor::default(), 2000))
            .collect();
        scenes.push(TimedScene::new(SceneDescriptor::default(), 2500));
        EncodingJob::scenes(
            scenes,
            OutputSpec {
                width: W,
                height: H,
                fps: 24,
                format: ArtifactFormat::Mp4H264,
            },
        )
    }

    fn stage() -> StageProgress {
        ProgressCoordinator::silent().stage("work")
    }

    #[test]
    fn test_plan_without_capability_skips_live_capture() {
        let selector = StrategySelector::new(&FakePlatform::incapable());
        assert_eq!(selector.plan(), vec![Strategy::FrameSequence]);

        let selector = StrategySelector::new(&FakePlatform::capable());
        assert_eq!(
            selector.plan(),
            vec![Strategy::LiveCapture, Strategy::FrameSequence]
        );
        selector.record_live_failure(&ReelError::unsupported_platform("gone"));
        assert_eq!(selector.plan(), vec![Strategy::FrameSequence]);
    }

    #[tokio::test]
    async fn test_incapable_platform_never_opens_a_recorder() {
        let f = fixture(FakePlatform::incapable(), PipelineTuning::default());
        let mut job = listing_job();
        job.start().unwrap();
        let artifact = f.encoder.encode(&mut job, &stage()).await.unwrap();
        assert_eq!(artifact.strategy, Strategy::FrameSequence);
        assert_eq!(artifact.duration_ms, 12_500);
        assert_eq!(f.platform.recorders_opened(), 0);
        assert!(f.runtime.file_names().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_capture_records_every_frame_then_transcodes() {
        let f = fixture(FakePlatform::capable(), PipelineTuning::default());
        let mut job = listing_job();
        job.start().unwrap();
        let artifact = f.encoder.encode(&mut job, &stage()).await.unwrap();

        assert_eq!(artifact.strategy, Strategy::LiveCapture);
        assert_eq!(artifact.format, ArtifactFormat::Mp4H264);
        assert_eq!(job.strategy(), Some(Strategy::LiveCapture));
        // 12.5 s at 24 fps.
        assert_eq!(f.platform.frames_recorded(), 300);
        let log = f.runtime.exec_log();
        assert_eq!(log.len(), 1);
        assert!(log[0].contains(&"capture.webm".to_string()));
        assert!(f.runtime.file_names().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_native_container_skips_transcode() {
        let platform = FakePlatform::capable().with_recording_format(ArtifactFormat::Mp4H264);
        let f = fixture(platform, PipelineTuning::default());
        let mut job = listing_job();
        job.start().unwrap();
        let artifact = f.encoder.encode(&mut job, &stage()).await.unwrap();
        assert_eq!(artifact.strategy, Strategy::LiveCapture);
        assert!(f.runtime.exec_log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_undersized_recording_falls_back_and_sticks() {
        let platform = FakePlatform::capable().with_recording_bytes(512);
        let f = fixture(platform, PipelineTuning::default());

        let mut job = listing_job();
        job.start().unwrap();
        let artifact = f.encoder.encode(&mut job, &stage()).await.unwrap();
        assert_eq!(artifact.strategy, Strategy::FrameSequence);
        assert!(artifact.len() >= PipelineTuning::default().min_artifact_bytes);
        assert!(f.encoder.selector().live_failed());
        assert!(f.runtime.file_names().is_empty());

        let mut second = listing_job();
        second.start().unwrap();
        f.encoder.encode(&mut second, &stage()).await.unwrap();
        assert_eq!(f.platform.recorders_opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recorder_crash_falls_back_to_frame_sequence() {
        let platform = FakePlatform::capable().with_recorder_failure_after(10);
        let f = fixture(platform, PipelineTuning::default());

        let mut job = listing_job();
        job.start().unwrap();
        let artifact = f.encoder.encode(&mut job, &stage()).await.unwrap();
        assert_eq!(artifact.strategy, Strategy::FrameSequence);
        assert_eq!(job.strategy(), Some(Strategy::FrameSequence));
        assert_eq!(f.platform.frames_recorded(), 10);
        assert!(f.encoder.selector().live_failed());
        assert!(f.runtime.file_names().is_empty());
    }

    #[tokio::test]
    async fn test_render_errors_from_frame_sequence_still_surface() {
        let f = fixture(FakePlatform::incapable(), PipelineTuning::default());
        f.runtime.on_exec(Arc::new(|_args: &[String], _files: &mut BTreeMap<String, Vec<u8>>| {
            Err(ReelError::render("encoder produced garbage"))
        }));
        let mut job = listing_job();
        job.start().unwrap();
        let err = f.encoder.encode(&mut job, &stage()).await.unwrap_err();
        assert!(matches!(err, ReelError::Render { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transcode_failure_falls_back_without_stale_files() {
        let f = fixture(FakePlatform::capable(), PipelineTuning::default());
        f.runtime.on_exec(Arc::new(|args: &[String], files: &mut BTreeMap<String, Vec<u8>>| {
            if args.iter().any(|a| a == "capture.webm") {
                // Leave a partial output behind; cleanup must remove it.
                files.insert("transcoded.mp4".to_string(), vec![1; 10]);
                return Err(ReelError::engine_exec("muxer stalled"));
            }
            reelkit_codec_engine::testing::default_handler()(args, files)
        }));

        let mut job = listing_job();
        job.start().unwrap();
        let artifact = f.encoder.encode(&mut job, &stage()).await.unwrap();
        assert_eq!(artifact.strategy, Strategy::FrameSequence);
        // Engine trouble is not the recorder's fault.
        assert!(!f.encoder.selector().live_failed());
        assert!(f.runtime.file_names().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_strategies_surface_last_error() {
        let f = fixture(FakePlatform::incapable(), PipelineTuning::default());
        f.runtime.fail_execs_containing("frame_%05d.png", "no encoder");
        let mut job = listing_job();
        job.start().unwrap();
        let err = f.encoder.encode(&mut job, &stage()).await.unwrap_err();
        assert!(matches!(err, ReelError::EngineExec { .. }));
        assert!(f.runtime.file_names().is_empty());
    }

    #[tokio::test]
    async fn test_clip_jobs_are_rejected() {
        let f = fixture(FakePlatform::incapable(), PipelineTuning::default());
        let mut job = EncodingJob::clips(
            vec![reelkit_scene_model::clip::Clip::from_path("a.mp4", 1.0)],
            OutputSpec::default(),
        );
        let err = f.encoder.encode(&mut job, &stage()).await.unwrap_err();
        assert!(matches!(err, ReelError::InvalidInput { .. }));
    }
}
