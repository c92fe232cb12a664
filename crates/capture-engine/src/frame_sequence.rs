//! Frame-sequence export: stills staged into the codec engine, then encoded
//! in one exec.

use std::sync::Arc;
use std::time::Duration;

use reelkit_codec_engine::{frame_file_name, frame_sequence_args, EngineLease, EngineSession, ExecObserver};
use reelkit_common::clock::with_timeout;
use reelkit_common::error::{ReelError, ReelResult};
use reelkit_common::progress::StageProgress;
use reelkit_compositor::FrameScheduler;
use reelkit_scene_model::job::OutputSpec;

/// Share of the stage spent rendering and staging frames; the rest is the
/// final encode.
const STAGING_SHARE: f64 = 0.7;

/// Renders every frame in order, stages it as a PNG and encodes the
/// sequence.
pub struct FrameSequenceExport {
    session: Arc<EngineSession>,
    exec_timeout: Duration,
}

impl FrameSequenceExport {
    pub fn new(session: Arc<EngineSession>, exec_timeout: Duration) -> Self {
        Self {
            session,
            exec_timeout,
        }
    }

    /// Produce the encoded video. Every staged file is deleted before this
    /// returns, whatever the outcome.
    pub async fn export(
        &self,
        scheduler: &mut FrameScheduler,
        output: &OutputSpec,
        progress: &StageProgress,
    ) -> ReelResult<Vec<u8>> {
        if scheduler.total_frames() == 0 {
            return Err(ReelError::invalid_input("scene timeline has no frames"));
        }
        let lease = self.session.acquire().await?;
        tracing::info!(engine = %lease.describe(), frames = scheduler.total_frames(), "Frame-sequence export started");
        let result = self.run(&lease, scheduler, output, progress).await;
        let removed = lease.release().await;
        tracing::debug!(removed, "Frame-sequence staging released");
        result
    }

    async fn run(
        &self,
        lease: &EngineLease,
        scheduler: &mut FrameScheduler,
        output: &OutputSpec,
        progress: &StageProgress,
    ) -> ReelResult<Vec<u8>> {
        scheduler.preload().await;

        let staging = progress.sub_stage(0.0, STAGING_SHARE, "rendering frames");
        let mut png: Option<Arc<Vec<u8>>> = None;
        let mut encodes = 0u64;
        while let Some(scheduled) = scheduler.next_frame().await? {
            let bytes = match (&png, scheduled.reused) {
                (Some(bytes), true) => bytes.clone(),
                _ => {
                    let frame = scheduled.frame.clone();
                    let encoded = tokio::task::spawn_blocking(move || frame.encode_png())
                        .await
                        .map_err(|e| ReelError::render(format!("PNG encode task failed: {e}")))??;
                    encodes += 1;
                    let encoded = Arc::new(encoded);
                    png = Some(encoded.clone());
                    encoded
                }
            };
            lease.write(&frame_file_name(scheduled.index), &bytes).await?;
            staging.report(scheduler.progress());
        }
        tracing::debug!(
            frames = scheduler.total_frames(),
            encodes,
            "Frames staged"
        );

        let output_name = format!("sequence.{}", output.format.extension());
        let args = frame_sequence_args(output, &output_name);
        let encoding = progress.sub_stage(STAGING_SHARE, 1.0, "encoding");
        let expected_secs = scheduler.total_frames() as f64 / output.fps as f64;
        let observer: ExecObserver = Arc::new(move |p| encoding.report(p.fraction_of(expected_secs)));
        with_timeout("frame-sequence encode", self.exec_timeout, lease.exec(&args, Some(observer))).await??;

        lease.read(&output_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use reelkit_codec_engine::testing::{MemoryRuntime, ScriptedLoader};
    use reelkit_common::progress::{ProgressCoordinator, ReelProgress};
    use reelkit_compositor::{AssetCache, Compositor, Typesetter};
    use reelkit_scene_model::scene::{SceneDescriptor, TimedScene};

    fn session(runtime: &MemoryRuntime) -> Arc<EngineSession> {
        let loader = ScriptedLoader::new().succeed("memory", runtime.clone());
        Arc::new(EngineSession::new(
            Arc::new(loader),
            vec!["memory".to_string()],
            Duration::from_secs(5),
        ))
    }

    fn scheduler(durations: &[u64], fps: u32) -> FrameScheduler {
        let compositor = Arc::new(Compositor::new(36, 64, Typesetter::without_font()));
        let scenes = durations
            .iter()
            .map(|&d| TimedScene::new(SceneDescriptor::default(), d))
            .collect();
        FrameScheduler::new(compositor, Arc::new(AssetCache::default()), scenes, fps).unwrap()
    }

    fn output(fps: u32) -> OutputSpec {
        OutputSpec {
            width: 36,
            height: 64,
            fps,
            ..OutputSpec::default()
        }
    }

    #[tokio::test]
    async fn test_stages_every_frame_then_cleans_up() {
        let runtime = MemoryRuntime::new();
        let export = FrameSequenceExport::new(session(&runtime), Duration::from_secs(30));
        let mut scheduler = scheduler(&[1000, 500], 10);

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let coordinator = ProgressCoordinator::new(
            Some(Arc::new(move |p: ReelProgress| sink_seen.lock().unwrap().push(p.percent))),
            &[("encode", 100.0)],
        )
        .unwrap();

        let bytes = export
            .export(&mut scheduler, &output(10), &coordinator.stage("encode"))
            .await
            .unwrap();
        assert!(!bytes.is_empty());
        assert!(runtime.file_names().is_empty());

        let log = runtime.exec_log();
        assert_eq!(log.len(), 1);
        assert!(log[0].contains(&"frame_%05d.png".to_string()));
        assert_eq!(log[0].last().map(String::as_str), Some("sequence.mp4"));

        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.last().copied(), Some(100.0));
    }

    #[tokio::test]
    async fn test_identical_frames_are_encoded_once() {
        let runtime = MemoryRuntime::new();
        // Capture the staged frame count at exec time, before cleanup.
        let staged = Arc::new(std::sync::Mutex::new(0usize));
        let staged_seen = staged.clone();
        let fallback = reelkit_codec_engine::testing::default_handler();
        runtime.on_exec(Arc::new(move |args: &[String], files: &mut BTreeMap<String, Vec<u8>>| {
            *staged_seen.lock().unwrap() = files.keys().filter(|k| k.starts_with("frame_")).count();
            fallback(args, files)
        }));
        let export = FrameSequenceExport::new(session(&runtime), Duration::from_secs(30));
        let mut scheduler = scheduler(&[2000, 2000, 2000, 2000, 2000, 2500], 24);

        export
            .export(&mut scheduler, &output(24), &ProgressCoordinator::silent().stage("work"))
            .await
            .unwrap();
        assert_eq!(*staged.lock().unwrap(), 300);
        assert_eq!(scheduler.render_count(), 6);
    }

    #[tokio::test]
    async fn test_failed_encode_still_cleans_up() {
        let runtime = MemoryRuntime::new();
        runtime.fail_execs_containing("frame_%05d.png", "encoder exploded");
        let export = FrameSequenceExport::new(session(&runtime), Duration::from_secs(30));
        let mut scheduler = scheduler(&[500], 10);

        let err = export
            .export(&mut scheduler, &output(10), &ProgressCoordinator::silent().stage("work"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReelError::EngineExec { .. }));
        assert!(runtime.file_names().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_encode_times_out_and_cleans_up() {
        let runtime = MemoryRuntime::new();
        runtime.set_exec_delay(Some(Duration::from_secs(3600)));
        let export = FrameSequenceExport::new(session(&runtime), Duration::from_secs(5));
        let mut scheduler = scheduler(&[300], 10);

        let err = export
            .export(&mut scheduler, &output(10), &ProgressCoordinator::silent().stage("work"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReelError::Timeout(_)));
        assert!(runtime.file_names().is_empty());
    }
}
