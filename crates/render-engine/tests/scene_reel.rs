use std::sync::{Arc, Mutex};
use std::time::Duration;

use reelkit_capture_engine::testing::FakePlatform;
use reelkit_codec_engine::testing::{MemoryRuntime, ScriptedLoader};
use reelkit_codec_engine::EngineSession;
use reelkit_common::config::AppConfig;
use reelkit_common::error::ReelError;
use reelkit_common::progress::{ProgressCallback, ReelProgress};
use reelkit_compositor::AssetCache;
use reelkit_render_engine::{ReelGenerator, ReelOptions};
use reelkit_scene_model::job::{ArtifactFormat, OutputSpec, Strategy};
use reelkit_scene_model::scene::{SceneDescriptor, TimedScene};

fn output(format: ArtifactFormat) -> OutputSpec {
    OutputSpec {
        width: 72,
        height: 128,
        fps: 24,
        format,
    }
}

fn engine(runtime: MemoryRuntime) -> Arc<EngineSession> {
    let loader = Arc::new(ScriptedLoader::new().succeed("primary", runtime));
    Arc::new(EngineSession::new(loader, vec!["primary".into()], Duration::from_secs(5)))
}

fn scenes(durations_ms: &[u64]) -> Vec<TimedScene> {
    durations_ms
        .iter()
        .map(|ms| {
            let mut scene = SceneDescriptor::default();
            scene.text.title = Some("Corner flat".into());
            // Missing background: the layer is skipped, the job still renders.
            scene.background = Some("missing/background.jpg".into());
            TimedScene::new(scene, *ms)
        })
        .collect()
}

fn options(format: ArtifactFormat) -> ReelOptions {
    ReelOptions {
        output: output(format),
        ..ReelOptions::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_live_capture_transcodes_to_mp4() {
    let runtime = MemoryRuntime::new();
    let platform = Arc::new(FakePlatform::capable());
    let generator = ReelGenerator::with_parts(
        engine(runtime.clone()),
        platform.clone(),
        Arc::new(AssetCache::default()),
        &AppConfig::default(),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: ProgressCallback =
        Arc::new(move |p: ReelProgress| sink.lock().unwrap().push(p.percent));

    let artifact = generator
        .generate_reel(
            scenes(&[1000, 1000]),
            options(ArtifactFormat::Mp4H264).with_progress(callback),
        )
        .await
        .unwrap();

    assert_eq!(artifact.strategy, Strategy::LiveCapture);
    assert_eq!(artifact.format, ArtifactFormat::Mp4H264);
    assert_eq!(artifact.duration_ms, 2000);
    assert_eq!(platform.frames_recorded(), 48);
    assert_eq!(runtime.exec_log().len(), 1);
    assert!(runtime.file_names().is_empty());

    let seen = seen.lock().unwrap();
    assert!(seen.windows(2).all(|w| w[1] >= w[0]));
    assert_eq!(seen.last().copied(), Some(100.0));
}

#[tokio::test]
async fn test_without_live_capture_exports_frame_sequence() {
    let runtime = MemoryRuntime::new();
    let platform = Arc::new(FakePlatform::incapable());
    let generator = ReelGenerator::with_parts(
        engine(runtime.clone()),
        platform.clone(),
        Arc::new(AssetCache::default()),
        &AppConfig::default(),
    );

    let artifact = generator
        .generate_reel(scenes(&[500]), options(ArtifactFormat::WebmVp8))
        .await
        .unwrap();

    assert_eq!(artifact.strategy, Strategy::FrameSequence);
    assert_eq!(artifact.format, ArtifactFormat::WebmVp8);
    assert_eq!(artifact.mime_type(), "video/webm");
    let execs = runtime.exec_log();
    assert_eq!(execs.len(), 1);
    assert_eq!(execs[0].last().map(String::as_str), Some("sequence.webm"));
    assert!(runtime.file_names().is_empty());
    assert_eq!(platform.recorders_opened(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_live_capture_failure_sticks_across_jobs() {
    let runtime = MemoryRuntime::new();
    let platform = Arc::new(FakePlatform::capable().with_recording_bytes(512));
    let generator = ReelGenerator::with_parts(
        engine(runtime.clone()),
        platform.clone(),
        Arc::new(AssetCache::default()),
        &AppConfig::default(),
    );

    let first = generator
        .generate_reel(scenes(&[500]), options(ArtifactFormat::Mp4H264))
        .await
        .unwrap();
    assert_eq!(first.strategy, Strategy::FrameSequence);
    assert!(generator.selector().live_failed());

    let second = generator
        .generate_reel(scenes(&[500]), options(ArtifactFormat::Mp4H264))
        .await
        .unwrap();
    assert_eq!(second.strategy, Strategy::FrameSequence);
    assert_eq!(platform.recorders_opened(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_recorder_crash_mid_capture_falls_back_to_frame_sequence() {
    let runtime = MemoryRuntime::new();
    let platform = Arc::new(FakePlatform::capable().with_recorder_failure_after(5));
    let generator = ReelGenerator::with_parts(
        engine(runtime.clone()),
        platform.clone(),
        Arc::new(AssetCache::default()),
        &AppConfig::default(),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: ProgressCallback =
        Arc::new(move |p: ReelProgress| sink.lock().unwrap().push(p.percent));

    let artifact = generator
        .generate_reel(
            scenes(&[1000]),
            options(ArtifactFormat::Mp4H264).with_progress(callback),
        )
        .await
        .unwrap();

    assert_eq!(artifact.strategy, Strategy::FrameSequence);
    assert_eq!(artifact.format, ArtifactFormat::Mp4H264);
    assert_eq!(platform.recorders_opened(), 1);
    assert_eq!(platform.frames_recorded(), 5);
    assert!(generator.selector().live_failed());
    // Only the frame-sequence encode ran, and it left nothing staged.
    assert_eq!(runtime.exec_log().len(), 1);
    assert!(runtime.file_names().is_empty());

    let seen = seen.lock().unwrap();
    assert!(seen.windows(2).all(|w| w[1] >= w[0]));
    assert_eq!(seen.last().copied(), Some(100.0));
}

#[tokio::test(start_paused = true)]
async fn test_budget_bounds_the_whole_job() {
    let runtime = MemoryRuntime::new();
    runtime.set_exec_delay(Some(Duration::from_secs(60)));
    let generator = ReelGenerator::with_parts(
        engine(runtime),
        Arc::new(FakePlatform::incapable()),
        Arc::new(AssetCache::default()),
        &AppConfig::default(),
    );

    let err = generator
        .generate_reel(
            scenes(&[250]),
            options(ArtifactFormat::Mp4H264).with_budget(Duration::from_secs(5)),
        )
        .await
        .unwrap_err();

    match err {
        ReelError::Timeout(timeout) => assert_eq!(timeout.stage, "reel"),
        other => panic!("expected a timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_scene_list_is_rejected() {
    let generator = ReelGenerator::with_parts(
        engine(MemoryRuntime::new()),
        Arc::new(FakePlatform::capable()),
        Arc::new(AssetCache::default()),
        &AppConfig::default(),
    );
    let err = generator
        .generate_reel(Vec::new(), options(ArtifactFormat::Mp4H264))
        .await
        .unwrap_err();
    assert!(matches!(err, ReelError::InvalidInput { .. }));
}
