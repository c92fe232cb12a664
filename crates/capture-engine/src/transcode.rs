//! Transcode stage: converts a recording into the requested container.

use std::sync::Arc;
use std::time::Duration;

use reelkit_codec_engine::{transcode_args, EngineLease, EngineSession, ExecObserver};
use reelkit_common::clock::with_timeout;
use reelkit_common::error::ReelResult;
use reelkit_common::progress::StageProgress;
use reelkit_scene_model::job::{ArtifactFormat, OutputSpec};

pub struct TranscodeStage {
    session: Arc<EngineSession>,
    timeout: Duration,
}

impl TranscodeStage {
    pub fn new(session: Arc<EngineSession>, timeout: Duration) -> Self {
        Self { session, timeout }
    }

    /// Whether `format` needs converting to satisfy `output`.
    pub fn is_needed(format: ArtifactFormat, output: &OutputSpec) -> bool {
        format != output.format
    }

    /// Stage `input`, re-encode it to `output.format` and return the result.
    ///
    /// The whole stage (engine load included) is bounded by the configured
    /// timeout. Staged files are gone when this returns; on timeout the
    /// dropped lease cleans up before the engine is handed to anyone else.
    pub async fn transcode(
        &self,
        input: &[u8],
        input_format: ArtifactFormat,
        output: &OutputSpec,
        expected_secs: f64,
        progress: &StageProgress,
    ) -> ReelResult<Vec<u8>> {
        tracing::info!(
            from = input_format.extension(),
            to = output.format.extension(),
            bytes = input.len(),
            "Transcoding recording"
        );
        let work = async {
            let lease = self.session.acquire().await?;
            let result = run(&lease, input, input_format, output, expected_secs, progress).await;
            lease.release().await;
            result
        };
        with_timeout("transcode", self.timeout, work).await?
    }
}

async fn run(
    lease: &EngineLease,
    input: &[u8],
    input_format: ArtifactFormat,
    output: &OutputSpec,
    expected_secs: f64,
    progress: &StageProgress,
) -> ReelResult<Vec<u8>> {
    let input_name = format!("capture.{}", input_format.extension());
    let output_name = format!("transcoded.{}", output.format.extension());
    lease.write(&input_name, input).await?;

    let progress = progress.clone();
    let observer: ExecObserver = Arc::new(move |p| progress.report(p.fraction_of(expected_secs)));
    lease
        .exec(&transcode_args(&input_name, output, &output_name), Some(observer))
        .await?;
    lease.read(&output_name).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelkit_codec_engine::testing::{MemoryRuntime, ScriptedLoader};
    use reelkit_common::error::ReelError;
    use reelkit_common::progress::ProgressCoordinator;

    fn stage(runtime: &MemoryRuntime, timeout: Duration) -> TranscodeStage {
        let loader = ScriptedLoader::new().succeed("memory", runtime.clone());
        let session = Arc::new(EngineSession::new(
            Arc::new(loader),
            vec!["memory".to_string()],
            Duration::from_secs(5),
        ));
        TranscodeStage::new(session, timeout)
    }

    #[test]
    fn test_only_mismatched_containers_need_work() {
        let output = OutputSpec::default();
        assert!(TranscodeStage::is_needed(ArtifactFormat::WebmVp8, &output));
        assert!(!TranscodeStage::is_needed(ArtifactFormat::Mp4H264, &output));
    }

    #[tokio::test]
    async fn test_transcode_stages_and_cleans_up() {
        let runtime = MemoryRuntime::new();
        let stage = stage(&runtime, Duration::from_secs(30));
        let out = stage
            .transcode(
                &[7u8; 1024],
                ArtifactFormat::WebmVp8,
                &OutputSpec::default(),
                2.0,
                &ProgressCoordinator::silent().stage("work"),
            )
            .await
            .unwrap();
        assert!(!out.is_empty());
        assert!(runtime.file_names().is_empty());
        let log = runtime.exec_log();
        assert_eq!(log[0][..2], ["-i".to_string(), "capture.webm".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_deletes_staged_files_before_next_lease() {
        let runtime = MemoryRuntime::new();
        runtime.set_exec_delay(Some(Duration::from_secs(600)));
        let stage = stage(&runtime, Duration::from_secs(10));

        let err = stage
            .transcode(
                &[7u8; 1024],
                ArtifactFormat::WebmVp8,
                &OutputSpec::default(),
                2.0,
                &ProgressCoordinator::silent().stage("work"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ReelError::Timeout(_)));

        // The next lease waits for the dropped lease's cleanup.
        let lease = stage.session.acquire().await.unwrap();
        assert!(lease.list().await.unwrap().is_empty());
        lease.release().await;
    }
}
