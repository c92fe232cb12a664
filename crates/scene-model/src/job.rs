//! Encoding jobs and the artifacts they produce.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use reelkit_common::error::{ReelError, ReelResult};

use crate::clip::{total_clip_duration_secs, Clip};
use crate::scene::{total_duration_ms, TimedScene};

/// Output container/codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactFormat {
    /// H.264 in MP4.
    Mp4H264,
    /// VP8 in WebM.
    WebmVp8,
    /// Animated GIF.
    Gif,
}

impl ArtifactFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ArtifactFormat::Mp4H264 => "video/mp4",
            ArtifactFormat::WebmVp8 => "video/webm",
            ArtifactFormat::Gif => "image/gif",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactFormat::Mp4H264 => "mp4",
            ArtifactFormat::WebmVp8 => "webm",
            ArtifactFormat::Gif => "gif",
        }
    }

    /// Parse a CLI/config name (`mp4-h264`, `mp4`, `webm`, `gif`).
    pub fn from_name(name: &str) -> ReelResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "mp4-h264" | "mp4" | "h264" => Ok(ArtifactFormat::Mp4H264),
            "webm-vp8" | "webm" | "vp8" => Ok(ArtifactFormat::WebmVp8),
            "gif" => Ok(ArtifactFormat::Gif),
            other => Err(ReelError::invalid_input(format!(
                "Unknown format: {other}. Use: mp4-h264, webm-vp8, gif"
            ))),
        }
    }
}

/// Target output parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: ArtifactFormat,
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            fps: 24,
            format: ArtifactFormat::Mp4H264,
        }
    }
}

impl OutputSpec {
    pub fn validate(&self) -> ReelResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ReelError::invalid_input("output width/height must be non-zero"));
        }
        if self.fps == 0 || self.fps > 120 {
            return Err(ReelError::invalid_input("output fps must be in 1..=120"));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(ReelError::invalid_input(
                "output width/height must be even (required for yuv420p)",
            ));
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        reelkit_common::clock::frame_interval(self.fps)
    }
}

/// How an artifact was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Real-time recording of the rendered surface.
    LiveCapture,
    /// Still frames fed to the codec engine as an image sequence.
    FrameSequence,
    /// Per-clip normalization plus demuxer-level concat in the engine.
    EngineConcat,
    /// Clips replayed onto a surface and recorded in real time.
    FrameRecapture,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::LiveCapture => "live-capture",
            Strategy::FrameSequence => "frame-sequence",
            Strategy::EngineConcat => "engine-concat",
            Strategy::FrameRecapture => "frame-recapture",
        }
    }

    /// Whether the strategy needs the codec engine session.
    pub fn needs_engine(self) -> bool {
        matches!(self, Strategy::FrameSequence | Strategy::EngineConcat)
    }
}

/// A finished, downloadable video.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub format: ArtifactFormat,
    pub strategy: Strategy,
    /// Nominal playback duration in milliseconds.
    pub duration_ms: u64,
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("bytes", &self.bytes.len())
            .field("format", &self.format)
            .field("strategy", &self.strategy)
            .field("duration_ms", &self.duration_ms)
            .finish()
    }
}

impl Artifact {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reject artifacts too small to be a real video.
    pub fn ensure_plausible(self, min_bytes: usize) -> ReelResult<Self> {
        if self.bytes.len() < min_bytes {
            return Err(ReelError::EmptyOutput {
                bytes: self.bytes.len(),
                min_bytes,
            });
        }
        Ok(self)
    }
}

/// What a job encodes.
#[derive(Debug, Clone)]
pub enum JobInput {
    Scenes(Vec<TimedScene>),
    Clips(Vec<Clip>),
}

/// Lifecycle of an encoding job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Running,
    Succeeded,
    Failed,
}

/// One request to produce an artifact.
#[derive(Debug, Clone)]
pub struct EncodingJob {
    pub id: String,
    pub input: JobInput,
    pub output: OutputSpec,
    /// Overall time budget; `None` means unbounded.
    pub budget: Option<Duration>,
    pub created_at: String,
    state: JobState,
    strategy: Option<Strategy>,
}

static JOB_COUNTER: AtomicU64 = AtomicU64::new(1);

impl EncodingJob {
    pub fn new(input: JobInput, output: OutputSpec) -> Self {
        let now = chrono::Utc::now();
        let seq = JOB_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self {
            id: format!("job-{}-{seq}", now.format("%Y%m%dT%H%M%S")),
            input,
            output,
            budget: None,
            created_at: now.to_rfc3339(),
            state: JobState::Created,
            strategy: None,
        }
    }

    pub fn scenes(scenes: Vec<TimedScene>, output: OutputSpec) -> Self {
        Self::new(JobInput::Scenes(scenes), output)
    }

    pub fn clips(clips: Vec<Clip>, output: OutputSpec) -> Self {
        Self::new(JobInput::Clips(clips), output)
    }

    pub fn with_budget(mut self, budget: Option<Duration>) -> Self {
        self.budget = budget;
        self
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Strategy currently running (or that produced the artifact).
    pub fn strategy(&self) -> Option<Strategy> {
        self.strategy
    }

    /// Nominal output duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        match &self.input {
            JobInput::Scenes(scenes) => total_duration_ms(scenes),
            JobInput::Clips(clips) => (total_clip_duration_secs(clips) * 1000.0).round() as u64,
        }
    }

    /// Check the job can be run at all.
    pub fn validate(&self) -> ReelResult<()> {
        self.output.validate()?;
        match &self.input {
            JobInput::Scenes(scenes) => {
                if scenes.is_empty() {
                    return Err(ReelError::invalid_input("job has no scenes"));
                }
                if let Some(i) = scenes.iter().position(|s| s.duration_ms == 0) {
                    return Err(ReelError::invalid_input(format!(
                        "scene {i} has zero duration"
                    )));
                }
            }
            JobInput::Clips(clips) => {
                if clips.is_empty() {
                    return Err(ReelError::invalid_input("job has no clips"));
                }
                if let Some(i) = clips
                    .iter()
                    .position(|c| !c.duration_secs.is_finite() || c.duration_secs <= 0.0)
                {
                    return Err(ReelError::invalid_input(format!(
                        "clip {i} has no positive duration"
                    )));
                }
            }
        }
        Ok(())
    }

    /// `Created → Running`.
    pub fn start(&mut self) -> ReelResult<()> {
        if self.state != JobState::Created {
            return Err(ReelError::invalid_input(format!(
                "job {} already started ({:?})",
                self.id, self.state
            )));
        }
        self.state = JobState::Running;
        tracing::info!(job = %self.id, "Job running");
        Ok(())
    }

    /// Record the strategy being attempted.
    pub fn attempt(&mut self, strategy: Strategy) {
        tracing::info!(job = %self.id, strategy = strategy.as_str(), "Attempting strategy");
        self.strategy = Some(strategy);
    }

    /// `Running → Succeeded`.
    pub fn succeed(&mut self, strategy: Strategy) {
        self.strategy = Some(strategy);
        self.state = JobState::Succeeded;
        tracing::info!(job = %self.id, strategy = strategy.as_str(), "Job succeeded");
    }

    /// `Running → Failed`.
    pub fn fail(&mut self, error: &ReelError) {
        self.state = JobState::Failed;
        tracing::error!(job = %self.id, error = %error, "Job failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneDescriptor;

    #[test]
    fn test_format_names_and_mime() {
        assert_eq!(ArtifactFormat::from_name("MP4").unwrap(), ArtifactFormat::Mp4H264);
        assert_eq!(ArtifactFormat::from_name("webm").unwrap().mime_type(), "video/webm");
        assert!(ArtifactFormat::from_name("avi").is_err());
    }

    #[test]
    fn test_output_spec_rejects_odd_sizes() {
        let spec = OutputSpec {
            width: 1081,
            ..OutputSpec::default()
        };
        assert!(spec.validate().is_err());
        assert!(OutputSpec::default().validate().is_ok());
    }

    #[test]
    fn test_job_lifecycle() {
        let scenes = vec![TimedScene::new(SceneDescriptor::default(), 2_000)];
        let mut job = EncodingJob::scenes(scenes, OutputSpec::default());
        assert_eq!(job.state(), JobState::Created);
        job.start().unwrap();
        assert!(job.start().is_err());
        job.attempt(Strategy::LiveCapture);
        assert_eq!(job.strategy(), Some(Strategy::LiveCapture));
        job.succeed(Strategy::FrameSequence);
        assert_eq!(job.state(), JobState::Succeeded);
        assert_eq!(job.strategy(), Some(Strategy::FrameSequence));
    }

    #[test]
    fn test_job_duration_for_listing_shape() {
        let mut scenes: Vec<TimedScene> = (0..5)
            .map(|_| TimedScene::new(SceneDescriptor::default(), 2_000))
            .collect();
        scenes.push(TimedScene::new(SceneDescriptor::default(), 2_500));
        let job = EncodingJob::scenes(scenes, OutputSpec::default());
        assert_eq!(job.duration_ms(), 12_500);
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_and_zero_duration() {
        let job = EncodingJob::clips(Vec::new(), OutputSpec::default());
        assert!(job.validate().is_err());
        let job = EncodingJob::scenes(
            vec![TimedScene::new(SceneDescriptor::default(), 0)],
            OutputSpec::default(),
        );
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_artifact_plausibility() {
        let artifact = Artifact {
            bytes: vec![0u8; 10],
            format: ArtifactFormat::WebmVp8,
            strategy: Strategy::LiveCapture,
            duration_ms: 1_000,
        };
        assert!(matches!(
            artifact.clone().ensure_plausible(100),
            Err(ReelError::EmptyOutput { bytes: 10, .. })
        ));
        assert!(artifact.ensure_plausible(10).is_ok());
    }
}
