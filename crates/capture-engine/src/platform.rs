//! Platform capture contracts.
//!
//! A [`CapturePlatform`] supplies the two real-time facilities the pipeline
//! can use without the codec engine: a [`SurfaceRecorder`] that turns pushed
//! frames into a video, and a [`ClipDecoder`] that plays a clip back frame by
//! frame. Whether either exists is reported up front through
//! [`PlatformCapabilities`] so strategy selection never has to probe by
//! trying.

use async_trait::async_trait;
use image::RgbaImage;

use reelkit_common::error::ReelResult;
use reelkit_compositor::RasterFrame;
use reelkit_scene_model::clip::Clip;
use reelkit_scene_model::job::ArtifactFormat;

/// What the current platform can do in real time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlatformCapabilities {
    /// Frames pushed to a surface can be recorded as they are produced.
    pub live_capture: bool,
    /// Clips can be decoded and played back frame by frame.
    pub clip_playback: bool,
}

/// Runtime statistics from a recorder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecorderStats {
    /// Frames accepted by the recorder.
    pub frames_recorded: u64,

    /// Frames skipped because they did not match the surface.
    pub frames_dropped: u64,

    /// Size of the finished recording.
    pub bytes_written: u64,
}

impl RecorderStats {
    /// Drop rate as a percentage.
    pub fn drop_rate(&self) -> f64 {
        let total = self.frames_recorded + self.frames_dropped;
        if total == 0 {
            return 0.0;
        }
        self.frames_dropped as f64 / total as f64 * 100.0
    }
}

/// A finished recording in the platform's native container.
#[derive(Clone)]
pub struct Recording {
    pub bytes: Vec<u8>,
    pub format: ArtifactFormat,
    pub stats: RecorderStats,
}

impl std::fmt::Debug for Recording {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recording")
            .field("bytes", &self.bytes.len())
            .field("format", &self.format)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Records a drawing surface in real time.
///
/// Frames are timestamped by arrival: the caller is responsible for pacing
/// pushes at the target frame rate. Dropping a recorder without calling
/// [`finish`](SurfaceRecorder::finish) discards the recording.
#[async_trait]
pub trait SurfaceRecorder: Send {
    /// Append one frame to the recording.
    async fn push_frame(&mut self, frame: &RasterFrame) -> ReelResult<()>;

    /// Stop recording and finalize the container.
    async fn finish(self: Box<Self>) -> ReelResult<Recording>;

    /// Current statistics.
    fn stats(&self) -> RecorderStats;
}

/// One decoded clip frame.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub image: RgbaImage,
    /// Playback position of this frame in seconds.
    pub position_secs: f64,
}

/// Plays a clip back frame by frame.
#[async_trait]
pub trait ClipDecoder: Send {
    /// The next frame, or `None` at the end of the clip.
    async fn next_frame(&mut self) -> ReelResult<Option<DecodedFrame>>;
}

/// Abstract interface for platform-specific capture facilities.
#[async_trait]
pub trait CapturePlatform: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    fn capabilities(&self) -> PlatformCapabilities;

    /// Open a recorder for a `width`×`height` surface at `fps`.
    async fn open_recorder(
        &self,
        width: u32,
        height: u32,
        fps: u32,
    ) -> ReelResult<Box<dyn SurfaceRecorder>>;

    /// Open a decoder producing frames at `fps`.
    async fn open_decoder(
        &self,
        clip: &Clip,
        width: u32,
        height: u32,
        fps: u32,
    ) -> ReelResult<Box<dyn ClipDecoder>>;
}
