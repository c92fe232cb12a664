//! System platform backed by an ffmpeg binary on `PATH`.
//!
//! Recording pipes raw RGBA frames into an ffmpeg child that writes
//! WebM/VP8 to a temporary file. Playback runs a second child that decodes
//! a clip, letterboxes it to the surface size and streams raw RGBA frames
//! back over stdout.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use image::RgbaImage;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use reelkit_codec_engine::command_exists;
use reelkit_common::config::{CaptureConfig, LiveCaptureMode};
use reelkit_common::error::{ReelError, ReelResult};
use reelkit_compositor::RasterFrame;
use reelkit_scene_model::clip::{Clip, ClipSource};
use reelkit_scene_model::job::ArtifactFormat;

use crate::platform::{
    CapturePlatform, ClipDecoder, DecodedFrame, PlatformCapabilities, RecorderStats, Recording,
    SurfaceRecorder,
};

/// Platform facilities provided by a local ffmpeg.
#[derive(Debug, Clone)]
pub struct SystemPlatform {
    binary: String,
    capabilities: PlatformCapabilities,
}

impl SystemPlatform {
    /// Detect what the local system supports. Live capture additionally
    /// honours the configured policy.
    pub fn detect(binary: &str, capture: &CaptureConfig) -> Self {
        let available = command_exists(binary);
        let capabilities = PlatformCapabilities {
            live_capture: available && capture.live_capture != LiveCaptureMode::Disabled,
            clip_playback: available,
        };
        tracing::info!(
            binary,
            live_capture = capabilities.live_capture,
            clip_playback = capabilities.clip_playback,
            "Detected capture platform"
        );
        Self {
            binary: binary.to_string(),
            capabilities,
        }
    }

    /// A platform with no real-time facilities.
    pub fn unavailable() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            capabilities: PlatformCapabilities::default(),
        }
    }
}

#[async_trait]
impl CapturePlatform for SystemPlatform {
    fn name(&self) -> &str {
        "system-ffmpeg"
    }

    fn capabilities(&self) -> PlatformCapabilities {
        self.capabilities
    }

    async fn open_recorder(
        &self,
        width: u32,
        height: u32,
        fps: u32,
    ) -> ReelResult<Box<dyn SurfaceRecorder>> {
        if !self.capabilities.live_capture {
            return Err(ReelError::unsupported_platform(
                "live capture is not available on this system",
            ));
        }
        let recorder = PipeRecorder::spawn(&self.binary, width, height, fps)?;
        Ok(Box::new(recorder))
    }

    async fn open_decoder(
        &self,
        clip: &Clip,
        width: u32,
        height: u32,
        fps: u32,
    ) -> ReelResult<Box<dyn ClipDecoder>> {
        if !self.capabilities.clip_playback {
            return Err(ReelError::unsupported_platform(
                "clip playback is not available on this system",
            ));
        }
        let decoder = PipeDecoder::spawn(&self.binary, clip, width, height, fps).await?;
        Ok(Box::new(decoder))
    }
}

/// Records frames by piping them into ffmpeg.
struct PipeRecorder {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_task: Option<JoinHandle<String>>,
    output: NamedTempFile,
    frame_len: usize,
    stats: RecorderStats,
}

impl PipeRecorder {
    fn spawn(binary: &str, width: u32, height: u32, fps: u32) -> ReelResult<Self> {
        let output = tempfile::Builder::new()
            .prefix("reelkit-live-")
            .suffix(".webm")
            .tempfile()?;

        let mut child = Command::new(binary)
            .args(["-hide_banner", "-y", "-loglevel", "error"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgba"])
            .arg("-s")
            .arg(format!("{width}x{height}"))
            .arg("-framerate")
            .arg(fps.to_string())
            .args(["-i", "pipe:0", "-an"])
            .args(["-c:v", "libvpx", "-deadline", "realtime", "-cpu-used", "8"])
            .args(["-b:v", "4000k", "-pix_fmt", "yuv420p", "-f", "webm"])
            .arg(output.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ReelError::unsupported_platform(format!("Failed to start recorder: {e}")))?;

        let stdin = child.stdin.take();
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut output = String::new();
                let _ = BufReader::new(stderr).read_to_string(&mut output).await;
                output
            })
        });

        tracing::debug!(width, height, fps, output = %output.path().display(), "Recorder started");
        Ok(Self {
            child,
            stdin,
            stderr_task,
            output,
            frame_len: width as usize * height as usize * 4,
            stats: RecorderStats::default(),
        })
    }
}

#[async_trait]
impl SurfaceRecorder for PipeRecorder {
    async fn push_frame(&mut self, frame: &RasterFrame) -> ReelResult<()> {
        let bytes = frame.as_bytes();
        if bytes.len() != self.frame_len {
            self.stats.frames_dropped += 1;
            tracing::warn!(
                expected = self.frame_len,
                actual = bytes.len(),
                "Frame does not match recorder surface; dropped"
            );
            return Ok(());
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ReelError::render("recorder input already closed"))?;
        stdin
            .write_all(bytes)
            .await
            .map_err(|e| ReelError::render(format!("recorder stopped accepting frames: {e}")))?;
        self.stats.frames_recorded += 1;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> ReelResult<Recording> {
        // Closing stdin is the recorder's end-of-stream signal.
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| ReelError::render(format!("Failed to wait on recorder: {e}")))?;
        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        if !status.success() {
            return Err(ReelError::render(format!(
                "recorder failed (status {status}): {}",
                stderr.trim()
            )));
        }

        let bytes = tokio::fs::read(self.output.path()).await?;
        let mut stats = self.stats.clone();
        stats.bytes_written = bytes.len() as u64;
        Ok(Recording {
            bytes,
            format: ArtifactFormat::WebmVp8,
            stats,
        })
    }

    fn stats(&self) -> RecorderStats {
        self.stats.clone()
    }
}

/// Decodes a clip by reading raw frames from an ffmpeg child.
struct PipeDecoder {
    _child: Child,
    stdout: BufReader<ChildStdout>,
    // Keeps in-memory clips on disk while ffmpeg reads them.
    _staged: Option<NamedTempFile>,
    frame_len: usize,
    width: u32,
    height: u32,
    fps: u32,
    index: u64,
}

impl PipeDecoder {
    async fn spawn(binary: &str, clip: &Clip, width: u32, height: u32, fps: u32) -> ReelResult<Self> {
        let (input, staged): (PathBuf, Option<NamedTempFile>) = match &clip.source {
            ClipSource::Path(path) => (path.clone(), None),
            ClipSource::Bytes(bytes) => {
                let file = tempfile::Builder::new()
                    .prefix("reelkit-clip-")
                    .suffix(&format!(".{}", clip.extension))
                    .tempfile()?;
                tokio::fs::write(file.path(), bytes).await?;
                (file.path().to_path_buf(), Some(file))
            }
        };

        let filter = format!(
            "fps={fps},scale={width}:{height}:force_original_aspect_ratio=decrease,\
             pad={width}:{height}:(ow-iw)/2:(oh-ih)/2:color=black"
        );
        let mut child = Command::new(binary)
            .args(["-hide_banner", "-nostdin", "-loglevel", "error", "-i"])
            .arg(&input)
            .args(["-an", "-vf", &filter, "-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ReelError::unsupported_platform(format!("Failed to start decoder: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ReelError::render("Failed to capture decoder output"))?;

        Ok(Self {
            _child: child,
            stdout: BufReader::new(stdout),
            _staged: staged,
            frame_len: width as usize * height as usize * 4,
            width,
            height,
            fps: fps.max(1),
            index: 0,
        })
    }
}

#[async_trait]
impl ClipDecoder for PipeDecoder {
    async fn next_frame(&mut self) -> ReelResult<Option<DecodedFrame>> {
        let mut buf = vec![0u8; self.frame_len];
        match self.stdout.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let image = RgbaImage::from_raw(self.width, self.height, buf)
            .ok_or_else(|| ReelError::render("decoded frame has the wrong size"))?;
        let position_secs = self.index as f64 / self.fps as f64;
        self.index += 1;
        Ok(Some(DecodedFrame {
            image,
            position_secs,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_policy_turns_off_live_capture() {
        let config = CaptureConfig {
            live_capture: LiveCaptureMode::Disabled,
        };
        let platform = SystemPlatform::detect("/nonexistent/reelkit/ffmpeg", &config);
        assert!(!platform.capabilities().live_capture);
        assert!(!platform.capabilities().clip_playback);
    }

    #[tokio::test]
    async fn test_unavailable_platform_refuses_to_record() {
        let platform = SystemPlatform::unavailable();
        let err = platform.open_recorder(16, 16, 24).await.err().unwrap();
        assert!(matches!(err, ReelError::UnsupportedPlatform { .. }));
        let clip = Clip::from_path("/tmp/missing.mp4", 1.0);
        let err = platform.open_decoder(&clip, 16, 16, 24).await.err().unwrap();
        assert!(matches!(err, ReelError::UnsupportedPlatform { .. }));
    }
}
