//! Scripted platform double for tests.
//!
//! [`FakePlatform`] records pushed frames without encoding anything and
//! plays clips back as solid-colour frames whose playback position follows
//! a per-decoder [`PlaybackScript`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{Rgba, RgbaImage};

use reelkit_common::error::{ReelError, ReelResult};
use reelkit_compositor::RasterFrame;
use reelkit_scene_model::clip::Clip;
use reelkit_scene_model::job::ArtifactFormat;

use crate::platform::{
    CapturePlatform, ClipDecoder, DecodedFrame, PlatformCapabilities, RecorderStats, Recording,
    SurfaceRecorder,
};

/// Size of the recording a [`FakePlatform`] produces by default.
pub const DEFAULT_RECORDING_BYTES: usize = 64 * 1024;

/// How one opened decoder behaves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackScript {
    /// Play the whole clip.
    Play,
    /// After `after_frames`, keep returning frames at the same position.
    Freeze { after_frames: u64 },
    /// After `after_frames`, never return another frame.
    Hang { after_frames: u64 },
}

#[derive(Default)]
struct Counters {
    recorders: AtomicUsize,
    decoders: AtomicUsize,
    frames_recorded: AtomicU64,
}

/// In-process [`CapturePlatform`].
pub struct FakePlatform {
    capabilities: PlatformCapabilities,
    recording_bytes: usize,
    recording_format: ArtifactFormat,
    fail_after_frames: Option<u64>,
    scripts: Mutex<VecDeque<PlaybackScript>>,
    counters: Arc<Counters>,
}

impl FakePlatform {
    pub fn new(capabilities: PlatformCapabilities) -> Self {
        Self {
            capabilities,
            recording_bytes: DEFAULT_RECORDING_BYTES,
            recording_format: ArtifactFormat::WebmVp8,
            fail_after_frames: None,
            scripts: Mutex::new(VecDeque::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Both live capture and clip playback.
    pub fn capable() -> Self {
        Self::new(PlatformCapabilities {
            live_capture: true,
            clip_playback: true,
        })
    }

    pub fn incapable() -> Self {
        Self::new(PlatformCapabilities::default())
    }

    pub fn with_recording_bytes(mut self, bytes: usize) -> Self {
        self.recording_bytes = bytes;
        self
    }

    pub fn with_recording_format(mut self, format: ArtifactFormat) -> Self {
        self.recording_format = format;
        self
    }

    /// Make every recorder reject frames once it has accepted `frames`,
    /// the way a recorder whose child process died does.
    pub fn with_recorder_failure_after(mut self, frames: u64) -> Self {
        self.fail_after_frames = Some(frames);
        self
    }

    /// Script the next opened decoder. Unscripted decoders play normally.
    pub fn push_playback(&self, script: PlaybackScript) {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(script);
    }

    pub fn recorders_opened(&self) -> usize {
        self.counters.recorders.load(Ordering::SeqCst)
    }

    pub fn decoders_opened(&self) -> usize {
        self.counters.decoders.load(Ordering::SeqCst)
    }

    /// Frames pushed across every recorder.
    pub fn frames_recorded(&self) -> u64 {
        self.counters.frames_recorded.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapturePlatform for FakePlatform {
    fn name(&self) -> &str {
        "fake"
    }

    fn capabilities(&self) -> PlatformCapabilities {
        self.capabilities
    }

    async fn open_recorder(
        &self,
        width: u32,
        height: u32,
        _fps: u32,
    ) -> ReelResult<Box<dyn SurfaceRecorder>> {
        if !self.capabilities.live_capture {
            return Err(ReelError::unsupported_platform("fake platform cannot record"));
        }
        self.counters.recorders.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeRecorder {
            width,
            height,
            bytes: self.recording_bytes,
            format: self.recording_format,
            fail_after_frames: self.fail_after_frames,
            stats: RecorderStats::default(),
            counters: self.counters.clone(),
        }))
    }

    async fn open_decoder(
        &self,
        clip: &Clip,
        _width: u32,
        _height: u32,
        fps: u32,
    ) -> ReelResult<Box<dyn ClipDecoder>> {
        if !self.capabilities.clip_playback {
            return Err(ReelError::unsupported_platform("fake platform cannot play clips"));
        }
        self.counters.decoders.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(PlaybackScript::Play);
        let fps = fps.max(1);
        Ok(Box::new(FakeDecoder {
            script,
            total_frames: (clip.duration_secs * fps as f64).round() as u64,
            fps,
            index: 0,
        }))
    }
}

struct FakeRecorder {
    width: u32,
    height: u32,
    bytes: usize,
    format: ArtifactFormat,
    fail_after_frames: Option<u64>,
    stats: RecorderStats,
    counters: Arc<Counters>,
}

#[async_trait]
impl SurfaceRecorder for FakeRecorder {
    async fn push_frame(&mut self, frame: &RasterFrame) -> ReelResult<()> {
        if frame.width() != self.width || frame.height() != self.height {
            self.stats.frames_dropped += 1;
            return Ok(());
        }
        if self
            .fail_after_frames
            .is_some_and(|limit| self.stats.frames_recorded >= limit)
        {
            return Err(ReelError::render(
                "recorder stopped accepting frames: Broken pipe",
            ));
        }
        self.stats.frames_recorded += 1;
        self.counters.frames_recorded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> ReelResult<Recording> {
        let mut stats = self.stats.clone();
        stats.bytes_written = self.bytes as u64;
        Ok(Recording {
            bytes: vec![0x1a; self.bytes],
            format: self.format,
            stats,
        })
    }

    fn stats(&self) -> RecorderStats {
        self.stats.clone()
    }
}

struct FakeDecoder {
    script: PlaybackScript,
    total_frames: u64,
    fps: u32,
    index: u64,
}

#[async_trait]
impl ClipDecoder for FakeDecoder {
    async fn next_frame(&mut self) -> ReelResult<Option<DecodedFrame>> {
        let position_index = match self.script {
            PlaybackScript::Play => self.index,
            PlaybackScript::Freeze { after_frames } => self.index.min(after_frames),
            PlaybackScript::Hang { after_frames } => {
                if self.index >= after_frames {
                    std::future::pending::<()>().await;
                }
                self.index
            }
        };
        if self.script == PlaybackScript::Play && self.index >= self.total_frames {
            return Ok(None);
        }
        self.index += 1;
        Ok(Some(DecodedFrame {
            image: RgbaImage::from_pixel(32, 18, Rgba([20, 120, 200, 255])),
            position_secs: position_index as f64 / self.fps as f64,
        }))
    }
}
