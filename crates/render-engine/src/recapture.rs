//! Frame recapture: the multi-clip path that needs no codec engine.
//!
//! Each clip is played back through the platform decoder, letterboxed onto
//! the output surface, branded with the clip overlay and pushed to a
//! real-time recorder. A stall watchdog guards every clip: if playback time
//! stops advancing for the configured window (including a decoder that
//! stops producing frames at all) the clip is abandoned with
//! [`ReelError::Stall`].

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use reelkit_capture_engine::{CapturePlatform, ClipDecoder, Recording, SurfaceRecorder};
use reelkit_common::clock::{FramePacer, StallWatchdog, WatchdogStatus};
use reelkit_common::error::{ReelError, ReelResult};
use reelkit_common::progress::StageProgress;
use reelkit_compositor::{AssetCache, ClipOverlay, Compositor, RasterFrame};
use reelkit_scene_model::clip::Clip;
use reelkit_scene_model::job::OutputSpec;

pub struct FrameRecapture {
    platform: Arc<dyn CapturePlatform>,
    cache: Arc<AssetCache>,
    stall_window: Duration,
}

impl FrameRecapture {
    pub fn new(platform: Arc<dyn CapturePlatform>, cache: Arc<AssetCache>, stall_window: Duration) -> Self {
        Self {
            platform,
            cache,
            stall_window,
        }
    }

    /// Whether the platform can play clips back and record the result.
    pub fn is_available(&self) -> bool {
        let caps = self.platform.capabilities();
        caps.live_capture && caps.clip_playback
    }

    /// Replay every clip onto one recording.
    pub async fn recapture(
        &self,
        clips: &[Clip],
        overlay: &ClipOverlay,
        compositor: Arc<Compositor>,
        output: &OutputSpec,
        progress: &StageProgress,
    ) -> ReelResult<Recording> {
        if !self.is_available() {
            return Err(ReelError::unsupported_platform(format!(
                "{} cannot replay clips onto a recorder",
                self.platform.name()
            )));
        }
        if let Err(e) = self.cache.preload(overlay.asset_ids()).await {
            tracing::warn!(error = %e, "Overlay asset unavailable; drawing without it");
        }

        let mut recorder = self
            .platform
            .open_recorder(output.width, output.height, output.fps)
            .await?;
        let mut pacer = FramePacer::new(output.fps);
        let parts = progress.split(clips.len());

        for (index, (clip, part)) in clips.iter().zip(parts).enumerate() {
            let overlay = Arc::new(overlay.with_subtitle(clip.subtitle.clone()));
            let mut decoder = self
                .platform
                .open_decoder(clip, output.width, output.height, output.fps)
                .await?;
            tracing::info!(clip = index, duration_secs = clip.duration_secs, "Recapturing clip");
            let frames = self
                .replay_clip(
                    index,
                    clip,
                    decoder.as_mut(),
                    recorder.as_mut(),
                    &mut pacer,
                    overlay,
                    compositor.clone(),
                    &part,
                )
                .await?;
            tracing::debug!(clip = index, frames, "Clip recaptured");
            part.complete();
        }

        recorder.finish().await
    }

    #[allow(clippy::too_many_arguments)]
    async fn replay_clip(
        &self,
        index: usize,
        clip: &Clip,
        decoder: &mut dyn ClipDecoder,
        recorder: &mut dyn SurfaceRecorder,
        pacer: &mut FramePacer,
        overlay: Arc<ClipOverlay>,
        compositor: Arc<Compositor>,
        progress: &StageProgress,
    ) -> ReelResult<u64> {
        let stall = ReelError::Stall {
            clip_index: index,
            window: self.stall_window,
        };
        let mut watchdog = StallWatchdog::new(self.stall_window);
        let mut frames = 0u64;

        loop {
            let remaining = watchdog.remaining(Instant::now());
            let decoded = match tokio::time::timeout(remaining, decoder.next_frame()).await {
                Ok(decoded) => decoded?,
                Err(_) => {
                    tracing::warn!(clip = index, frames, "Decoder produced nothing within the stall window");
                    return Err(stall);
                }
            };
            let Some(decoded) = decoded else {
                break;
            };
            if decoded.position_secs >= clip.duration_secs {
                break;
            }
            if let WatchdogStatus::Stalled { stalled_for } = watchdog.observe(decoded.position_secs, Instant::now()) {
                tracing::warn!(
                    clip = index,
                    position_secs = decoded.position_secs,
                    stalled_ms = stalled_for.as_millis() as u64,
                    "Playback stopped advancing"
                );
                return Err(stall);
            }

            let frame = compose(decoded.image, overlay.clone(), compositor.clone(), self.cache.clone()).await?;
            pacer.tick().await;
            recorder.push_frame(&frame).await?;
            frames += 1;
            if clip.duration_secs > 0.0 {
                progress.report(decoded.position_secs / clip.duration_secs);
            }
        }
        Ok(frames)
    }
}

async fn compose(
    image: image::RgbaImage,
    overlay: Arc<ClipOverlay>,
    compositor: Arc<Compositor>,
    cache: Arc<AssetCache>,
) -> ReelResult<RasterFrame> {
    tokio::task::spawn_blocking(move || {
        let mut frame = RasterFrame::letterboxed(&image, compositor.width(), compositor.height(), compositor.fill());
        compositor.render_clip_overlay(&mut frame, &overlay, &cache);
        frame
    })
    .await
    .map_err(|e| ReelError::render(format!("overlay task failed: {e}")))
}
