//! Live capture: real-time recording of the rendered surface.

use std::sync::Arc;
use std::time::Duration;

use reelkit_common::clock::{with_timeout, FramePacer};
use reelkit_common::error::{ReelError, ReelResult};
use reelkit_common::progress::StageProgress;
use reelkit_compositor::FrameScheduler;

use crate::platform::{CapturePlatform, Recording};

/// Plays the scene timeline onto a recorder at the output frame rate.
///
/// Wall-clock time is roughly the reel duration. The whole capture is
/// bounded by that duration plus `slack`; on expiry the recorder is
/// dropped, which discards its partial output.
pub struct LiveCapture {
    platform: Arc<dyn CapturePlatform>,
    slack: Duration,
}

impl LiveCapture {
    pub fn new(platform: Arc<dyn CapturePlatform>, slack: Duration) -> Self {
        Self { platform, slack }
    }

    pub async fn record(
        &self,
        scheduler: &mut FrameScheduler,
        width: u32,
        height: u32,
        progress: &StageProgress,
    ) -> ReelResult<Recording> {
        if !self.platform.capabilities().live_capture {
            return Err(ReelError::unsupported_platform(format!(
                "{} cannot record a surface",
                self.platform.name()
            )));
        }

        // Asset decodes must not eat into the real-time budget.
        scheduler.preload().await;

        let fps = scheduler.fps();
        let nominal = Duration::from_secs_f64(scheduler.total_frames() as f64 / fps as f64);
        let budget = nominal + self.slack;
        let mut recorder = self.platform.open_recorder(width, height, fps).await?;
        tracing::info!(
            platform = self.platform.name(),
            frames = scheduler.total_frames(),
            budget_ms = budget.as_millis() as u64,
            "Live capture started"
        );

        let run = async move {
            let mut pacer = FramePacer::new(fps);
            while let Some(scheduled) = scheduler.next_frame().await? {
                pacer.tick().await;
                recorder.push_frame(&scheduled.frame).await?;
                progress.report(scheduler.progress());
            }
            let stats = recorder.stats();
            if stats.frames_dropped > 0 {
                tracing::warn!(
                    dropped = stats.frames_dropped,
                    drop_rate = stats.drop_rate(),
                    "Recorder dropped frames"
                );
            }
            recorder.finish().await
        };

        let recording = with_timeout("live capture", budget, run).await??;
        tracing::info!(
            bytes = recording.bytes.len(),
            frames = recording.stats.frames_recorded,
            "Live capture finished"
        );
        Ok(recording)
    }
}
