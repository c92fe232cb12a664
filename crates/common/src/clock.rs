//! Clock and timing utilities.
//!
//! - Racing a stage against a timer ([`with_timeout`])
//! - Detecting playback that stopped advancing ([`StallWatchdog`])
//! - Pacing real-time frame loops ([`FramePacer`])
//! - Frame/duration arithmetic shared by every encoder

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::error::TimeoutError;

/// Race `fut` against a timer. On expiry the future is dropped and a
/// [`TimeoutError`] naming the stage is returned.
pub async fn with_timeout<F, T>(stage: &str, duration: Duration, fut: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(value) => Ok(value),
        Err(_) => {
            tracing::warn!(stage, after_ms = duration.as_millis() as u64, "Stage timed out");
            Err(TimeoutError {
                stage: stage.to_string(),
                after: duration,
            })
        }
    }
}

/// Wall-clock anchor for a job, used for log fields and elapsed reporting.
#[derive(Debug, Clone)]
pub struct JobClock {
    epoch: Instant,
    epoch_wall: String,
}

impl JobClock {
    /// Create a new clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Seconds elapsed since the job started.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at job start (RFC 3339).
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }
}

/// Outcome of feeding a playback position to a [`StallWatchdog`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WatchdogStatus {
    /// The position moved forward.
    Advancing,
    /// No movement yet, but still inside the window.
    Waiting { stalled_for: Duration },
    /// No movement for at least the full window.
    Stalled { stalled_for: Duration },
}

/// Detects a playback-driven loop that stopped making forward progress.
#[derive(Debug, Clone)]
pub struct StallWatchdog {
    window: Duration,
    last_position_secs: Option<f64>,
    last_advance: Instant,
}

impl StallWatchdog {
    pub fn new(window: Duration) -> Self {
        Self::starting_at(window, Instant::now())
    }

    pub fn starting_at(window: Duration, now: Instant) -> Self {
        Self {
            window,
            last_position_secs: None,
            last_advance: now,
        }
    }

    /// Record the current playback position.
    pub fn observe(&mut self, position_secs: f64, now: Instant) -> WatchdogStatus {
        let advanced = match self.last_position_secs {
            None => true,
            Some(last) => position_secs > last + 1e-6,
        };
        if advanced {
            self.last_position_secs = Some(position_secs);
            self.last_advance = now;
            return WatchdogStatus::Advancing;
        }
        self.check(now)
    }

    /// Evaluate the watchdog without a new position (e.g. nothing arrived).
    pub fn check(&self, now: Instant) -> WatchdogStatus {
        let stalled_for = now.saturating_duration_since(self.last_advance);
        if stalled_for >= self.window {
            WatchdogStatus::Stalled { stalled_for }
        } else {
            WatchdogStatus::Waiting { stalled_for }
        }
    }

    /// Time left before the watchdog trips.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.window
            .saturating_sub(now.saturating_duration_since(self.last_advance))
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Ticks once per frame interval for real-time loops.
///
/// Missed ticks are delivered in a burst so the number of frames produced
/// tracks wall-clock time.
#[derive(Debug)]
pub struct FramePacer {
    interval: Interval,
    frame_interval: Duration,
}

impl FramePacer {
    pub fn new(fps: u32) -> Self {
        let frame_interval = frame_interval(fps);
        let mut interval = tokio::time::interval(frame_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
        Self {
            interval,
            frame_interval,
        }
    }

    /// Wait for the next frame boundary.
    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }
}

/// Duration of one frame at `fps` (minimum 1 fps).
pub fn frame_interval(fps: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / fps.max(1) as u64)
}

/// Frame boundary index for a millisecond offset, rounded to nearest.
pub fn frame_at_ms(offset_ms: u64, fps: u32) -> u64 {
    (offset_ms * fps.max(1) as u64 + 500) / 1000
}

/// Number of frames covering `[start_ms, end_ms)` using cumulative
/// rounding, so consecutive spans never accumulate drift.
pub fn frames_in_span(start_ms: u64, end_ms: u64, fps: u32) -> u64 {
    frame_at_ms(end_ms, fps).saturating_sub(frame_at_ms(start_ms, fps))
}
