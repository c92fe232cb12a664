//! Pull-based frame scheduler.
//!
//! Maps an output frame index to the scene visible at that instant and
//! renders it. Static scenes are rendered once and the same frame is handed
//! out for every index they cover; animated scenes are re-rendered until
//! their animation settles.

use std::sync::Arc;

use reelkit_common::clock::frames_in_span;
use reelkit_common::error::{ReelError, ReelResult};
use reelkit_scene_model::scene::{LogoAnimation, SceneDescriptor, TimedScene};

use crate::asset_cache::AssetCache;
use crate::compositor::Compositor;
use crate::raster::RasterFrame;

/// Frame range covered by one scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneSpan {
    pub first_frame: u64,
    pub frame_count: u64,
    pub start_ms: u64,
}

/// Frame ranges for each scene at `fps`.
///
/// Boundaries are rounded on the cumulative timeline, so the total always
/// equals `round(total_ms * fps / 1000)`.
pub fn frame_plan(scenes: &[TimedScene], fps: u32) -> Vec<SceneSpan> {
    let mut spans = Vec::with_capacity(scenes.len());
    let mut start_ms = 0u64;
    let mut first_frame = 0u64;
    for scene in scenes {
        let end_ms = start_ms + scene.duration_ms;
        let frame_count = frames_in_span(start_ms, end_ms, fps);
        spans.push(SceneSpan {
            first_frame,
            frame_count,
            start_ms,
        });
        first_frame += frame_count;
        start_ms = end_ms;
    }
    spans
}

/// A frame handed out by the scheduler.
#[derive(Debug, Clone)]
pub struct ScheduledFrame {
    pub index: u64,
    pub scene_index: usize,
    pub frame: Arc<RasterFrame>,
    /// True when `frame` is the same render as the previous index.
    pub reused: bool,
}

struct Current {
    scene_index: usize,
    frame: Arc<RasterFrame>,
    settled: bool,
}

pub struct FrameScheduler {
    compositor: Arc<Compositor>,
    cache: Arc<AssetCache>,
    scenes: Vec<TimedScene>,
    spans: Vec<SceneSpan>,
    fps: u32,
    total_frames: u64,
    next_index: u64,
    current: Option<Current>,
    renders: u64,
}

impl FrameScheduler {
    pub fn new(
        compositor: Arc<Compositor>,
        cache: Arc<AssetCache>,
        scenes: Vec<TimedScene>,
        fps: u32,
    ) -> ReelResult<Self> {
        if fps == 0 {
            return Err(ReelError::invalid_input("fps must be positive"));
        }
        let spans = frame_plan(&scenes, fps);
        let total_frames = spans.iter().map(|s| s.frame_count).sum();
        Ok(Self {
            compositor,
            cache,
            scenes,
            spans,
            fps,
            total_frames,
            next_index: 0,
            current: None,
            renders: 0,
        })
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn spans(&self) -> &[SceneSpan] {
        &self.spans
    }

    /// Renders performed so far.
    pub fn render_count(&self) -> u64 {
        self.renders
    }

    /// Fraction of frames handed out.
    pub fn progress(&self) -> f64 {
        if self.total_frames == 0 {
            1.0
        } else {
            self.next_index as f64 / self.total_frames as f64
        }
    }

    /// Preload every asset the scene list references.
    ///
    /// Failures are logged and tolerated: the affected layer renders as if
    /// the asset were absent.
    pub async fn preload(&self) {
        let ids: Vec<&str> = self.scenes.iter().flat_map(|s| s.scene.asset_ids()).collect();
        if let Err(e) = self.cache.preload(ids).await {
            tracing::warn!(error = %e, "Some scene assets failed to load");
        }
    }

    /// Produce the next frame, or `None` once every frame was handed out.
    pub async fn next_frame(&mut self) -> ReelResult<Option<ScheduledFrame>> {
        if self.next_index >= self.total_frames {
            return Ok(None);
        }
        let index = self.next_index;
        let scene_index = self.scene_at(index);
        let span = self.spans[scene_index];
        let elapsed_ms = (index - span.first_frame) * 1000 / self.fps as u64;

        if let Some(current) = &self.current {
            if current.scene_index == scene_index && current.settled {
                self.next_index += 1;
                return Ok(Some(ScheduledFrame {
                    index,
                    scene_index,
                    frame: current.frame.clone(),
                    reused: true,
                }));
            }
        }

        let scene = self.scenes[scene_index].scene.clone();
        if self.current.as_ref().map(|c| c.scene_index) != Some(scene_index) {
            if let Err(e) = self.cache.preload(scene.asset_ids()).await {
                tracing::warn!(scene = scene_index, error = %e, "Scene asset unavailable");
            }
        }

        let frame = Arc::new(self.render(scene.clone(), elapsed_ms).await?);
        let settled = !scene.is_animated() || elapsed_ms >= LogoAnimation::DURATION_MS;
        self.current = Some(Current {
            scene_index,
            frame: frame.clone(),
            settled,
        });
        self.next_index += 1;
        Ok(Some(ScheduledFrame {
            index,
            scene_index,
            frame,
            reused: false,
        }))
    }

    async fn render(&mut self, scene: Arc<SceneDescriptor>, elapsed_ms: u64) -> ReelResult<RasterFrame> {
        let compositor = self.compositor.clone();
        let cache = self.cache.clone();
        let frame = tokio::task::spawn_blocking(move || compositor.render_at(&scene, &cache, elapsed_ms))
            .await
            .map_err(|e| ReelError::render(format!("render task failed: {e}")))?;
        self.renders += 1;
        Ok(frame)
    }

    fn scene_at(&self, index: u64) -> usize {
        let start = self.current.as_ref().map(|c| c.scene_index).unwrap_or(0);
        (start..self.spans.len())
            .find(|&i| {
                let span = self.spans[i];
                index < span.first_frame + span.frame_count
            })
            .unwrap_or(self.spans.len().saturating_sub(1))
    }
}

/// Load a scene's assets and render it once, fully settled.
pub async fn render_still(
    compositor: &Compositor,
    cache: &AssetCache,
    scene: &SceneDescriptor,
) -> ReelResult<RasterFrame> {
    cache.preload(scene.asset_ids()).await?;
    Ok(compositor.render(scene, cache))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelkit_scene_model::scene::SceneDescriptor;

    fn scenes(durations: &[u64]) -> Vec<TimedScene> {
        durations
            .iter()
            .map(|&d| TimedScene::new(SceneDescriptor::default(), d))
            .collect()
    }

    #[test]
    fn test_plan_for_listing_reel() {
        let spans = frame_plan(&scenes(&[2000, 2000, 2000, 2000, 2000, 2500]), 24);
        let total: u64 = spans.iter().map(|s| s.frame_count).sum();
        assert_eq!(total, 300);
        assert_eq!(spans[0].frame_count, 48);
        assert_eq!(spans[5].frame_count, 60);
        assert_eq!(spans[5].first_frame, 240);
    }

    #[test]
    fn test_plan_rounds_on_cumulative_timeline() {
        let spans = frame_plan(&scenes(&[1010, 1010, 1010]), 30);
        let total: u64 = spans.iter().map(|s| s.frame_count).sum();
        // 3030 ms at 30 fps.
        assert_eq!(total, 91);
    }
}
