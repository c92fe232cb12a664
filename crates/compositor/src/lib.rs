//! ReelKit compositor.
//!
//! Turns scene descriptors into raster frames. Holds the session-scoped
//! asset cache, the fit geometry shared with clip normalization, the text
//! typesetter and the frame scheduler that feeds the capture strategies.

pub mod asset_cache;
pub mod compositor;
pub mod geometry;
pub mod raster;
pub mod scheduler;
pub mod text;

pub use asset_cache::{AssetCache, AssetFetcher, AssetHandle, FileFetcher};
pub use compositor::{ClipOverlay, Compositor};
pub use raster::RasterFrame;
pub use scheduler::{frame_plan, render_still, FrameScheduler, ScheduledFrame, SceneSpan};
pub use text::Typesetter;
