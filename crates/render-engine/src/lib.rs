//! ReelKit Render Engine
//!
//! Front door for turning scenes or finished clips into a short vertical
//! video. Picks a production strategy, falls back when one fails and keeps
//! progress monotonic across the whole job.
//!
//! # Multi-clip Pipeline
//!
//! ```text
//! clip_0 ──┐
//! clip_1 ──┼── stage + probe ── normalize (letterbox, fps, H.264)
//! clip_n ──┘                            │
//!                                       ▼
//!                              concat demuxer (copy)
//!                                       │
//!              engine failure ──────────┤
//!                     │                 ▼
//!                     ▼             reel.mp4
//!             frame recapture
//!     (playback → letterbox → overlay → recorder)
//! ```

pub mod concat;
pub mod generator;
pub mod recapture;

pub use concat::{concat_list, join_args, normalize_args, normalized_frame_count, ConcatPipeline, ConcatStages};
pub use generator::{ReelGenerator, ReelOptions, MULTI_CLIP_STAGES, SCENE_REEL_STAGES};
pub use recapture::FrameRecapture;
