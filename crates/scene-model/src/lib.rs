//! ReelKit Scene Model
//!
//! Defines the core data contracts for reel generation:
//! - **Scenes:** Immutable visual recipes for one rendered frame
//! - **Clips:** Input videos for multi-clip reels
//! - **Jobs:** Encoding requests, their lifecycle, and resulting artifacts
//! - **Listings:** Builder turning listing content into timed scenes
//!
//! Pixel geometry is expressed relative to the output frame so the same
//! descriptor renders correctly at any target resolution.

pub mod clip;
pub mod color;
pub mod job;
pub mod listing;
pub mod scene;

pub use clip::*;
pub use color::*;
pub use job::*;
pub use listing::*;
pub use scene::*;
