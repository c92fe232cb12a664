//! ReelKit capture engine.
//!
//! Encoding strategies for scene reels:
//! - [`LiveCapture`]: real-time recording of the rendered surface
//! - [`FrameSequenceExport`]: stills staged into the codec engine
//! - [`TranscodeStage`]: container conversion for live recordings
//! - [`SceneReelEncoder`]: strategy selection with fallback
//!
//! Real-time facilities come from a [`CapturePlatform`]; [`SystemPlatform`]
//! provides them through a local ffmpeg.

pub mod frame_sequence;
pub mod live;
pub mod platform;
pub mod strategy;
pub mod system;
pub mod transcode;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use frame_sequence::FrameSequenceExport;
pub use live::LiveCapture;
pub use platform::{
    CapturePlatform, ClipDecoder, DecodedFrame, PlatformCapabilities, RecorderStats, Recording,
    SurfaceRecorder,
};
pub use strategy::{SceneEncoder, SceneReelEncoder, StrategySelector};
pub use system::SystemPlatform;
pub use transcode::TranscodeStage;
