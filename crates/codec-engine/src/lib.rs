//! ReelKit codec engine.
//!
//! A single lazily loaded engine per process, shared by every encoding job:
//! - [`EngineSession`]: coalesced loading with mirror fallback
//! - [`EngineLease`]: serialized, self-cleaning access to the staging area
//! - [`CodecRuntime`] / [`EngineLoader`]: the seam between the session and
//!   a concrete engine (ffmpeg in production, in-memory in tests)

pub mod args;
pub mod ffmpeg;
pub mod runtime;
pub mod session;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use args::{codec_args, frame_file_name, frame_sequence_args, transcode_args, FRAME_PATTERN};
pub use ffmpeg::{command_exists, FfmpegLoader, FfmpegRuntime};
pub use runtime::{CodecRuntime, EngineLoader, ExecObserver, ExecProgress, ProgressParser, StreamInfo};
pub use session::{EngineLease, EngineSession, EngineState};
