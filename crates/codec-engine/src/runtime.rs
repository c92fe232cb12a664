//! Engine runtime abstraction.
//!
//! A [`CodecRuntime`] is a loaded codec engine: a private staging area of
//! named files plus an `exec` entry point taking ffmpeg-style arguments that
//! refer to those names. [`EngineLoader`] produces runtimes from a location
//! string (binary name, path or mirror).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use reelkit_common::error::ReelResult;
use reelkit_scene_model::clip::ClipProbe;

/// Progress reported by a running exec.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExecProgress {
    /// Output timestamp reached so far, in seconds.
    pub out_time_secs: f64,
    /// The engine reported `progress=end`.
    pub complete: bool,
}

impl ExecProgress {
    /// Fraction of `expected_secs` written, in `[0, 1]`.
    pub fn fraction_of(&self, expected_secs: f64) -> f64 {
        if self.complete {
            return 1.0;
        }
        if expected_secs <= 0.0 {
            return 0.0;
        }
        (self.out_time_secs / expected_secs).clamp(0.0, 1.0)
    }
}

pub type ExecObserver = Arc<dyn Fn(ExecProgress) + Send + Sync>;

/// Stream properties of a staged media file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration_secs: Option<f64>,
}

impl StreamInfo {
    pub fn to_clip_probe(&self) -> ClipProbe {
        ClipProbe {
            width: self.width,
            height: self.height,
            fps: self.fps,
        }
    }
}

/// A loaded codec engine with its own staging area.
///
/// File names are flat (no directories). Errors use
/// [`EngineIo`](reelkit_common::error::ReelError::EngineIo) for staging
/// failures, [`EngineExec`](reelkit_common::error::ReelError::EngineExec)
/// for failed invocations and
/// [`EngineLoad`](reelkit_common::error::ReelError::EngineLoad) when the
/// engine itself is gone.
#[async_trait]
pub trait CodecRuntime: Send + Sync {
    /// Human-readable identity (location and version).
    fn describe(&self) -> String;

    async fn write_file(&self, name: &str, bytes: &[u8]) -> ReelResult<()>;

    async fn read_file(&self, name: &str) -> ReelResult<Vec<u8>>;

    /// Delete a staged file. Deleting a missing file is not an error.
    async fn delete_file(&self, name: &str) -> ReelResult<()>;

    async fn list_files(&self) -> ReelResult<Vec<String>>;

    /// Run the engine. Input and output names refer to staged files.
    async fn exec(&self, args: &[String], observer: Option<ExecObserver>) -> ReelResult<()>;

    /// Inspect the first video stream of a staged file.
    async fn probe(&self, name: &str) -> ReelResult<StreamInfo>;
}

/// Produces a runtime from one location.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn fetch(&self, location: &str) -> ReelResult<Arc<dyn CodecRuntime>>;
}

/// Incremental parser for `-progress pipe:1` key/value output.
#[derive(Debug, Default)]
pub struct ProgressParser {
    state: ExecProgress,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line. Returns a snapshot at the end of each progress block.
    pub fn feed_line(&mut self, line: &str) -> Option<ExecProgress> {
        let (key, value) = line.trim().split_once('=')?;
        match key {
            // Despite the name, ffmpeg reports `out_time_ms` in microseconds.
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<f64>() {
                    if us >= 0.0 {
                        self.state.out_time_secs = us / 1_000_000.0;
                    }
                }
                None
            }
            "progress" => {
                self.state.complete = value == "end";
                Some(self.state)
            }
            _ => None,
        }
    }

    pub fn latest(&self) -> ExecProgress {
        self.state
    }
}

/// Validate a staging file name: flat, non-empty, no traversal.
pub fn check_file_name(name: &str) -> ReelResult<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(reelkit_common::error::ReelError::engine_io(format!(
            "invalid staging file name '{name}'"
        )));
    }
    Ok(())
}

/// Parse an ffprobe frame rate such as `30000/1001` or `25`.
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let rate = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_parser_emits_per_block() {
        let mut parser = ProgressParser::new();
        assert_eq!(parser.feed_line("frame=12"), None);
        assert_eq!(parser.feed_line("out_time_us=1500000"), None);
        let snap = parser.feed_line("progress=continue").unwrap();
        assert!((snap.out_time_secs - 1.5).abs() < 1e-9);
        assert!(!snap.complete);
        parser.feed_line("out_time_ms=3000000");
        let end = parser.feed_line("progress=end").unwrap();
        assert!(end.complete);
        assert!((end.out_time_secs - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_negative_and_garbage_times_are_ignored() {
        let mut parser = ProgressParser::new();
        parser.feed_line("out_time_us=2000000");
        parser.feed_line("out_time_us=-9223372036854775807");
        parser.feed_line("out_time_us=N/A");
        assert!((parser.latest().out_time_secs - 2.0).abs() < 1e-9);
        assert_eq!(parser.feed_line("not a kv line"), None);
    }

    #[test]
    fn test_fraction_of_expected() {
        let p = ExecProgress {
            out_time_secs: 5.0,
            complete: false,
        };
        assert_eq!(p.fraction_of(10.0), 0.5);
        assert_eq!(p.fraction_of(2.0), 1.0);
        assert_eq!(p.fraction_of(0.0), 0.0);
        let done = ExecProgress {
            complete: true,
            ..p
        };
        assert_eq!(done.fraction_of(100.0), 1.0);
    }

    #[test]
    fn test_file_names() {
        assert!(check_file_name("clip_000.mp4").is_ok());
        assert!(check_file_name("../etc/passwd").is_err());
        assert!(check_file_name("").is_err());
        assert!(check_file_name("a\\b").is_err());
    }

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        let ntsc = parse_frame_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }
}
