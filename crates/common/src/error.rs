//! Error types shared across ReelKit crates.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for ReelKit operations.
#[derive(Debug, thiserror::Error)]
pub enum ReelError {
    /// An image could not be fetched or decoded. Retryable.
    #[error("Asset load error for '{source_id}': {message}")]
    AssetLoad { source_id: String, message: String },

    /// Every engine location failed to load.
    #[error("Engine load error: {message}")]
    EngineLoad { message: String },

    /// A staged engine command failed.
    #[error("Engine exec error: {message}")]
    EngineExec { message: String },

    /// A staged engine file operation failed.
    #[error("Engine I/O error: {message}")]
    EngineIo { message: String },

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// The runtime has no usable live-capture facility.
    #[error("Unsupported platform: {message}")]
    UnsupportedPlatform { message: String },

    /// An encoder produced an artifact too small to be a real video.
    #[error("Empty output: artifact is {bytes} bytes (minimum {min_bytes})")]
    EmptyOutput { bytes: usize, min_bytes: usize },

    /// Playback made no forward progress for the watchdog window.
    #[error("Playback stalled on clip {clip_index} for {window:?}")]
    Stall { clip_index: usize, window: Duration },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using ReelError.
pub type ReelResult<T> = Result<T, ReelError>;

/// A bounded stage exceeded its time budget.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Stage '{stage}' timed out after {after:?}")]
pub struct TimeoutError {
    pub stage: String,
    pub after: Duration,
}

impl ReelError {
    pub fn asset_load(source_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::AssetLoad {
            source_id: source_id.into(),
            message: msg.into(),
        }
    }

    pub fn engine_load(msg: impl Into<String>) -> Self {
        Self::EngineLoad {
            message: msg.into(),
        }
    }

    pub fn engine_exec(msg: impl Into<String>) -> Self {
        Self::EngineExec {
            message: msg.into(),
        }
    }

    pub fn engine_io(msg: impl Into<String>) -> Self {
        Self::EngineIo {
            message: msg.into(),
        }
    }

    pub fn unsupported_platform(msg: impl Into<String>) -> Self {
        Self::UnsupportedPlatform {
            message: msg.into(),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether a documented fallback exists for this failure.
    ///
    /// Recoverable errors are handled inside the pipeline and never reach
    /// the caller unless every strategy has been exhausted.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::AssetLoad { .. }
                | Self::EngineLoad { .. }
                | Self::EngineExec { .. }
                | Self::EngineIo { .. }
                | Self::Timeout(_)
                | Self::UnsupportedPlatform { .. }
                | Self::EmptyOutput { .. }
                | Self::Stall { .. }
        )
    }

    /// Whether the failure came from the codec engine or its staging area.
    pub fn is_engine_failure(&self) -> bool {
        matches!(
            self,
            Self::EngineLoad { .. } | Self::EngineExec { .. } | Self::EngineIo { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_converts_into_reel_error() {
        let err: ReelError = TimeoutError {
            stage: "transcode".to_string(),
            after: Duration::from_secs(3),
        }
        .into();
        assert!(matches!(err, ReelError::Timeout(_)));
        assert!(err.to_string().contains("transcode"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_invalid_input_is_terminal() {
        let err = ReelError::invalid_input("no scenes");
        assert!(!err.is_recoverable());
        assert!(!err.is_engine_failure());
    }

    #[test]
    fn test_engine_failures_are_classified() {
        assert!(ReelError::engine_load("mirrors exhausted").is_engine_failure());
        assert!(ReelError::engine_io("write failed").is_engine_failure());
        assert!(!ReelError::EmptyOutput {
            bytes: 10,
            min_bytes: 100
        }
        .is_engine_failure());
    }
}
