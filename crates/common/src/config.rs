//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default output settings.
    pub output: OutputDefaults,

    /// Codec engine locations.
    pub engine: EngineConfig,

    /// Pipeline tunables (thresholds and time budgets).
    pub pipeline: PipelineTuning,

    /// Live capture policy.
    pub capture: CaptureConfig,

    /// Compositor settings.
    pub render: RenderConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default output parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputDefaults {
    pub width: u32,
    pub height: u32,
    pub fps: u32,

    /// Output format name (`mp4-h264`, `webm-vp8`, `gif`).
    pub format: String,
}

/// Where to find the codec engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Primary engine location (binary name or path).
    pub primary: String,

    /// Ordered mirror locations tried when the primary fails.
    pub mirrors: Vec<String>,

    /// Budget for a single location probe.
    pub load_timeout_secs: u64,
}

/// Empirically chosen pipeline constants. These are tunables, not
/// invariants; adjust them per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineTuning {
    /// Artifacts smaller than this are treated as empty output.
    pub min_artifact_bytes: usize,

    /// Frame recapture aborts a clip whose playback time does not move
    /// for this long.
    pub stall_window_ms: u64,

    /// Budget for transcoding a live-capture artifact.
    pub transcode_timeout_secs: u64,

    /// Extra wall-clock allowed on top of the reel duration for live capture.
    pub live_capture_slack_secs: u64,

    /// Budget for a single engine exec (normalize, concat, encode).
    pub exec_timeout_secs: u64,
}

/// Live capture policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub live_capture: LiveCaptureMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveCaptureMode {
    /// Use live capture when the platform reports support.
    Auto,
    /// Never use live capture.
    Disabled,
}

/// Compositor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// TrueType/OpenType font used for text layers. Text glyphs are skipped
    /// when unset.
    pub font_path: Option<PathBuf>,

    /// Background colour used when a scene has no background image.
    pub background: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "reelkit=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for OutputDefaults {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            fps: 24,
            format: "mp4-h264".to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            primary: "ffmpeg".to_string(),
            mirrors: vec![
                "/usr/bin/ffmpeg".to_string(),
                "/usr/local/bin/ffmpeg".to_string(),
                "/opt/homebrew/bin/ffmpeg".to_string(),
            ],
            load_timeout_secs: 30,
        }
    }
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            min_artifact_bytes: 16 * 1024,
            stall_window_ms: 5_000,
            transcode_timeout_secs: 120,
            live_capture_slack_secs: 15,
            exec_timeout_secs: 600,
        }
    }
}

impl PipelineTuning {
    pub fn stall_window(&self) -> Duration {
        Duration::from_millis(self.stall_window_ms)
    }

    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.transcode_timeout_secs)
    }

    pub fn live_capture_slack(&self) -> Duration {
        Duration::from_secs(self.live_capture_slack_secs)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            live_capture: LiveCaptureMode::Auto,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            background: "#111111".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Load config from an explicit file. Unlike [`AppConfig::load`], errors
    /// are reported to the caller.
    pub fn load_from(path: &std::path::Path) -> crate::ReelResult<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            crate::ReelError::config(format!("Invalid config {}: {e}", path.display()))
        })
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<PathBuf, std::io::Error> {
        let config_path = config_file_path();
        self.save_to(&config_path)?;
        Ok(config_path)
    }

    /// Save config to `path`, creating parent directories.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

impl EngineConfig {
    /// Primary location followed by mirrors, duplicates removed.
    pub fn locations(&self) -> Vec<String> {
        let mut locations = Vec::with_capacity(self.mirrors.len() + 1);
        for location in std::iter::once(&self.primary).chain(&self.mirrors) {
            let trimmed = location.trim();
            if !trimmed.is_empty() && !locations.iter().any(|l| l == trimmed) {
                locations.push(trimmed.to_string());
            }
        }
        locations
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("reelkit").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_target_vertical_reels() {
        let config = AppConfig::default();
        assert_eq!((config.output.width, config.output.height), (1080, 1920));
        assert_eq!(config.output.fps, 24);
        assert_eq!(config.capture.live_capture, LiveCaptureMode::Auto);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"pipeline": {"min_artifact_bytes": 1}}"#).unwrap();
        assert_eq!(config.pipeline.min_artifact_bytes, 1);
        assert_eq!(config.pipeline.stall_window_ms, 5_000);
        assert_eq!(config.engine.primary, "ffmpeg");
    }

    #[test]
    fn test_engine_locations_dedup_and_order() {
        let mut config = AppConfig::default();
        config.engine.primary = "/usr/bin/ffmpeg".to_string();
        config.engine.mirrors = vec![
            "/usr/bin/ffmpeg".to_string(),
            " ".to_string(),
            "/opt/ffmpeg".to_string(),
        ];
        assert_eq!(
            config.engine.locations(),
            vec!["/usr/bin/ffmpeg".to_string(), "/opt/ffmpeg".to_string()]
        );
    }

    #[test]
    fn test_live_capture_mode_serializes_lowercase() {
        let json = serde_json::to_string(&LiveCaptureMode::Disabled).unwrap();
        assert_eq!(json, "\"disabled\"");
    }
}
