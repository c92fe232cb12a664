//! Input video clips for multi-clip reels.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

/// Where a clip's bytes come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipSource {
    /// A file on disk.
    Path(PathBuf),
    /// Bytes already in memory (e.g. an upload).
    #[serde(skip)]
    Bytes(Arc<[u8]>),
}

/// Stream properties discovered by probing the clip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipProbe {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// One input video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clip {
    pub source: ClipSource,

    /// Playback duration in seconds.
    pub duration_secs: f64,

    /// Caption burned in by frame recapture.
    #[serde(default)]
    pub subtitle: Option<String>,

    /// Container extension hint used when staging (`mp4`, `mov`, `webm`).
    #[serde(default = "default_extension")]
    pub extension: String,

    #[serde(skip)]
    probe: OnceLock<ClipProbe>,
}

impl Clip {
    pub fn from_path(path: impl Into<PathBuf>, duration_secs: f64) -> Self {
        let path = path.into();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(default_extension);
        Self {
            source: ClipSource::Path(path),
            duration_secs,
            subtitle: None,
            extension,
            probe: OnceLock::new(),
        }
    }

    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>, extension: &str, duration_secs: f64) -> Self {
        Self {
            source: ClipSource::Bytes(bytes.into()),
            duration_secs,
            subtitle: None,
            extension: extension.trim_start_matches('.').to_ascii_lowercase(),
            probe: OnceLock::new(),
        }
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    /// Probe result if the clip has already been probed.
    pub fn probed(&self) -> Option<ClipProbe> {
        self.probe.get().copied()
    }

    /// Store a probe result. The first result wins; later calls are ignored.
    pub fn record_probe(&self, probe: ClipProbe) -> ClipProbe {
        *self.probe.get_or_init(|| probe)
    }

    /// Path on disk, if the clip is file-backed.
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            ClipSource::Path(path) => Some(path),
            ClipSource::Bytes(_) => None,
        }
    }

    /// Read the clip's bytes.
    pub async fn read_bytes(&self) -> std::io::Result<Arc<[u8]>> {
        match &self.source {
            ClipSource::Path(path) => Ok(tokio::fs::read(path).await?.into()),
            ClipSource::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Total duration of a clip list in seconds.
pub fn total_clip_duration_secs(clips: &[Clip]) -> f64 {
    clips.iter().map(|c| c.duration_secs.max(0.0)).sum()
}

fn default_extension() -> String {
    "mp4".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_from_path() {
        let clip = Clip::from_path("/videos/Tour.MOV", 12.0);
        assert_eq!(clip.extension, "mov");
        assert_eq!(clip.path(), Some(Path::new("/videos/Tour.MOV")));
    }

    #[test]
    fn test_probe_is_recorded_once() {
        let clip = Clip::from_bytes(vec![0u8; 4], ".webm", 3.0);
        assert!(clip.probed().is_none());
        let first = ClipProbe {
            width: 1280,
            height: 720,
            fps: 30.0,
        };
        clip.record_probe(first);
        clip.record_probe(ClipProbe {
            width: 1,
            height: 1,
            fps: 1.0,
        });
        assert_eq!(clip.probed(), Some(first));
        assert_eq!(clip.extension, "webm");
    }

    #[test]
    fn test_total_duration_ignores_negative() {
        let clips = vec![
            Clip::from_path("a.mp4", 10.0),
            Clip::from_path("b.mp4", -1.0),
            Clip::from_path("c.mp4", 15.0),
        ];
        assert!((total_clip_duration_secs(&clips) - 25.0).abs() < 1e-9);
    }
}
