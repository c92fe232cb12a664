pub mod check;
pub mod concat;
pub mod frame;
pub mod init_config;
pub mod render;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reelkit_common::config::AppConfig;
use reelkit_common::progress::{ProgressCallback, ReelProgress};
use reelkit_render_engine::ReelOptions;
use reelkit_scene_model::job::{Artifact, ArtifactFormat};

/// Command-line overrides of the configured output defaults.
#[derive(Debug, Default)]
pub struct OutputOverrides {
    pub format: Option<String>,
    pub fps: Option<u32>,
}

/// Explicit config file if it exists, otherwise the standard location.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) if path.exists() => AppConfig::load_from(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config: {e}")),
        Some(_) => Ok(AppConfig::default()),
        None => Ok(AppConfig::load()),
    }
}

pub fn reel_options(
    config: &AppConfig,
    overrides: &OutputOverrides,
    budget_secs: Option<u64>,
    quiet: bool,
) -> anyhow::Result<ReelOptions> {
    let mut options = ReelOptions::from_config(config)?;
    if let Some(format) = &overrides.format {
        options.output.format = ArtifactFormat::from_name(format)?;
    }
    if let Some(fps) = overrides.fps {
        options.output.fps = fps;
    }
    if let Some(secs) = budget_secs {
        options = options.with_budget(Duration::from_secs(secs));
    }
    if !quiet {
        options = options.with_progress(progress_printer());
    }
    Ok(options)
}

fn progress_printer() -> ProgressCallback {
    Arc::new(|p: ReelProgress| {
        print!("\r  Progress: {:5.1}% ({})            ", p.percent, p.stage);
        let _ = std::io::stdout().flush();
    })
}

/// Write the artifact, fixing up the extension when a fallback delivered a
/// different container than requested.
pub fn write_artifact(artifact: &Artifact, requested: &Path) -> anyhow::Result<PathBuf> {
    let ext = artifact.format.extension();
    let path = match requested.extension().and_then(|e| e.to_str()) {
        Some(current) if current.eq_ignore_ascii_case(ext) => requested.to_path_buf(),
        _ => requested.with_extension(ext),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, &artifact.bytes)?;
    Ok(path)
}

pub fn print_summary(artifact: &Artifact, path: &Path, json: bool) -> anyhow::Result<()> {
    if json {
        let summary = serde_json::json!({
            "path": path,
            "strategy": artifact.strategy.as_str(),
            "mime_type": artifact.mime_type(),
            "bytes": artifact.len(),
            "duration_ms": artifact.duration_ms,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("\nReel written: {}", path.display());
        println!("  Strategy: {}", artifact.strategy.as_str());
        println!("  Format: {}", artifact.mime_type());
        println!("  Size: {} bytes", artifact.len());
        println!("  Duration: {:.2}s", artifact.duration_ms as f64 / 1000.0);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelkit_scene_model::job::Strategy;

    fn artifact(format: ArtifactFormat) -> Artifact {
        Artifact {
            bytes: vec![1, 2, 3],
            format,
            strategy: Strategy::FrameRecapture,
            duration_ms: 1000,
        }
    }

    #[test]
    fn test_extension_follows_delivered_format() {
        let dir = tempfile::tempdir().unwrap();
        let requested = dir.path().join("out/reel.mp4");

        let kept = write_artifact(&artifact(ArtifactFormat::Mp4H264), &requested).unwrap();
        assert_eq!(kept, requested);

        let swapped = write_artifact(&artifact(ArtifactFormat::WebmVp8), &requested).unwrap();
        assert_eq!(swapped, dir.path().join("out/reel.webm"));
        assert_eq!(std::fs::read(swapped).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_overrides_apply_on_top_of_config() {
        let options = reel_options(
            &AppConfig::default(),
            &OutputOverrides {
                format: Some("gif".into()),
                fps: Some(12),
            },
            Some(30),
            true,
        )
        .unwrap();
        assert_eq!(options.output.format, ArtifactFormat::Gif);
        assert_eq!(options.output.fps, 12);
        assert_eq!(options.budget, Some(Duration::from_secs(30)));
        assert!(options.progress.is_none());
    }

    #[test]
    fn test_missing_explicit_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("none.json"))).unwrap();
        assert_eq!(config.output.fps, AppConfig::default().output.fps);
    }
}
