//! Write the default config file.

use std::path::{Path, PathBuf};

use reelkit_common::config::{config_file_path, AppConfig};

pub fn run(path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_file_path);
    let written = write_default(&path, force)?;
    println!("Default config written to {}", written.display());
    println!("  Edit engine.primary / engine.mirrors to point at your ffmpeg build.");
    Ok(())
}

fn write_default(path: &Path, force: bool) -> anyhow::Result<PathBuf> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists; pass --force to overwrite", path.display());
    }
    AppConfig::default().save_to(path)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.json");

        write_default(&path, false).unwrap();
        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.pipeline.min_artifact_bytes, 16 * 1024);

        assert!(write_default(&path, false).is_err());
        assert!(write_default(&path, true).is_ok());
    }
}
