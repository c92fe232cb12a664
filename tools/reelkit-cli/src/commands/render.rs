//! Render a scene reel.

use std::path::PathBuf;
use std::sync::Arc;

use reelkit_common::config::AppConfig;
use reelkit_compositor::{AssetCache, FileFetcher};
use reelkit_render_engine::ReelGenerator;
use reelkit_scene_model::scene::total_duration_ms;

use super::{print_summary, reel_options, write_artifact, OutputOverrides};
use crate::document::{asset_base_dir, ReelDocument};

pub async fn run(
    config: &AppConfig,
    document: PathBuf,
    output: PathBuf,
    overrides: OutputOverrides,
    budget_secs: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let scenes = ReelDocument::load(&document)?.into_scenes()?;
    let options = reel_options(config, &overrides, budget_secs, json)?;

    if !json {
        println!("Rendering {} scene(s) from {}", scenes.len(), document.display());
        println!(
            "  Output: {}x{} @ {}fps ({})",
            options.output.width,
            options.output.height,
            options.output.fps,
            options.output.format.mime_type()
        );
        println!("  Duration: {:.2}s", total_duration_ms(&scenes) as f64 / 1000.0);
    }

    let cache = AssetCache::new(Arc::new(FileFetcher::with_base_dir(asset_base_dir(&document))));
    let generator = ReelGenerator::from_config(config).with_asset_cache(Arc::new(cache));
    let artifact = generator
        .generate_reel(scenes, options)
        .await
        .map_err(|e| anyhow::anyhow!("Render failed: {e}"))?;

    let path = write_artifact(&artifact, &output)?;
    print_summary(&artifact, &path, json)
}
