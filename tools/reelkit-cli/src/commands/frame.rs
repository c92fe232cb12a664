//! Render one scene to a PNG still.

use std::path::PathBuf;
use std::sync::Arc;

use reelkit_common::config::AppConfig;
use reelkit_compositor::{AssetCache, Compositor, FileFetcher};
use reelkit_render_engine::ReelOptions;

use crate::document::{asset_base_dir, ReelDocument};

pub async fn run(
    config: &AppConfig,
    document: PathBuf,
    index: usize,
    output: PathBuf,
) -> anyhow::Result<()> {
    let scenes = ReelDocument::load(&document)?.into_scenes()?;
    let Some(timed) = scenes.get(index) else {
        anyhow::bail!("Scene index {index} out of range ({} scene(s))", scenes.len());
    };

    let output_spec = ReelOptions::from_config(config)?.output;
    let compositor = Compositor::from_config(&output_spec, &config.render);
    let cache = AssetCache::new(Arc::new(FileFetcher::with_base_dir(asset_base_dir(&document))));
    if let Err(e) = cache.preload(timed.scene.asset_ids()).await {
        println!("  [WARN] {e}; the layer is left out");
    }

    let frame = compositor.render(&timed.scene, &cache);
    std::fs::write(&output, frame.encode_png()?)?;
    println!(
        "Scene {index} ({}x{}) written to {}",
        frame.width(),
        frame.height(),
        output.display()
    );
    Ok(())
}
