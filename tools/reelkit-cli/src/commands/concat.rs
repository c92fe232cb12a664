//! Join clips into one reel.

use std::path::PathBuf;

use reelkit_common::config::AppConfig;
use reelkit_render_engine::ReelGenerator;
use reelkit_scene_model::clip::{total_clip_duration_secs, Clip};
use reelkit_scene_model::scene::LogoSpec;

use super::{print_summary, reel_options, write_artifact, OutputOverrides};

/// Clip arguments as given on the command line.
#[derive(Debug)]
pub struct ClipArgs {
    pub paths: Vec<PathBuf>,
    pub durations: Vec<f64>,
    pub subtitles: Vec<String>,
    pub logo: Option<String>,
}

impl ClipArgs {
    fn into_clips(self) -> anyhow::Result<Vec<Clip>> {
        if self.paths.len() != self.durations.len() {
            anyhow::bail!(
                "{} clip(s) but {} duration(s); pass one --duration per clip",
                self.paths.len(),
                self.durations.len()
            );
        }
        if self.subtitles.len() > self.paths.len() {
            anyhow::bail!("more subtitles than clips");
        }
        let mut subtitles = self.subtitles.into_iter();
        Ok(self
            .paths
            .into_iter()
            .zip(self.durations)
            .map(|(path, secs)| {
                let clip = Clip::from_path(path, secs);
                match subtitles.next() {
                    Some(subtitle) => clip.with_subtitle(subtitle),
                    None => clip,
                }
            })
            .collect())
    }
}

pub async fn run(
    config: &AppConfig,
    args: ClipArgs,
    output: PathBuf,
    overrides: OutputOverrides,
    budget_secs: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let logo = args.logo.clone();
    let clips = args.into_clips()?;
    for clip in &clips {
        if let Some(path) = clip.path() {
            if !path.exists() {
                anyhow::bail!("Clip not found: {}", path.display());
            }
        }
    }

    let mut options = reel_options(config, &overrides, budget_secs, json)?;
    options.overlay.logo = logo.map(LogoSpec::new);

    if !json {
        println!(
            "Joining {} clip(s), {:.2}s total",
            clips.len(),
            total_clip_duration_secs(&clips)
        );
    }

    let generator = ReelGenerator::from_config(config);
    let artifact = generator
        .generate_multi_clip_reel(clips, options)
        .await
        .map_err(|e| anyhow::anyhow!("Concat failed: {e}"))?;

    let path = write_artifact(&artifact, &output)?;
    print_summary(&artifact, &path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durations_must_match_clips() {
        let args = ClipArgs {
            paths: vec!["a.mp4".into(), "b.mp4".into()],
            durations: vec![10.0],
            subtitles: Vec::new(),
            logo: None,
        };
        assert!(args.into_clips().is_err());
    }

    #[test]
    fn test_subtitles_attach_in_order() {
        let args = ClipArgs {
            paths: vec!["a.mp4".into(), "b.mov".into()],
            durations: vec![10.0, 15.0],
            subtitles: vec!["Kitchen".into()],
            logo: None,
        };
        let clips = args.into_clips().unwrap();
        assert_eq!(clips[0].subtitle.as_deref(), Some("Kitchen"));
        assert_eq!(clips[1].subtitle, None);
        assert_eq!(clips[1].extension, "mov");
        assert!((total_clip_duration_secs(&clips) - 25.0).abs() < 1e-9);
    }
}
