//! Input documents accepted by `render` and `frame`.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use reelkit_scene_model::listing::{build_listing_scenes, ListingReelRequest};
use reelkit_scene_model::scene::TimedScene;

/// Either a raw scene list or a property listing to build scenes from.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ReelDocument {
    Scenes(Vec<TimedScene>),
    Listing(Box<ListingReelRequest>),
}

impl ReelDocument {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
        Self::parse(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {e}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn into_scenes(self) -> anyhow::Result<Vec<TimedScene>> {
        match self {
            ReelDocument::Scenes(scenes) => Ok(scenes),
            ReelDocument::Listing(request) => Ok(build_listing_scenes(&request)?),
        }
    }
}

/// Directory that relative asset paths in `document` resolve against.
pub fn asset_base_dir(document: &Path) -> PathBuf {
    document
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_scene_list() {
        let doc = ReelDocument::parse(
            r#"[{"scene": {"background": "a.jpg"}, "duration_ms": 2000},
                {"scene": {}, "duration_ms": 500}]"#,
        )
        .unwrap();
        let scenes = doc.into_scenes().unwrap();
        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[0].scene.background.as_deref(), Some("a.jpg"));
        assert_eq!(scenes[1].duration_ms, 500);
    }

    #[test]
    fn test_parses_listing() {
        let doc = ReelDocument::parse(
            r#"{"property": {"title": "Loft", "photos": ["1.jpg", "2.jpg"]},
                "ally": {"brand_name": "Northside Realty"}}"#,
        )
        .unwrap();
        assert!(matches!(doc, ReelDocument::Listing(_)));
        // One scene per photo plus the summary.
        assert_eq!(doc.into_scenes().unwrap().len(), 3);
    }

    #[test]
    fn test_rejects_unrecognised_document() {
        assert!(ReelDocument::parse(r#"{"clips": []}"#).is_err());
    }

    #[test]
    fn test_base_dir_defaults_to_cwd() {
        assert_eq!(asset_base_dir(Path::new("scenes.json")), PathBuf::from("."));
        assert_eq!(asset_base_dir(Path::new("jobs/a/scenes.json")), PathBuf::from("jobs/a"));
    }
}
