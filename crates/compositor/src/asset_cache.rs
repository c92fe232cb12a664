//! Decoded-image cache keyed by source id.
//!
//! Each key is fetched and decoded at most once per session, even when many
//! renders ask for it concurrently: every key owns a [`OnceCell`] and all
//! callers await the same initialization. A failed load leaves the cell
//! empty, so the next request retries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::RgbaImage;
use tokio::sync::OnceCell;

use reelkit_common::error::{ReelError, ReelResult};

/// Fetches raw encoded bytes for a source id.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, source_id: &str) -> ReelResult<Vec<u8>>;
}

/// Reads assets from the local filesystem.
///
/// Accepts plain paths and `file://` URLs. Relative paths resolve against
/// `base_dir` when one is set.
#[derive(Debug, Clone, Default)]
pub struct FileFetcher {
    base_dir: Option<PathBuf>,
}

impl FileFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn resolve(&self, source_id: &str) -> ReelResult<PathBuf> {
        if source_id.starts_with("http://") || source_id.starts_with("https://") {
            return Err(ReelError::asset_load(
                source_id,
                "remote URLs need a network-capable AssetFetcher",
            ));
        }
        let raw = source_id.strip_prefix("file://").unwrap_or(source_id);
        let path = Path::new(raw);
        Ok(match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        })
    }
}

#[async_trait]
impl AssetFetcher for FileFetcher {
    async fn fetch(&self, source_id: &str) -> ReelResult<Vec<u8>> {
        let path = self.resolve(source_id)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| ReelError::asset_load(source_id, format!("{}: {e}", path.display())))
    }
}

/// A decoded, immutable image.
#[derive(Debug)]
pub struct AssetHandle {
    pub source_id: String,
    pub image: RgbaImage,
}

impl AssetHandle {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

type Slot = Arc<OnceCell<Arc<AssetHandle>>>;

/// Session-scoped asset cache.
pub struct AssetCache {
    fetcher: Arc<dyn AssetFetcher>,
    slots: Mutex<HashMap<String, Slot>>,
    decodes: AtomicUsize,
}

impl std::fmt::Debug for AssetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetCache")
            .field("entries", &self.len())
            .field("decodes", &self.decode_count())
            .finish()
    }
}

impl Default for AssetCache {
    fn default() -> Self {
        Self::new(Arc::new(FileFetcher::new()))
    }
}

impl AssetCache {
    pub fn new(fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self {
            fetcher,
            slots: Mutex::new(HashMap::new()),
            decodes: AtomicUsize::new(0),
        }
    }

    /// Return the decoded image for `source_id`, loading it on first use.
    ///
    /// Concurrent callers for the same key share one fetch and decode.
    pub async fn get_or_load(&self, source_id: &str) -> ReelResult<Arc<AssetHandle>> {
        let slot = self.slot(source_id);
        let handle = slot
            .get_or_try_init(|| self.load(source_id))
            .await?;
        Ok(handle.clone())
    }

    /// Already-loaded image, without triggering a load.
    pub fn get(&self, source_id: &str) -> Option<Arc<AssetHandle>> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(source_id).and_then(|slot| slot.get().cloned())
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.get(source_id).is_some()
    }

    /// Load every id, returning the first failure after all have been tried.
    pub async fn preload<'a, I>(&self, source_ids: I) -> ReelResult<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut first_error = None;
        for id in source_ids {
            if let Err(e) = self.get_or_load(id).await {
                tracing::warn!(source_id = id, error = %e, "Asset preload failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drop every entry. Loads already in flight finish into detached slots.
    pub fn reset(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let dropped = slots.len();
        slots.clear();
        tracing::debug!(dropped, "Asset cache reset");
    }

    /// Number of successfully loaded entries.
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total decodes performed since creation.
    pub fn decode_count(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }

    fn slot(&self, source_id: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(source_id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    async fn load(&self, source_id: &str) -> ReelResult<Arc<AssetHandle>> {
        let bytes = self.fetcher.fetch(source_id).await?;
        let id = source_id.to_string();
        let image = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .map_err(|e| ReelError::asset_load(&id, format!("decode task failed: {e}")))?
            .map_err(|e| ReelError::asset_load(&id, format!("decode failed: {e}")))?
            .into_rgba8();

        self.decodes.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            source_id,
            width = image.width(),
            height = image.height(),
            "Asset decoded"
        );
        Ok(Arc::new(AssetHandle {
            source_id: id,
            image,
        }))
    }
}
