//! Text measurement and rasterization with fontdue.

use std::path::Path;
use std::sync::Arc;

use fontdue::{Font, FontSettings};

use reelkit_common::error::{ReelError, ReelResult};
use reelkit_scene_model::color::Color;

use crate::raster::RasterFrame;

/// Width used per character when no font is loaded.
const FALLBACK_ADVANCE: f32 = 0.55;

/// Horizontal extent and vertical metrics of a run of text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextMetrics {
    pub width: f32,
    pub ascent: f32,
    pub descent: f32,
}

impl TextMetrics {
    pub fn height(&self) -> f32 {
        self.ascent + self.descent
    }
}

/// Lays out single-line text.
///
/// Without a font the typesetter still measures (using a fixed advance) so
/// pills and chips keep their geometry, but no glyphs are drawn.
#[derive(Clone, Default)]
pub struct Typesetter {
    font: Option<Arc<Font>>,
}

impl std::fmt::Debug for Typesetter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Typesetter")
            .field("has_font", &self.font.is_some())
            .finish()
    }
}

impl Typesetter {
    /// Typesetter that measures but never draws glyphs.
    pub fn without_font() -> Self {
        Self { font: None }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> ReelResult<Self> {
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|e| ReelError::render(format!("font parse failed: {e}")))?;
        Ok(Self {
            font: Some(Arc::new(font)),
        })
    }

    pub fn load(path: &Path) -> ReelResult<Self> {
        if !path.exists() {
            return Err(ReelError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let bytes = std::fs::read(path)?;
        let typesetter = Self::from_bytes(bytes)?;
        tracing::debug!(path = %path.display(), "Font loaded");
        Ok(typesetter)
    }

    /// Load `path` if given, falling back to the glyph-less typesetter.
    pub fn load_or_fallback(path: Option<&Path>) -> Self {
        match path.map(Self::load) {
            Some(Ok(t)) => t,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Could not load font, text glyphs disabled");
                Self::without_font()
            }
            None => Self::without_font(),
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn measure(&self, text: &str, px: f32) -> TextMetrics {
        match &self.font {
            Some(font) => {
                let width = text.chars().map(|c| font.metrics(c, px).advance_width).sum();
                let (ascent, descent) = font
                    .horizontal_line_metrics(px)
                    .map(|m| (m.ascent, -m.descent))
                    .unwrap_or((px * 0.8, px * 0.2));
                TextMetrics {
                    width,
                    ascent,
                    descent,
                }
            }
            None => TextMetrics {
                width: text.chars().count() as f32 * px * FALLBACK_ADVANCE,
                ascent: px * 0.8,
                descent: px * 0.2,
            },
        }
    }

    /// Largest size not above `px` at which `text` fits in `max_width`.
    ///
    /// Never shrinks below half of `px`.
    pub fn fit_size(&self, text: &str, px: f32, max_width: f32) -> f32 {
        let width = self.measure(text, px).width;
        if width <= max_width || width <= 0.0 {
            return px;
        }
        (px * max_width / width).max(px * 0.5)
    }

    /// Draw `text` with the top of its line box at `top`.
    pub fn draw(&self, frame: &mut RasterFrame, text: &str, px: f32, x: f32, top: f32, color: Color) {
        let Some(font) = &self.font else {
            return;
        };
        let ascent = self.measure(text, px).ascent;
        let baseline = top + ascent;
        let mut pen = x;
        for ch in text.chars() {
            let (metrics, bitmap) = font.rasterize(ch, px);
            if metrics.width > 0 && metrics.height > 0 {
                let gx = (pen + metrics.xmin as f32).round() as i64;
                let gy = (baseline - metrics.height as f32 - metrics.ymin as f32).round() as i64;
                frame.draw_coverage(&bitmap, metrics.width, gx, gy, color);
            }
            pen += metrics.advance_width;
        }
    }
}
