//! Scene compositor.
//!
//! Paints a [`SceneDescriptor`] into a [`RasterFrame`] in fixed layer order:
//! background, gradient, logo, text stack, chips, footer. Every layer is
//! anchored to the frame independently, so toggling one layer never moves
//! another. Rendering reads the asset cache but never loads from it; an
//! asset that is not cached yet is treated as absent.

use std::sync::Arc;

use image::imageops::{self, FilterType};

use reelkit_common::config::RenderConfig;
use reelkit_scene_model::color::Color;
use reelkit_scene_model::job::OutputSpec;
use reelkit_scene_model::scene::{
    BrandPalette, FooterMark, GradientDirection, IconChip, LogoAnimation, LogoBackground,
    LogoPosition, LogoShape, LogoSpec, SceneDescriptor, TextStack,
};

use crate::asset_cache::{AssetCache, AssetHandle};
use crate::geometry::{letterbox, Rect};
use crate::raster::{Paint, RasterFrame, Shape};
use crate::text::Typesetter;

/// Reference width the layout constants are tuned for.
const REFERENCE_WIDTH: f32 = 1080.0;

// Vertical anchors as fractions of frame height (top of each element).
const BADGE_TOP: f32 = 0.05;
const SUBTITLE_TOP: f32 = 0.60;
const TITLE_TOP: f32 = 0.66;
const LOCATION_TOP: f32 = 0.73;
const PRICE_TOP: f32 = 0.78;
const CHIPS_TOP: f32 = 0.86;
const CLIP_SUBTITLE_TOP: f32 = 0.80;

const SIDE_MARGIN: f32 = 0.074;
const LOGO_MARGIN_X: f32 = 0.055;
const LOGO_MARGIN_Y: f32 = 0.04;
const FOOTER_MARGIN_BOTTOM: f32 = 0.035;

// Gradient extents; the top ramp fades out at 60%, the bottom one starts at 40%.
const TOP_RAMP_END: f32 = 0.60;
const BOTTOM_RAMP_START: f32 = 0.40;

/// Branding drawn over decoded clip frames during frame recapture.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipOverlay {
    pub subtitle: Option<String>,
    pub logo: Option<LogoSpec>,
    pub footer: Option<FooterMark>,
    pub brand: BrandPalette,
    pub typography_scale: f32,
}

impl Default for ClipOverlay {
    fn default() -> Self {
        Self {
            subtitle: None,
            logo: None,
            footer: None,
            brand: BrandPalette::default(),
            typography_scale: 1.0,
        }
    }
}

impl ClipOverlay {
    pub fn with_subtitle(&self, subtitle: Option<String>) -> Self {
        Self {
            subtitle,
            ..self.clone()
        }
    }

    /// Asset ids the overlay needs cached before drawing.
    pub fn asset_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        if let Some(logo) = &self.logo {
            ids.push(logo.asset.as_str());
        }
        if let Some(asset) = self.footer.as_ref().and_then(|f| f.asset.as_deref()) {
            ids.push(asset);
        }
        ids
    }
}

/// Renders scenes at a fixed output size.
#[derive(Debug, Clone)]
pub struct Compositor {
    width: u32,
    height: u32,
    typesetter: Typesetter,
    fill: Color,
}

impl Compositor {
    pub fn new(width: u32, height: u32, typesetter: Typesetter) -> Self {
        Self {
            width,
            height,
            typesetter,
            fill: Color::BLACK,
        }
    }

    /// Compositor for `output`, with font and fill colour from config.
    pub fn from_config(output: &OutputSpec, render: &RenderConfig) -> Self {
        let typesetter = Typesetter::load_or_fallback(render.font_path.as_deref());
        let fill = render.background.parse().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid render.background, using black");
            Color::BLACK
        });
        Self {
            width: output.width,
            height: output.height,
            typesetter,
            fill,
        }
    }

    pub fn with_fill(mut self, fill: Color) -> Self {
        self.fill = fill;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Fill used around letterboxed clip frames.
    pub fn fill(&self) -> Color {
        self.fill
    }

    pub fn typesetter(&self) -> &Typesetter {
        &self.typesetter
    }

    /// Render the scene with every animation settled.
    pub fn render(&self, scene: &SceneDescriptor, cache: &AssetCache) -> RasterFrame {
        self.render_at(scene, cache, LogoAnimation::DURATION_MS)
    }

    /// Render the scene `elapsed_ms` after it appeared.
    pub fn render_at(&self, scene: &SceneDescriptor, cache: &AssetCache, elapsed_ms: u64) -> RasterFrame {
        let layout = Layout::new(self.width, self.height, scene.effective_typography_scale());
        let mut frame = RasterFrame::filled(self.width, self.height, scene.background_color);

        if let Some(bg) = scene.background.as_deref().and_then(|id| cache.get(id)) {
            frame.draw_cover(&bg.image);
        }

        let layers = scene.layers;
        if layers.gradient {
            self.draw_gradient(&mut frame, scene, &layout);
        }
        if layers.logo {
            if let Some(logo) = &scene.logo {
                let handle = cache.get(&logo.asset);
                self.draw_logo(&mut frame, &layout, logo, &scene.brand, handle, elapsed_ms);
            }
        }
        self.draw_text_stack(&mut frame, &layout, &scene.text, &scene.brand, layers.text, layers.price);
        if layers.chips && !scene.chips.is_empty() {
            self.draw_chips(&mut frame, &layout, &scene.chips);
        }
        if layers.footer {
            if let Some(footer) = &scene.footer {
                self.draw_footer(&mut frame, &layout, footer, &scene.brand, cache);
            }
        }
        frame
    }

    /// Draw clip branding (subtitle, logo, footer) over an existing frame.
    pub fn render_clip_overlay(&self, frame: &mut RasterFrame, overlay: &ClipOverlay, cache: &AssetCache) {
        let scale = if overlay.typography_scale.is_finite() {
            overlay.typography_scale.clamp(0.25, 4.0)
        } else {
            1.0
        };
        let layout = Layout::new(frame.width(), frame.height(), scale);

        if let Some(logo) = &overlay.logo {
            let handle = cache.get(&logo.asset);
            self.draw_logo(frame, &layout, logo, &overlay.brand, handle, LogoAnimation::DURATION_MS);
        }
        if let Some(subtitle) = overlay.subtitle.as_deref().filter(|s| !s.is_empty()) {
            let px = 40.0 * layout.text_unit;
            self.draw_pill(
                frame,
                &layout,
                subtitle,
                px,
                Anchor::Center,
                layout.h * CLIP_SUBTITLE_TOP,
                Paint::Solid(Color::rgba(0, 0, 0, 140)),
                Color::WHITE,
            );
        }
        if let Some(footer) = &overlay.footer {
            self.draw_footer(frame, &layout, footer, &overlay.brand, cache);
        }
    }

    fn draw_gradient(&self, frame: &mut RasterFrame, scene: &SceneDescriptor, layout: &Layout) {
        let peak = scene.gradient.peak_alpha();
        if peak <= 0.0 {
            return;
        }
        let h = layout.h;
        match scene.gradient.direction {
            GradientDirection::None => {}
            GradientDirection::Top => frame.vertical_ramp(0.0, h * TOP_RAMP_END, Color::BLACK, peak, 0.0),
            GradientDirection::Bottom => {
                frame.vertical_ramp(h * BOTTOM_RAMP_START, h, Color::BLACK, 0.0, peak)
            }
            // The ramps overlap between 40% and 60% of the height.
            GradientDirection::Both => {
                frame.vertical_ramp(0.0, h * TOP_RAMP_END, Color::BLACK, peak, 0.0);
                frame.vertical_ramp(h * BOTTOM_RAMP_START, h, Color::BLACK, 0.0, peak);
            }
        }
    }

    fn draw_logo(
        &self,
        frame: &mut RasterFrame,
        layout: &Layout,
        spec: &LogoSpec,
        brand: &BrandPalette,
        handle: Option<Arc<AssetHandle>>,
        elapsed_ms: u64,
    ) {
        let progress = animation_progress(elapsed_ms);
        let mut opacity = spec.opacity_factor();
        let mut rect = layout.logo_rect(spec);
        match spec.animation {
            LogoAnimation::None => {}
            LogoAnimation::Fade => opacity *= progress,
            LogoAnimation::Zoom => {
                rect = rect.scaled_about_center(0.6 + 0.4 * progress);
                opacity *= progress.min(1.0).max(0.2);
            }
        }
        if opacity <= 0.0 || rect.w < 1.0 {
            return;
        }

        let shape = match spec.shape {
            LogoShape::Square => Shape::Square,
            LogoShape::Rounded => Shape::Rounded { radius: rect.w * 0.18 },
            LogoShape::Circle => Shape::Circle,
        };
        let alpha = |c: Color, f: f32| c.with_alpha_factor(f * opacity);

        match spec.background {
            LogoBackground::None => {}
            LogoBackground::Flat => {
                frame.fill_shape(rect, shape, Paint::Solid(alpha(Color::WHITE, 0.92)));
            }
            LogoBackground::Frosted => {
                frame.fill_shape(rect, shape, Paint::Solid(alpha(Color::WHITE, 0.28)));
                frame.stroke_shape(rect, shape, 2.0 * layout.unit, alpha(Color::WHITE, 0.6));
            }
            LogoBackground::Glow => {
                for ring in (1..=5).rev() {
                    let spread = rect.w * 0.04 * ring as f32;
                    let strength = 0.12 * (6 - ring) as f32 / 5.0;
                    frame.fill_shape(rect.inflate(spread), grow(shape, spread), Paint::Solid(alpha(brand.primary, strength)));
                }
                frame.fill_shape(rect, shape, Paint::Solid(alpha(brand.primary, 0.9)));
            }
            LogoBackground::Elevated => {
                let shadow = rect.offset(0.0, rect.w * 0.06).inflate(rect.w * 0.02);
                frame.fill_shape(shadow, grow(shape, rect.w * 0.02), Paint::Solid(alpha(Color::BLACK, 0.35)));
                frame.fill_shape(rect, shape, Paint::Solid(alpha(Color::WHITE, 1.0)));
            }
            LogoBackground::Gradient => {
                frame.fill_shape(
                    rect,
                    shape,
                    Paint::Vertical {
                        top: alpha(brand.primary, 1.0),
                        bottom: alpha(brand.secondary, 1.0),
                    },
                );
            }
        }

        let Some(handle) = handle else {
            return;
        };
        let inner = if spec.background == LogoBackground::None {
            rect
        } else {
            rect.inflate(-rect.w * 0.12)
        };
        draw_fitted(frame, &handle, inner, opacity, Some((rect, shape)));
    }

    fn draw_text_stack(
        &self,
        frame: &mut RasterFrame,
        layout: &Layout,
        text: &TextStack,
        brand: &BrandPalette,
        show_text: bool,
        show_price: bool,
    ) {
        let tu = layout.text_unit;
        let ts = &self.typesetter;

        if show_text {
            if let Some(badge) = non_empty(&text.badge) {
                let label = badge.to_uppercase();
                self.draw_pill(
                    frame,
                    layout,
                    &label,
                    30.0 * tu,
                    Anchor::Right,
                    layout.h * BADGE_TOP,
                    Paint::Solid(brand.secondary.with_alpha_factor(0.92)),
                    Color::WHITE,
                );
            }
            if let Some(subtitle) = non_empty(&text.subtitle) {
                let px = ts.fit_size(subtitle, 40.0 * tu, layout.content_width());
                let m = ts.measure(subtitle, px);
                let x = (layout.w - m.width) / 2.0;
                ts.draw(frame, subtitle, px, x, layout.h * SUBTITLE_TOP, brand.text.with_alpha_factor(0.9));
            }
            if let Some(title) = non_empty(&text.title) {
                let px = ts.fit_size(title, 72.0 * tu, layout.content_width());
                ts.draw(frame, title, px, layout.margin(), layout.h * TITLE_TOP, brand.text);
            }
            if let Some(location) = non_empty(&text.location) {
                let px = ts.fit_size(location, 40.0 * tu, layout.content_width());
                ts.draw(
                    frame,
                    location,
                    px,
                    layout.margin(),
                    layout.h * LOCATION_TOP,
                    brand.text.with_alpha_factor(0.85),
                );
            }
        }

        if show_price {
            if let Some(price) = non_empty(&text.price) {
                self.draw_pill(
                    frame,
                    layout,
                    price,
                    44.0 * tu,
                    Anchor::Left,
                    layout.h * PRICE_TOP,
                    Paint::Solid(brand.primary),
                    Color::WHITE,
                );
            }
        }
    }

    fn draw_chips(&self, frame: &mut RasterFrame, layout: &Layout, chips: &[IconChip]) {
        let ts = &self.typesetter;
        let labels: Vec<String> = chips.iter().map(IconChip::label).collect();
        let gap = 16.0 * layout.unit;

        let row_width = |px: f32| -> f32 {
            let pad = px * 0.7;
            let widths: f32 = labels.iter().map(|l| ts.measure(l, px).width + 2.0 * pad).sum();
            widths + gap * (labels.len().saturating_sub(1)) as f32
        };

        let mut px = 30.0 * layout.text_unit;
        let total = row_width(px);
        if total > layout.content_width() && total > 0.0 {
            px = (px * layout.content_width() / total).max(px * 0.5);
        }

        let pad = px * 0.7;
        let chip_h = px * 1.7;
        let top = layout.h * CHIPS_TOP;
        let mut x = (layout.w - row_width(px)) / 2.0;
        for label in &labels {
            let m = ts.measure(label, px);
            let rect = Rect::new(x, top, m.width + 2.0 * pad, chip_h);
            let shape = Shape::Rounded { radius: chip_h / 2.0 };
            frame.fill_shape(rect, shape, Paint::Solid(Color::rgba(255, 255, 255, 40)));
            frame.stroke_shape(rect, shape, 2.0 * layout.unit, Color::rgba(255, 255, 255, 100));
            ts.draw(frame, label, px, x + pad, top + (chip_h - m.height()) / 2.0, Color::WHITE);
            x += rect.w + gap;
        }
    }

    fn draw_footer(
        &self,
        frame: &mut RasterFrame,
        layout: &Layout,
        footer: &FooterMark,
        brand: &BrandPalette,
        cache: &AssetCache,
    ) {
        let right = layout.w - layout.w * LOGO_MARGIN_X;
        let bottom = layout.h - layout.h * FOOTER_MARGIN_BOTTOM;

        if let Some(handle) = footer.asset.as_deref().and_then(|id| cache.get(id)) {
            let box_h = layout.h * 0.045;
            let box_w = layout.w * 0.30;
            let area = Rect::new(right - box_w, bottom - box_h, box_w, box_h);
            let fit = letterbox(handle.width(), handle.height(), area.w as u32, area.h as u32);
            // Right-align inside the footer box.
            let shifted = area.offset(fit.pad_x as f32, 0.0);
            draw_fitted(frame, &handle, shifted, 1.0, None);
            return;
        }

        if let Some(text) = non_empty(&footer.text) {
            let ts = &self.typesetter;
            let px = 26.0 * layout.text_unit;
            let m = ts.measure(text, px);
            ts.draw(frame, text, px, right - m.width, bottom - m.height(), brand.text.with_alpha_factor(0.8));
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_pill(
        &self,
        frame: &mut RasterFrame,
        layout: &Layout,
        label: &str,
        px: f32,
        anchor: Anchor,
        top: f32,
        fill: Paint,
        text_color: Color,
    ) {
        let ts = &self.typesetter;
        let pad = px * 0.6;
        let px = ts.fit_size(label, px, layout.content_width() - 2.0 * pad);
        let m = ts.measure(label, px);
        let height = px * 1.45;
        let width = m.width + 2.0 * pad;
        let x = match anchor {
            Anchor::Left => layout.margin(),
            Anchor::Center => (layout.w - width) / 2.0,
            Anchor::Right => layout.w - layout.margin() - width,
        };
        let rect = Rect::new(x, top, width, height);
        frame.fill_shape(rect, Shape::Rounded { radius: height / 2.0 }, fill);
        ts.draw(frame, label, px, x + pad, top + (height - m.height()) / 2.0, text_color);
    }
}

#[derive(Debug, Clone, Copy)]
enum Anchor {
    Left,
    Center,
    Right,
}

/// Resolution-independent layout units for one frame.
struct Layout {
    w: f32,
    h: f32,
    /// Pixels per reference pixel.
    unit: f32,
    /// `unit` times the typography scale.
    text_unit: f32,
}

impl Layout {
    fn new(width: u32, height: u32, typography_scale: f32) -> Self {
        let w = width as f32;
        let unit = w / REFERENCE_WIDTH;
        Self {
            w,
            h: height as f32,
            unit,
            text_unit: unit * typography_scale,
        }
    }

    fn margin(&self) -> f32 {
        self.w * SIDE_MARGIN
    }

    fn content_width(&self) -> f32 {
        self.w - 2.0 * self.margin()
    }

    fn logo_rect(&self, spec: &LogoSpec) -> Rect {
        let edge = self.w * spec.size.width_fraction();
        let mx = self.w * LOGO_MARGIN_X;
        let my = self.h * LOGO_MARGIN_Y;
        let left = mx;
        let center_x = (self.w - edge) / 2.0;
        let right = self.w - mx - edge;
        let top = my;
        let bottom = self.h - my - edge;
        let (x, y) = match spec.position {
            LogoPosition::TopLeft => (left, top),
            LogoPosition::TopCenter => (center_x, top),
            LogoPosition::TopRight => (right, top),
            LogoPosition::Center => (center_x, (self.h - edge) / 2.0),
            LogoPosition::BottomLeft => (left, bottom),
            LogoPosition::BottomCenter => (center_x, bottom),
            LogoPosition::BottomRight => (right, bottom),
        };
        Rect::new(x, y, edge, edge)
    }
}

/// Ease-out progress of the logo entry animation in `[0, 1]`.
fn animation_progress(elapsed_ms: u64) -> f32 {
    let t = (elapsed_ms as f32 / LogoAnimation::DURATION_MS as f32).clamp(0.0, 1.0);
    1.0 - (1.0 - t).powi(3)
}

fn grow(shape: Shape, by: f32) -> Shape {
    match shape {
        Shape::Rounded { radius } => Shape::Rounded { radius: radius + by },
        other => other,
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Scale `handle` to fit inside `area` (centered) and draw it.
fn draw_fitted(frame: &mut RasterFrame, handle: &AssetHandle, area: Rect, opacity: f32, mask: Option<(Rect, Shape)>) {
    if area.w < 2.0 || area.h < 2.0 {
        return;
    }
    let fit = letterbox(handle.width(), handle.height(), area.w as u32, area.h as u32);
    let scaled = if fit.scaled_width == handle.width() && fit.scaled_height == handle.height() {
        handle.image.clone()
    } else {
        imageops::resize(&handle.image, fit.scaled_width, fit.scaled_height, FilterType::Triangle)
    };
    let x = (area.x + fit.pad_x as f32).round() as i64;
    let y = (area.y + fit.pad_y as f32).round() as i64;
    frame.draw_image(&scaled, x, y, opacity, mask);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_animation_progress_bounds() {
        assert_eq!(animation_progress(0), 0.0);
        assert_eq!(animation_progress(600), 1.0);
        assert_eq!(animation_progress(60_000), 1.0);
        assert!(animation_progress(300) > 0.5);
    }

    #[test]
    fn test_logo_rect_corners() {
        let layout = Layout::new(1080, 1920, 1.0);
        let mut spec = LogoSpec::new("l.png");
        spec.position = LogoPosition::TopLeft;
        let tl = layout.logo_rect(&spec);
        assert!((tl.x - 1080.0 * LOGO_MARGIN_X).abs() < 1e-3);
        assert!((tl.w - 216.0).abs() < 1e-3);
        spec.position = LogoPosition::BottomRight;
        let br = layout.logo_rect(&spec);
        assert!((br.right() - (1080.0 - 1080.0 * LOGO_MARGIN_X)).abs() < 1e-3);
        assert!((br.bottom() - (1920.0 - 1920.0 * LOGO_MARGIN_Y)).abs() < 1e-3);
    }

    #[test]
    fn test_clip_overlay_asset_ids() {
        let overlay = ClipOverlay {
            logo: Some(LogoSpec::new("logo.png")),
            footer: Some(FooterMark {
                asset: Some("ally.png".into()),
                text: None,
            }),
            ..ClipOverlay::default()
        };
        assert_eq!(overlay.asset_ids(), vec!["logo.png", "ally.png"]);
        assert_eq!(overlay.with_subtitle(Some("x".into())).subtitle.as_deref(), Some("x"));
    }
}
