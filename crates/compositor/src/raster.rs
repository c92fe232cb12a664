//! RGBA8 raster surface and the drawing primitives the compositor needs.
//!
//! Pixels are stored premultiplied. Frames produced by the compositor start
//! from an opaque background, so every finished frame is fully opaque and
//! the buffer can be handed to an encoder as plain RGBA.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgba, RgbaImage};

use reelkit_common::error::{ReelError, ReelResult};
use reelkit_scene_model::color::Color;

use crate::geometry::{cover_crop, letterbox, Rect};

pub type PremulRgba8 = [u8; 4];

/// Outline used for plates, pills and masks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Square,
    Rounded { radius: f32 },
    Circle,
}

/// How a shape is filled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Paint {
    Solid(Color),
    /// Top-to-bottom linear gradient across the shape's bounds.
    Vertical { top: Color, bottom: Color },
}

/// A rendered frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterFrame {
    image: RgbaImage,
}

impl RasterFrame {
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, Color::BLACK)
    }

    pub fn filled(width: u32, height: u32, color: Color) -> Self {
        let px = premultiply(Color {
            a: 255,
            ..color
        });
        Self {
            image: RgbaImage::from_pixel(width, height, Rgba(px)),
        }
    }

    /// Wrap a decoded straight-alpha image.
    pub fn from_image(mut image: RgbaImage) -> Self {
        for px in image.pixels_mut() {
            px.0 = premultiply(Color::rgba(px[0], px[1], px[2], px[3]));
        }
        Self { image }
    }

    /// Scale `src` to fit inside `width`x`height`, padding with `fill`.
    pub fn letterboxed(src: &RgbaImage, width: u32, height: u32, fill: Color) -> Self {
        let mut frame = Self::filled(width, height, fill);
        let fit = letterbox(src.width(), src.height(), width, height);
        if src.width() == fit.scaled_width && src.height() == fit.scaled_height {
            frame.draw_image(src, fit.pad_x as i64, fit.pad_y as i64, 1.0, None);
        } else {
            let scaled = imageops::resize(src, fit.scaled_width, fit.scaled_height, FilterType::Triangle);
            frame.draw_image(&scaled, fit.pad_x as i64, fit.pad_y as i64, 1.0, None);
        }
        frame
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Raw RGBA bytes, row-major.
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.image.get_pixel(x, y).0
    }

    /// Encode as PNG.
    pub fn encode_png(&self) -> ReelResult<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        self.image
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|e| ReelError::render(format!("PNG encode failed: {e}")))?;
        Ok(out.into_inner())
    }

    /// Cover-fit `src` over the whole frame.
    pub fn draw_cover(&mut self, src: &RgbaImage) {
        let (w, h) = (self.width(), self.height());
        let crop = cover_crop(src.width(), src.height(), w, h);
        let region = imageops::crop_imm(src, crop.x, crop.y, crop.width, crop.height).to_image();
        let scaled = if region.width() == w && region.height() == h {
            region
        } else {
            imageops::resize(&region, w, h, FilterType::Triangle)
        };
        self.draw_image(&scaled, 0, 0, 1.0, None);
    }

    /// Composite one premultiplied pixel with `coverage` in `[0, 1]`.
    pub fn blend_pixel(&mut self, x: i64, y: i64, src: PremulRgba8, coverage: f32) {
        if x < 0 || y < 0 || x >= self.width() as i64 || y >= self.height() as i64 {
            return;
        }
        let px = self.image.get_pixel_mut(x as u32, y as u32);
        px.0 = over(px.0, src, coverage);
    }

    /// Fill `rect` clipped to `shape`, with anti-aliased edges.
    pub fn fill_shape(&mut self, rect: Rect, shape: Shape, paint: Paint) {
        self.for_each_covered(rect, shape, |frame, x, y, coverage| {
            let color = match paint {
                Paint::Solid(c) => c,
                Paint::Vertical { top, bottom } => {
                    let t = if rect.h > 0.0 {
                        ((y as f32 + 0.5 - rect.y) / rect.h).clamp(0.0, 1.0)
                    } else {
                        0.0
                    };
                    Color::lerp(top, bottom, t)
                }
            };
            frame.blend_pixel(x, y, premultiply(color), coverage);
        });
    }

    /// Outline of `shape` with the given stroke width, drawn inside `rect`.
    pub fn stroke_shape(&mut self, rect: Rect, shape: Shape, width: f32, color: Color) {
        let inner = rect.inflate(-width);
        let inner_shape = match shape {
            Shape::Rounded { radius } => Shape::Rounded {
                radius: (radius - width).max(0.0),
            },
            other => other,
        };
        let src = premultiply(color);
        self.for_each_covered(rect, shape, |frame, x, y, outer| {
            let inside = coverage(inner, inner_shape, x, y);
            let ring = (outer - inside).clamp(0.0, 1.0);
            frame.blend_pixel(x, y, src, ring);
        });
    }

    /// Horizontal band whose alpha ramps linearly from `alpha_top` to
    /// `alpha_bottom` between rows `y0` and `y1`.
    pub fn vertical_ramp(&mut self, y0: f32, y1: f32, color: Color, alpha_top: f32, alpha_bottom: f32) {
        if y1 <= y0 {
            return;
        }
        let start = y0.floor().max(0.0) as u32;
        let end = (y1.ceil().max(0.0) as u32).min(self.height());
        for y in start..end {
            let t = ((y as f32 + 0.5 - y0) / (y1 - y0)).clamp(0.0, 1.0);
            let alpha = alpha_top + (alpha_bottom - alpha_top) * t;
            if alpha <= 0.0 {
                continue;
            }
            let src = premultiply(color.with_alpha_factor(alpha));
            for x in 0..self.width() {
                let px = self.image.get_pixel_mut(x, y);
                px.0 = over(px.0, src, 1.0);
            }
        }
    }

    /// Draw a straight-alpha image with its top-left corner at `(x, y)`.
    ///
    /// `mask` clips the image to a shape; pixels outside are left untouched.
    pub fn draw_image(&mut self, src: &RgbaImage, x: i64, y: i64, opacity: f32, mask: Option<(Rect, Shape)>) {
        if opacity <= 0.0 {
            return;
        }
        for (sx, sy, px) in src.enumerate_pixels() {
            if px[3] == 0 {
                continue;
            }
            let dx = x + sx as i64;
            let dy = y + sy as i64;
            let cov = match mask {
                Some((rect, shape)) => coverage(rect, shape, dx, dy),
                None => 1.0,
            };
            if cov <= 0.0 {
                continue;
            }
            let premul = premultiply(Color::rgba(px[0], px[1], px[2], px[3]));
            self.blend_pixel(dx, dy, premul, cov * opacity);
        }
    }

    /// Paint `color` through an 8-bit coverage bitmap (e.g. a glyph).
    pub fn draw_coverage(&mut self, bitmap: &[u8], width: usize, x: i64, y: i64, color: Color) {
        if width == 0 {
            return;
        }
        let src = premultiply(color);
        for (i, &c) in bitmap.iter().enumerate() {
            if c == 0 {
                continue;
            }
            let px = x + (i % width) as i64;
            let py = y + (i / width) as i64;
            self.blend_pixel(px, py, src, c as f32 / 255.0);
        }
    }

    fn for_each_covered(&mut self, rect: Rect, shape: Shape, mut f: impl FnMut(&mut Self, i64, i64, f32)) {
        if rect.w <= 0.0 || rect.h <= 0.0 {
            return;
        }
        let x0 = rect.x.floor().max(0.0) as i64;
        let y0 = rect.y.floor().max(0.0) as i64;
        let x1 = (rect.right().ceil() as i64).min(self.width() as i64);
        let y1 = (rect.bottom().ceil() as i64).min(self.height() as i64);
        for y in y0..y1 {
            for x in x0..x1 {
                let cov = coverage(rect, shape, x, y);
                if cov > 0.0 {
                    f(self, x, y, cov);
                }
            }
        }
    }
}

/// Fraction of pixel `(x, y)` inside `shape` fitted to `rect`.
pub fn coverage(rect: Rect, shape: Shape, x: i64, y: i64) -> f32 {
    let (cx, cy) = rect.center();
    let dx = (x as f32 + 0.5 - cx).abs();
    let dy = (y as f32 + 0.5 - cy).abs();
    let hw = rect.w / 2.0;
    let hh = rect.h / 2.0;
    let distance = match shape {
        Shape::Square => (dx - hw).max(dy - hh),
        Shape::Rounded { radius } => {
            let r = radius.clamp(0.0, hw.min(hh));
            let qx = dx - hw + r;
            let qy = dy - hh + r;
            let outside = (qx.max(0.0).powi(2) + qy.max(0.0).powi(2)).sqrt();
            outside + qx.max(qy).min(0.0) - r
        }
        Shape::Circle => (dx * dx + dy * dy).sqrt() - hw.min(hh),
    };
    (0.5 - distance).clamp(0.0, 1.0)
}

pub fn premultiply(color: Color) -> PremulRgba8 {
    let a = u16::from(color.a);
    [
        mul_div255(u16::from(color.r), a),
        mul_div255(u16::from(color.g), a),
        mul_div255(u16::from(color.b), a),
        color.a,
    ]
}

/// Source-over on premultiplied pixels.
pub fn over(dst: PremulRgba8, src: PremulRgba8, opacity: f32) -> PremulRgba8 {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 || src[3] == 0 {
        return dst;
    }

    let op = ((opacity * 255.0).round() as i32).clamp(0, 255) as u16;
    let sa = mul_div255(u16::from(src[3]), op);
    if sa == 0 {
        return dst;
    }

    let inv = 255u16 - u16::from(sa);
    let mut out = [0u8; 4];
    out[3] = sa.saturating_add(mul_div255(u16::from(dst[3]), inv));
    for i in 0..3 {
        let sc = mul_div255(u16::from(src[i]), op);
        let dc = mul_div255(u16::from(dst[i]), inv);
        out[i] = sc.saturating_add(dc);
    }
    out
}

fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}
