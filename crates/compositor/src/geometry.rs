//! Fit computations shared by the compositor and the clip normalizer.

/// Axis-aligned rectangle in pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn right(&self) -> f32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// Grow (or shrink, for negative `by`) on every side.
    pub fn inflate(&self, by: f32) -> Rect {
        Rect::new(self.x - by, self.y - by, self.w + 2.0 * by, self.h + 2.0 * by)
    }

    pub fn offset(&self, dx: f32, dy: f32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.w, self.h)
    }

    /// Same centre, dimensions multiplied by `factor`.
    pub fn scaled_about_center(&self, factor: f32) -> Rect {
        let (cx, cy) = self.center();
        let w = self.w * factor;
        let h = self.h * factor;
        Rect::new(cx - w / 2.0, cy - h / 2.0, w, h)
    }
}

/// Source region that, scaled uniformly, exactly covers the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverCrop {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Center-crop `src` so that it fills `dst` with no distortion.
///
/// The crop keeps the target aspect ratio; the discarded margins on opposite
/// sides differ by at most one pixel.
pub fn cover_crop(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> CoverCrop {
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return CoverCrop {
            x: 0,
            y: 0,
            width: src_w,
            height: src_h,
        };
    }

    let scale = f64::max(
        dst_w as f64 / src_w as f64,
        dst_h as f64 / src_h as f64,
    );
    let width = ((dst_w as f64 / scale).round() as u32).clamp(1, src_w);
    let height = ((dst_h as f64 / scale).round() as u32).clamp(1, src_h);

    CoverCrop {
        x: (src_w - width) / 2,
        y: (src_h - height) / 2,
        width,
        height,
    }
}

/// Placement of a source scaled to fit inside a target, padded to size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Letterbox {
    pub scaled_width: u32,
    pub scaled_height: u32,
    /// Left (and right) padding.
    pub pad_x: u32,
    /// Top (and bottom) padding.
    pub pad_y: u32,
}

impl Letterbox {
    pub fn is_padded(&self) -> bool {
        self.pad_x > 0 || self.pad_y > 0
    }
}

/// Scale `src` to fit inside `dst` preserving aspect ratio.
///
/// Scaled dimensions are rounded to even numbers (yuv420p needs them) and
/// never exceed the target, so padding is split evenly on both sides when
/// the target is itself even.
pub fn letterbox(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Letterbox {
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return Letterbox {
            scaled_width: dst_w,
            scaled_height: dst_h,
            pad_x: 0,
            pad_y: 0,
        };
    }

    let scale = f64::min(
        dst_w as f64 / src_w as f64,
        dst_h as f64 / src_h as f64,
    );
    let scaled_width = round_even(src_w as f64 * scale, dst_w);
    let scaled_height = round_even(src_h as f64 * scale, dst_h);

    Letterbox {
        scaled_width,
        scaled_height,
        pad_x: (dst_w - scaled_width) / 2,
        pad_y: (dst_h - scaled_height) / 2,
    }
}

fn round_even(value: f64, limit: u32) -> u32 {
    let cap = limit - limit % 2;
    if cap == 0 {
        return limit;
    }
    (((value / 2.0).round() as u32) * 2).clamp(2, cap)
}
