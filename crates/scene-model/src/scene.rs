//! Scene descriptors: the immutable visual recipe for one rendered frame.
//!
//! A descriptor is produced once per render request and shared behind an
//! `Arc`. Nothing in the pipeline mutates it afterwards; rendering is a
//! pure function of the descriptor and the asset cache.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::color::Color;

/// Full visual description of one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDescriptor {
    /// Background image source id (path or URL).
    #[serde(default)]
    pub background: Option<String>,

    /// Fill used when there is no background image.
    #[serde(default = "default_background_color")]
    pub background_color: Color,

    #[serde(default)]
    pub gradient: GradientSpec,

    #[serde(default)]
    pub logo: Option<LogoSpec>,

    #[serde(default)]
    pub text: TextStack,

    /// Multiplier applied to every text size.
    #[serde(default = "default_typography_scale")]
    pub typography_scale: f32,

    #[serde(default)]
    pub chips: Vec<IconChip>,

    #[serde(default)]
    pub footer: Option<FooterMark>,

    #[serde(default)]
    pub brand: BrandPalette,

    #[serde(default)]
    pub layers: VisualLayers,
}

/// Direction of the darkening gradient overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradientDirection {
    None,
    Top,
    #[default]
    Bottom,
    Both,
}

/// Gradient overlay settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradientSpec {
    pub direction: GradientDirection,
    /// Strength in `[0, 100]`.
    pub intensity: u8,
}

impl Default for GradientSpec {
    fn default() -> Self {
        Self {
            direction: GradientDirection::Bottom,
            intensity: 60,
        }
    }
}

impl GradientSpec {
    /// Peak overlay alpha in `[0, 0.7]`.
    pub fn peak_alpha(&self) -> f32 {
        (self.intensity.min(100) as f32 / 100.0) * 0.7
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogoPosition {
    #[default]
    TopLeft,
    TopCenter,
    TopRight,
    Center,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogoSize {
    Small,
    #[default]
    Medium,
    Large,
}

impl LogoSize {
    /// Logo box edge as a fraction of frame width.
    pub fn width_fraction(self) -> f32 {
        match self {
            LogoSize::Small => 0.14,
            LogoSize::Medium => 0.20,
            LogoSize::Large => 0.28,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogoShape {
    Square,
    #[default]
    Rounded,
    Circle,
}

/// Plate drawn behind the logo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogoBackground {
    None,
    #[default]
    Flat,
    Frosted,
    Glow,
    Elevated,
    Gradient,
}

/// Entry animation for the logo, played over the start of each scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogoAnimation {
    #[default]
    None,
    Fade,
    Zoom,
}

impl LogoAnimation {
    /// Length of the entry animation.
    pub const DURATION_MS: u64 = 600;
}

/// Logo layer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogoSpec {
    /// Logo image source id.
    pub asset: String,
    #[serde(default)]
    pub position: LogoPosition,
    #[serde(default)]
    pub size: LogoSize,
    #[serde(default)]
    pub shape: LogoShape,
    #[serde(default)]
    pub background: LogoBackground,
    /// Opacity in `[0, 100]`.
    #[serde(default = "default_opacity")]
    pub opacity: u8,
    #[serde(default)]
    pub animation: LogoAnimation,
}

impl LogoSpec {
    pub fn new(asset: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            position: LogoPosition::default(),
            size: LogoSize::default(),
            shape: LogoShape::default(),
            background: LogoBackground::default(),
            opacity: default_opacity(),
            animation: LogoAnimation::default(),
        }
    }

    pub fn opacity_factor(&self) -> f32 {
        self.opacity.min(100) as f32 / 100.0
    }
}

/// Text content of a scene. Empty fields are simply not drawn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextStack {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Price label, drawn inside a pill in the brand primary colour.
    #[serde(default)]
    pub price: Option<String>,
    /// Short badge such as "Just listed".
    #[serde(default)]
    pub badge: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
}

/// Key/value chip, e.g. `("beds", "3")`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconChip {
    pub key: String,
    pub value: String,
}

impl IconChip {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Text shown on the chip.
    pub fn label(&self) -> String {
        format!("{} {}", self.value, self.key)
    }
}

/// Secondary branding drawn in the bottom-right corner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FooterMark {
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Brand colours.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BrandPalette {
    pub primary: Color,
    pub secondary: Color,
    pub text: Color,
}

impl Default for BrandPalette {
    fn default() -> Self {
        Self {
            primary: Color::rgb(0x1f, 0x6f, 0xeb),
            secondary: Color::rgb(0x0b, 0x1f, 0x3a),
            text: Color::WHITE,
        }
    }
}

/// Per-layer visibility flags. Turning a layer off never moves another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualLayers {
    pub gradient: bool,
    pub logo: bool,
    pub text: bool,
    pub price: bool,
    pub chips: bool,
    pub footer: bool,
}

impl Default for VisualLayers {
    fn default() -> Self {
        Self {
            gradient: true,
            logo: true,
            text: true,
            price: true,
            chips: true,
            footer: true,
        }
    }
}

impl Default for SceneDescriptor {
    fn default() -> Self {
        Self {
            background: None,
            background_color: default_background_color(),
            gradient: GradientSpec::default(),
            logo: None,
            text: TextStack::default(),
            typography_scale: default_typography_scale(),
            chips: Vec::new(),
            footer: None,
            brand: BrandPalette::default(),
            layers: VisualLayers::default(),
        }
    }
}

impl SceneDescriptor {
    /// Scene over a single background image.
    pub fn with_background(source_id: impl Into<String>) -> Self {
        Self {
            background: Some(source_id.into()),
            ..Self::default()
        }
    }

    /// Typography multiplier clamped to a sane range.
    pub fn effective_typography_scale(&self) -> f32 {
        if self.typography_scale.is_finite() {
            self.typography_scale.clamp(0.25, 4.0)
        } else {
            1.0
        }
    }

    /// Every asset source id the scene references, in layer order.
    pub fn asset_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        if let Some(bg) = &self.background {
            ids.push(bg.as_str());
        }
        if let Some(logo) = &self.logo {
            ids.push(logo.asset.as_str());
        }
        if let Some(asset) = self.footer.as_ref().and_then(|f| f.asset.as_deref()) {
            ids.push(asset);
        }
        ids
    }

    /// Whether the scene changes over time (logo entry animation).
    pub fn is_animated(&self) -> bool {
        self.layers.logo
            && self
                .logo
                .as_ref()
                .is_some_and(|logo| logo.animation != LogoAnimation::None)
    }
}

/// A scene with its on-screen duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedScene {
    pub scene: Arc<SceneDescriptor>,
    pub duration_ms: u64,
}

impl TimedScene {
    pub fn new(scene: SceneDescriptor, duration_ms: u64) -> Self {
        Self {
            scene: Arc::new(scene),
            duration_ms,
        }
    }
}

/// Total duration of a scene list in milliseconds.
pub fn total_duration_ms(scenes: &[TimedScene]) -> u64 {
    scenes.iter().map(|s| s.duration_ms).sum()
}

fn default_background_color() -> Color {
    Color::rgb(0x11, 0x11, 0x11)
}

fn default_typography_scale() -> f32 {
    1.0
}

fn default_opacity() -> u8 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gradient_peak_alpha() {
        let spec = GradientSpec {
            direction: GradientDirection::Both,
            intensity: 100,
        };
        assert!((spec.peak_alpha() - 0.7).abs() < 1e-6);
        let half = GradientSpec {
            intensity: 50,
            ..spec
        };
        assert!((half.peak_alpha() - 0.35).abs() < 1e-6);
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let scene: SceneDescriptor =
            serde_json::from_str(r#"{"background": "photos/1.jpg"}"#).unwrap();
        assert_eq!(scene.background.as_deref(), Some("photos/1.jpg"));
        assert_eq!(scene.typography_scale, 1.0);
        assert!(scene.layers.text);
        assert_eq!(scene.gradient.direction, GradientDirection::Bottom);
    }

    #[test]
    fn test_asset_ids_in_layer_order() {
        let mut scene = SceneDescriptor::with_background("bg.jpg");
        scene.logo = Some(LogoSpec::new("logo.png"));
        scene.footer = Some(FooterMark {
            asset: Some("ally.png".to_string()),
            text: None,
        });
        assert_eq!(scene.asset_ids(), vec!["bg.jpg", "logo.png", "ally.png"]);
    }

    #[test]
    fn test_logo_spec_kebab_case_positions() {
        let spec: LogoSpec = serde_json::from_str(
            r#"{"asset": "l.png", "position": "bottom-right", "background": "glow", "animation": "zoom"}"#,
        )
        .unwrap();
        assert_eq!(spec.position, LogoPosition::BottomRight);
        assert_eq!(spec.background, LogoBackground::Glow);
        assert_eq!(spec.opacity, 100);
    }

    #[test]
    fn test_typography_scale_is_clamped() {
        let mut scene = SceneDescriptor::default();
        scene.typography_scale = f32::NAN;
        assert_eq!(scene.effective_typography_scale(), 1.0);
        scene.typography_scale = 10.0;
        assert_eq!(scene.effective_typography_scale(), 4.0);
    }

    #[test]
    fn test_is_animated_respects_layer_flag() {
        let mut scene = SceneDescriptor::default();
        let mut logo = LogoSpec::new("l.png");
        logo.animation = LogoAnimation::Fade;
        scene.logo = Some(logo);
        assert!(scene.is_animated());
        scene.layers.logo = false;
        assert!(!scene.is_animated());
    }
}
