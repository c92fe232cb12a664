//! Building scene lists from listing content.
//!
//! The UI layer supplies plain records (property data, branding, user
//! settings). This module turns them into the timed scene list consumed by
//! the encoders: one scene per photo plus a closing summary scene.

use serde::{Deserialize, Serialize};

use reelkit_common::error::{ReelError, ReelResult};

use crate::color::Color;
use crate::scene::{
    BrandPalette, FooterMark, GradientDirection, GradientSpec, IconChip, LogoAnimation,
    LogoBackground, LogoPosition, LogoShape, LogoSize, LogoSpec, SceneDescriptor, TextStack,
    TimedScene, VisualLayers,
};

/// Listing content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyData {
    pub title: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub beds: Option<u32>,
    #[serde(default)]
    pub baths: Option<f32>,
    #[serde(default)]
    pub area_sqft: Option<u32>,
    #[serde(default)]
    pub badge: Option<String>,
    /// Photo source ids in display order.
    pub photos: Vec<String>,
}

/// Branding of the agent/partner publishing the reel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllyConfig {
    pub brand_name: String,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default = "default_primary")]
    pub primary_color: Color,
    #[serde(default = "default_secondary")]
    pub secondary_color: Color,
    #[serde(default)]
    pub footer_logo: Option<String>,
    #[serde(default)]
    pub footer_text: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LogoSettings {
    pub position: LogoPosition,
    pub size: LogoSize,
    pub shape: LogoShape,
    pub background: LogoBackground,
    pub opacity: u8,
    pub animation: LogoAnimation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TextCompositionSettings {
    /// Typography multiplier.
    pub scale: f32,
    /// Show title/location on every photo, not only the first.
    pub repeat_headline: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientSettings {
    pub direction: GradientDirection,
    pub intensity: u8,
}

/// Everything needed to build a listing reel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingReelRequest {
    pub property: PropertyData,
    pub ally: AllyConfig,
    #[serde(default)]
    pub layers: VisualLayers,
    #[serde(default)]
    pub logo: LogoSettings,
    #[serde(default)]
    pub text: TextCompositionSettings,
    #[serde(default)]
    pub gradient: GradientSettings,
    #[serde(default = "default_photo_duration_ms")]
    pub photo_duration_ms: u64,
    #[serde(default = "default_summary_duration_ms")]
    pub summary_duration_ms: u64,
    #[serde(default = "default_max_photos")]
    pub max_photos: usize,
}

impl Default for LogoSettings {
    fn default() -> Self {
        Self {
            position: LogoPosition::TopLeft,
            size: LogoSize::Medium,
            shape: LogoShape::Rounded,
            background: LogoBackground::Flat,
            opacity: 100,
            animation: LogoAnimation::None,
        }
    }
}

impl Default for TextCompositionSettings {
    fn default() -> Self {
        Self {
            scale: 1.0,
            repeat_headline: false,
        }
    }
}

impl Default for GradientSettings {
    fn default() -> Self {
        let spec = GradientSpec::default();
        Self {
            direction: spec.direction,
            intensity: spec.intensity,
        }
    }
}

impl ListingReelRequest {
    pub fn new(property: PropertyData, ally: AllyConfig) -> Self {
        Self {
            property,
            ally,
            layers: VisualLayers::default(),
            logo: LogoSettings::default(),
            text: TextCompositionSettings::default(),
            gradient: GradientSettings::default(),
            photo_duration_ms: default_photo_duration_ms(),
            summary_duration_ms: default_summary_duration_ms(),
            max_photos: default_max_photos(),
        }
    }
}

/// Chips summarising the property (beds, baths, area).
pub fn property_chips(property: &PropertyData) -> Vec<IconChip> {
    let mut chips = Vec::new();
    if let Some(beds) = property.beds {
        chips.push(IconChip::new("beds", beds.to_string()));
    }
    if let Some(baths) = property.baths {
        let value = if baths.fract().abs() < f32::EPSILON {
            format!("{}", baths as u32)
        } else {
            format!("{baths:.1}")
        };
        chips.push(IconChip::new("baths", value));
    }
    if let Some(area) = property.area_sqft {
        chips.push(IconChip::new("sqft", area.to_string()));
    }
    chips
}

/// One scene per photo (up to `max_photos`) followed by a summary scene.
pub fn build_listing_scenes(request: &ListingReelRequest) -> ReelResult<Vec<TimedScene>> {
    let photos: Vec<&String> = request
        .property
        .photos
        .iter()
        .filter(|p| !p.trim().is_empty())
        .take(request.max_photos.max(1))
        .collect();
    if photos.is_empty() {
        return Err(ReelError::invalid_input("listing has no photos"));
    }
    if request.photo_duration_ms == 0 || request.summary_duration_ms == 0 {
        return Err(ReelError::invalid_input("scene durations must be positive"));
    }

    let base = base_scene(request);
    let property = &request.property;
    let mut scenes = Vec::with_capacity(photos.len() + 1);

    for (i, photo) in photos.iter().enumerate() {
        let mut scene = base.clone();
        scene.background = Some((*photo).clone());
        if i == 0 || request.text.repeat_headline {
            scene.text.title = Some(property.title.clone());
            scene.text.location = property.location.clone();
        }
        if i == 0 {
            scene.text.badge = property.badge.clone();
            scene.text.price = property.price.clone();
        }
        scenes.push(TimedScene::new(scene, request.photo_duration_ms));
    }

    let mut summary = base;
    summary.background = Some(photos[0].clone());
    summary.gradient = GradientSpec {
        direction: GradientDirection::Both,
        intensity: request.gradient.intensity.max(70),
    };
    summary.text = TextStack {
        title: Some(property.title.clone()),
        location: property.location.clone(),
        price: property.price.clone(),
        badge: property.badge.clone(),
        subtitle: Some(format!("Presented by {}", request.ally.brand_name)),
    };
    summary.chips = property_chips(property);
    scenes.push(TimedScene::new(summary, request.summary_duration_ms));

    Ok(scenes)
}

fn base_scene(request: &ListingReelRequest) -> SceneDescriptor {
    let ally = &request.ally;
    let logo = ally.logo.as_ref().map(|asset| LogoSpec {
        asset: asset.clone(),
        position: request.logo.position,
        size: request.logo.size,
        shape: request.logo.shape,
        background: request.logo.background,
        opacity: request.logo.opacity.min(100),
        animation: request.logo.animation,
    });
    let footer = if ally.footer_logo.is_some() || ally.footer_text.is_some() {
        Some(FooterMark {
            asset: ally.footer_logo.clone(),
            text: ally.footer_text.clone(),
        })
    } else {
        None
    };

    SceneDescriptor {
        gradient: GradientSpec {
            direction: request.gradient.direction,
            intensity: request.gradient.intensity.min(100),
        },
        logo,
        typography_scale: request.text.scale,
        footer,
        brand: BrandPalette {
            primary: ally.primary_color,
            secondary: ally.secondary_color,
            text: Color::WHITE,
        },
        layers: request.layers,
        ..SceneDescriptor::default()
    }
}

fn default_primary() -> Color {
    BrandPalette::default().primary
}

fn default_secondary() -> Color {
    BrandPalette::default().secondary
}

fn default_photo_duration_ms() -> u64 {
    2_000
}

fn default_summary_duration_ms() -> u64 {
    2_500
}

fn default_max_photos() -> usize {
    10
}
