//! Per-layer options with TOML loading, defaults, and clamping.

use crate::ResourceId;
use anyhow::{Context, Result};
use sdf_field::{Dimension, Quality};
use std::path::Path;

/// Sampling parameters as configured. Converted to `Quality` when a layer
/// is bound; immutable from then on.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    /// World units per chunk edge.
    pub chunk_size: f32,
    /// Samples per chunk edge, excluding margin.
    pub chunk_resolution: u32,
    /// Distance clamp in world units.
    pub max_distance: f32,
    /// 2 for planar layers, 3 for volumes.
    pub dimensions: u8,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            chunk_size: 16.0,
            chunk_resolution: 16,
            max_distance: 4.0,
            dimensions: 3,
        }
    }
}

impl QualitySettings {
    #[must_use]
    pub fn to_quality(&self) -> Quality {
        Quality {
            chunk_size: self.chunk_size,
            chunk_resolution: self.chunk_resolution,
            max_distance: self.max_distance,
            dimension: if self.dimensions == 2 {
                Dimension::Two
            } else {
                Dimension::Three
            },
        }
    }
}

/// Maps another layer's chunk texture onto this layer's shader attribute.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct TextureReference {
    pub source: ResourceId,
    pub attribute: String,
}

/// Everything a layer/volume is configured with.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct LayerOptions {
    pub quality: QualitySettings,
    /// `None` disables rendering.
    pub material: Option<String>,
    pub has_collision: bool,
    /// Suppresses mesh generation; the layer only feeds textures.
    pub is_texture_source_only: bool,
    /// Applied to every physics shape this layer creates.
    pub split_collision_tags: Vec<String>,
    pub referenced_textures: Vec<TextureReference>,
}

impl Default for LayerOptions {
    fn default() -> Self {
        Self {
            quality: QualitySettings::default(),
            material: None,
            has_collision: false,
            is_texture_source_only: false,
            split_collision_tags: Vec::new(),
            referenced_textures: Vec::new(),
        }
    }
}

impl LayerOptions {
    /// Rendering needs a material and a mesh.
    #[must_use]
    pub fn rendering_enabled(&self) -> bool {
        self.material.is_some() && !self.is_texture_source_only
    }

    #[must_use]
    pub fn collision_enabled(&self) -> bool {
        self.has_collision && !self.is_texture_source_only
    }

    /// Whether this layer pulls `source`'s chunk textures.
    #[must_use]
    pub fn references_texture_of(&self, source: ResourceId) -> Option<&TextureReference> {
        self.referenced_textures.iter().find(|r| r.source == source)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let parsed: LayerOptions = toml::from_str(text).context("parse layer options TOML")?;
        Ok(clamp(parsed))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        Self::from_toml_str(&text)
    }
}

fn clamp(mut o: LayerOptions) -> LayerOptions {
    if o.quality.chunk_resolution < 2 {
        o.quality.chunk_resolution = 2;
    }
    if o.quality.chunk_resolution > 256 {
        o.quality.chunk_resolution = 256;
    }
    if o.quality.chunk_size <= 0.0 {
        o.quality.chunk_size = 16.0;
    }
    if o.quality.dimensions != 2 && o.quality.dimensions != 3 {
        o.quality.dimensions = 3;
    }
    // The clamp range must at least span one sample step.
    let unit = o.quality.chunk_size / o.quality.chunk_resolution as f32;
    if o.quality.max_distance < unit {
        o.quality.max_distance = unit;
    }
    o
}
