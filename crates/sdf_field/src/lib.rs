//! sdf_field: margined, chunked distance-sample arrays with constructive ops.
//!
//! Scope
//! - `Quality`: per-layer sampling parameters (chunk size/resolution, clamp
//!   distance, dimension held as a value: 2 or 3).
//! - Quantisation: signed distances to one byte, smaller = more inside.
//! - `SampleArray`: one chunk's dense grid with a one-sample margin on every
//!   side, `add`/`subtract`/`clear`, a monotonic modification counter, and
//!   the raw-view seam for external mesh writers.
//! - `raycast`: DDA walk over the samples to the first inside sample.
//!
//! Extending
//! - Gradient sampling for normals if a mesh writer wants central
//!   differences without re-deriving strides.

#![forbid(unsafe_code)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod raycast;

use glam::{IVec3, UVec3, Vec3};
use sdf_shape::{Aabb, Shape};

/// Top of the encoded range. Even, so `encode(0)` sits exactly on the
/// midpoint and `encode(d) + encode(-d) == MAX_ENCODED` holds for every
/// representable `d`.
pub const MAX_ENCODED: u8 = 254;

/// Half of `MAX_ENCODED`; the encoding of distance zero.
pub const ENCODED_ZERO: u8 = 127;

/// One ring/shell of samples outside the nominal chunk extent, so
/// neighbouring chunks agree on boundary gradients.
pub const MARGIN: u32 = 1;

/// Dimensionality of a layer, carried as a value rather than a type
/// parameter. 2D arrays collapse the z axis to a single sample plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dimension {
    Two,
    Three,
}

/// Integer lattice index of a chunk within a layer. 2D layers use `z = 0`.
pub type ChunkKey = IVec3;

/// Immutable sampling parameters shared by every chunk of a layer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quality {
    /// World units per chunk edge.
    pub chunk_size: f32,
    /// Samples per chunk edge, excluding margin.
    pub chunk_resolution: u32,
    /// Distances at or beyond this are not written.
    pub max_distance: f32,
    pub dimension: Dimension,
}

impl Quality {
    /// World units between adjacent samples.
    #[inline]
    #[must_use]
    pub fn unit_size(&self) -> f32 {
        self.chunk_size / self.chunk_resolution as f32
    }

    /// Samples per axis: resolution, the margin on both sides, and the
    /// closing fence sample.
    #[inline]
    #[must_use]
    pub fn array_size(&self) -> u32 {
        self.chunk_resolution + 2 * MARGIN + 1
    }

    /// Quantise a signed distance. Monotonic, saturating, and exactly
    /// complementary: `encode(d) + encode(-d) == MAX_ENCODED`.
    #[inline]
    #[must_use]
    pub fn encode(&self, distance: f32) -> u8 {
        let steps = (f32::from(ENCODED_ZERO) * distance / self.max_distance).round();
        (f32::from(ENCODED_ZERO) + steps).clamp(0.0, f32::from(MAX_ENCODED)) as u8
    }

    /// Inverse of `encode` up to one quantisation step.
    #[inline]
    #[must_use]
    pub fn decode(&self, value: u8) -> f32 {
        (f32::from(value) - f32::from(ENCODED_ZERO)) / f32::from(ENCODED_ZERO) * self.max_distance
    }
}

/// Raw sample view handed to an external mesh writer.
///
/// `base_index` addresses the first non-margin sample; `stride` gives the
/// linear step per axis, so a writer can walk the nominal extent and still
/// reach the margin ring for boundary gradients.
pub struct SampleView<'a> {
    pub samples: &'a [u8],
    /// Array extents per axis, margin and fence included.
    pub size: UVec3,
    pub base_index: usize,
    pub stride: UVec3,
    pub resolution: u32,
    pub unit_size: f32,
    pub max_distance: f32,
    pub dimension: Dimension,
}

/// External mesh extraction seam. The core never meshes; it hands the raw
/// grid to whatever the host engine supplies here.
pub trait FieldMeshWriter {
    type Output;
    fn write_field(&mut self, view: &SampleView<'_>) -> Self::Output;
}

/// Constructive set operation applied to a sample array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldOp {
    Add,
    Subtract,
}

/// One chunk's dense, fully initialised grid of quantised distances.
///
/// Positions are chunk-local: sample `(i, j, k)` sits at
/// `((i, j, k) - margin) * unit_size`. An empty field is the constant
/// `MAX_ENCODED`.
#[derive(Clone)]
pub struct SampleArray {
    quality: Quality,
    size: UVec3,
    samples: Vec<u8>,
    modification_count: u64,
}

impl SampleArray {
    #[must_use]
    pub fn new(quality: Quality) -> Self {
        let n = quality.array_size();
        let size = match quality.dimension {
            Dimension::Two => UVec3::new(n, n, 1),
            Dimension::Three => UVec3::new(n, n, n),
        };
        let len = (size.x as usize) * (size.y as usize) * (size.z as usize);
        Self {
            quality,
            size,
            samples: vec![MAX_ENCODED; len],
            modification_count: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn quality(&self) -> &Quality {
        &self.quality
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> UVec3 {
        self.size
    }

    /// Raw bytes, x-major then y then z. Also the texture upload payload.
    #[inline]
    #[must_use]
    pub fn samples(&self) -> &[u8] {
        &self.samples
    }

    /// Strictly increases exactly when an operation changed at least one
    /// sample (`clear` counts unconditionally).
    #[inline]
    #[must_use]
    pub fn modification_count(&self) -> u64 {
        self.modification_count
    }

    /// Linear index for sample coordinates.
    #[inline]
    #[must_use]
    pub fn index(&self, x: u32, y: u32, z: u32) -> usize {
        (x as usize)
            + (y as usize) * (self.size.x as usize)
            + (z as usize) * (self.size.x as usize) * (self.size.y as usize)
    }

    /// Chunk-local world position of a sample.
    #[inline]
    #[must_use]
    pub fn position(&self, x: u32, y: u32, z: u32) -> Vec3 {
        let u = self.quality.unit_size();
        let m = MARGIN as f32;
        match self.quality.dimension {
            Dimension::Two => Vec3::new((x as f32 - m) * u, (y as f32 - m) * u, 0.0),
            Dimension::Three => Vec3::new(
                (x as f32 - m) * u,
                (y as f32 - m) * u,
                (z as f32 - m) * u,
            ),
        }
    }

    /// Union the shape into the field. Returns whether any sample changed.
    pub fn add(&mut self, shape: &Shape) -> bool {
        self.apply(shape, FieldOp::Add)
    }

    /// Carve the shape out of the field. Returns whether any sample changed.
    pub fn subtract(&mut self, shape: &Shape) -> bool {
        self.apply(shape, FieldOp::Subtract)
    }

    /// Reset every sample; bumps the counter unconditionally.
    pub fn clear(&mut self, solid: bool) {
        let v = if solid { 0 } else { MAX_ENCODED };
        self.samples.fill(v);
        self.modification_count += 1;
    }

    fn apply(&mut self, shape: &Shape, op: FieldOp) -> bool {
        let (lo, hi) = match shape.bounds() {
            Some(b) => match self.sample_range(&b) {
                Some(r) => r,
                None => return false,
            },
            // Unbounded shapes sample the whole array; enumeration of
            // affected chunks is where unbounded means "nowhere".
            None => (UVec3::ZERO, self.size),
        };
        let max_d = self.quality.max_distance;
        let mut changed = false;
        for z in lo.z..hi.z {
            for y in lo.y..hi.y {
                for x in lo.x..hi.x {
                    let s = shape.sample(self.position(x, y, z));
                    if s >= max_d {
                        continue;
                    }
                    let e = self.quality.encode(s);
                    let i = self.index(x, y, z);
                    let old = self.samples[i];
                    let new = match op {
                        FieldOp::Add => old.min(e),
                        FieldOp::Subtract => old.max(MAX_ENCODED - e),
                    };
                    if new != old {
                        self.samples[i] = new;
                        changed = true;
                    }
                }
            }
        }
        if changed {
            self.modification_count += 1;
        }
        changed
    }

    /// Convert chunk-local world bounds to a half-open sample index range,
    /// margin included on both sides, clamped to the array.
    ///
    /// Returns `None` when the range is empty on any axis.
    #[must_use]
    pub fn sample_range(&self, bounds: &Aabb) -> Option<(UVec3, UVec3)> {
        let u = self.quality.unit_size();
        let m = MARGIN as i32;
        let lo_axis = |w: f32, size: u32| -> i32 {
            ((w / u).floor() as i32 + m).clamp(0, size as i32)
        };
        let hi_axis = |w: f32, size: u32| -> i32 {
            ((w / u).ceil() as i32 + m + 1).clamp(0, size as i32)
        };
        let (lo, hi) = match self.quality.dimension {
            Dimension::Two => (
                IVec3::new(
                    lo_axis(bounds.min.x, self.size.x),
                    lo_axis(bounds.min.y, self.size.y),
                    0,
                ),
                IVec3::new(
                    hi_axis(bounds.max.x, self.size.x),
                    hi_axis(bounds.max.y, self.size.y),
                    1,
                ),
            ),
            Dimension::Three => (
                IVec3::new(
                    lo_axis(bounds.min.x, self.size.x),
                    lo_axis(bounds.min.y, self.size.y),
                    lo_axis(bounds.min.z, self.size.z),
                ),
                IVec3::new(
                    hi_axis(bounds.max.x, self.size.x),
                    hi_axis(bounds.max.y, self.size.y),
                    hi_axis(bounds.max.z, self.size.z),
                ),
            ),
        };
        if lo.x >= hi.x || lo.y >= hi.y || lo.z >= hi.z {
            return None;
        }
        Some((lo.as_uvec3(), hi.as_uvec3()))
    }

    /// Hand the raw grid to an external mesh writer.
    pub fn write_to<W: FieldMeshWriter>(&self, writer: &mut W) -> W::Output {
        writer.write_field(&self.view())
    }

    #[must_use]
    pub fn view(&self) -> SampleView<'_> {
        let sx = self.size.x as usize;
        let sy = self.size.y as usize;
        let base_z = match self.quality.dimension {
            Dimension::Two => 0,
            Dimension::Three => MARGIN,
        };
        SampleView {
            samples: &self.samples,
            size: self.size,
            base_index: self.index(MARGIN, MARGIN, base_z),
            stride: UVec3::new(1, sx as u32, (sx * sy) as u32),
            resolution: self.quality.chunk_resolution,
            unit_size: self.quality.unit_size(),
            max_distance: self.quality.max_distance,
            dimension: self.quality.dimension,
        }
    }
}
