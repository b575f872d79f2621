//! sdf_shape: analytic signed-distance shapes and their wire registry.
//!
//! Scope
//! - `Shape`: a closed set of analytic SDF variants (box, sphere/disc,
//!   capsule, half-plane, cellular noise) plus the `Translate`/`Transformed`/
//!   `Intersect` composition operators.
//! - `Aabb`: conservative world-space bounds; unbounded shapes report `None`.
//! - Wire registry: variants are assigned stable `u32` indices by sorting
//!   canonical names, so peers agree on indices without negotiation.
//!
//! Extending
//! - New variants register in `wire::variants()`; index stability follows from
//!   the lexicographic sort, so additions never renumber existing names on
//!   peers running the same build.

#![forbid(unsafe_code)]
#![deny(unsafe_op_in_unsafe_fn)]

mod noise;
mod wire;

pub use noise::CellularNoise;
pub use wire::{read_shape, write_shape};

use glam::{Mat4, Vec3};

/// Conservative axis-aligned bounds in world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    #[must_use]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Closed-interval overlap test; touching faces count as intersecting.
    #[inline]
    #[must_use]
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    #[inline]
    #[must_use]
    pub fn translated(&self, offset: Vec3) -> Aabb {
        Aabb::new(self.min + offset, self.max + offset)
    }

    /// Overlap region of two boxes; `None` when disjoint.
    #[must_use]
    pub fn intersection(&self, other: &Aabb) -> Option<Aabb> {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        if min.x <= max.x && min.y <= max.y && min.z <= max.z {
            Some(Aabb::new(min, max))
        } else {
            None
        }
    }
}

/// An analytic signed-distance shape in world space.
///
/// Negative samples are inside, positive outside. 2D layers sample on the
/// `z = 0` plane; shapes meant for 2D should be constant along z there
/// (the disc variant of `Sphere`, `Cellular` with two dimensions, etc.).
#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    /// Axis-aligned box (rectangle in 2D).
    Box { center: Vec3, half_extents: Vec3 },
    /// Sphere in 3D; disc when sampled on the `z = 0` plane.
    Sphere { center: Vec3, radius: f32 },
    /// Capsule around the segment `a..b` (line segment with radius in 2D).
    Capsule { a: Vec3, b: Vec3, radius: f32 },
    /// Half-space on the negative side of `dot(normal, p) = offset`.
    /// Unbounded: `bounds()` is `None`.
    HalfPlane { normal: Vec3, offset: f32 },
    /// Worley-style cellular noise. Unbounded: `bounds()` is `None`.
    Cellular(CellularNoise),
    /// Inner shape sampled at `p - offset`.
    Translate { offset: Vec3, inner: Box<Shape> },
    /// Inner shape sampled through the inverse transform. Under non-rigid
    /// transforms the result is a conservative distance bound, not exact.
    Transformed {
        matrix: Mat4,
        inverse: Mat4,
        inner: Box<Shape>,
    },
    /// Pointwise maximum of both distances; bounds are the overlap of both.
    Intersect { a: Box<Shape>, b: Box<Shape> },
}

impl Shape {
    /// Signed distance at `point` in world space.
    #[must_use]
    pub fn sample(&self, point: Vec3) -> f32 {
        match self {
            Shape::Box {
                center,
                half_extents,
            } => {
                let d = (point - *center).abs() - *half_extents;
                d.max(Vec3::ZERO).length() + d.max_element().min(0.0)
            }
            Shape::Sphere { center, radius } => (point - *center).length() - radius,
            Shape::Capsule { a, b, radius } => {
                let pa = point - *a;
                let ba = *b - *a;
                let h = (pa.dot(ba) / ba.length_squared().max(f32::EPSILON)).clamp(0.0, 1.0);
                (pa - ba * h).length() - radius
            }
            Shape::HalfPlane { normal, offset } => normal.dot(point) - offset,
            Shape::Cellular(noise) => noise.sample(point),
            Shape::Translate { offset, inner } => inner.sample(point - *offset),
            Shape::Transformed { inverse, inner, .. } => {
                inner.sample(inverse.transform_point3(point))
            }
            Shape::Intersect { a, b } => a.sample(point).max(b.sample(point)),
        }
    }

    /// Conservative bounds, or `None` for shapes that sample everywhere.
    ///
    /// Unbounded shapes are only applied where a caller clips them (the
    /// affected-chunk enumeration yields nothing for a bare `None`).
    #[must_use]
    pub fn bounds(&self) -> Option<Aabb> {
        match self {
            Shape::Box {
                center,
                half_extents,
            } => Some(Aabb::new(*center - *half_extents, *center + *half_extents)),
            Shape::Sphere { center, radius } => Some(Aabb::new(
                *center - Vec3::splat(*radius),
                *center + Vec3::splat(*radius),
            )),
            Shape::Capsule { a, b, radius } => Some(Aabb::new(
                a.min(*b) - Vec3::splat(*radius),
                a.max(*b) + Vec3::splat(*radius),
            )),
            Shape::HalfPlane { .. } | Shape::Cellular(_) => None,
            Shape::Translate { offset, inner } => inner.bounds().map(|b| b.translated(*offset)),
            Shape::Transformed { matrix, inner, .. } => {
                let b = inner.bounds()?;
                let corners = [
                    Vec3::new(b.min.x, b.min.y, b.min.z),
                    Vec3::new(b.max.x, b.min.y, b.min.z),
                    Vec3::new(b.min.x, b.max.y, b.min.z),
                    Vec3::new(b.max.x, b.max.y, b.min.z),
                    Vec3::new(b.min.x, b.min.y, b.max.z),
                    Vec3::new(b.max.x, b.min.y, b.max.z),
                    Vec3::new(b.min.x, b.max.y, b.max.z),
                    Vec3::new(b.max.x, b.max.y, b.max.z),
                ];
                let mut min = Vec3::splat(f32::INFINITY);
                let mut max = Vec3::splat(f32::NEG_INFINITY);
                for c in corners {
                    let w = matrix.transform_point3(c);
                    min = min.min(w);
                    max = max.max(w);
                }
                Some(Aabb::new(min, max))
            }
            Shape::Intersect { a, b } => match (a.bounds(), b.bounds()) {
                (Some(ba), Some(bb)) => {
                    // Disjoint operands mean the shape is empty; a degenerate
                    // box at the midpoint keeps enumeration a no-op.
                    ba.intersection(&bb).or_else(|| {
                        let p = (ba.min + bb.min) * 0.5;
                        Some(Aabb::new(p, p))
                    })
                }
                (Some(b), None) | (None, Some(b)) => Some(b),
                (None, None) => None,
            },
        }
    }

    /// Wrap in a translation. Chunks use this to move shapes into their
    /// local frame before sampling.
    #[must_use]
    pub fn translated(self, offset: Vec3) -> Shape {
        Shape::Translate {
            offset,
            inner: Box::new(self),
        }
    }

    /// Wrap in an affine transform. The inverse is computed once here.
    #[must_use]
    pub fn transformed(self, matrix: Mat4) -> Shape {
        Shape::Transformed {
            inverse: matrix.inverse(),
            matrix,
            inner: Box::new(self),
        }
    }

    /// Clip against another shape (pointwise max of distances).
    #[must_use]
    pub fn intersect(self, other: Shape) -> Shape {
        Shape::Intersect {
            a: Box::new(self),
            b: Box::new(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec3;

    #[test]
    fn box_distance_signs() {
        let s = Shape::Box {
            center: Vec3::ZERO,
            half_extents: vec3(2.0, 1.0, 1.0),
        };
        assert!(s.sample(Vec3::ZERO) < 0.0);
        assert!((s.sample(vec3(3.0, 0.0, 0.0)) - 1.0).abs() < 1e-6);
        assert!((s.sample(vec3(0.0, 0.0, 0.0)) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn sphere_bounds_enclose_surface() {
        let s = Shape::Sphere {
            center: vec3(1.0, 2.0, 3.0),
            radius: 4.0,
        };
        let b = s.bounds().unwrap();
        assert_eq!(b.min, vec3(-3.0, -2.0, -1.0));
        assert_eq!(b.max, vec3(5.0, 6.0, 7.0));
    }

    #[test]
    fn capsule_degenerate_segment_matches_sphere() {
        let c = Shape::Capsule {
            a: vec3(1.0, 0.0, 0.0),
            b: vec3(1.0, 0.0, 0.0),
            radius: 2.0,
        };
        let s = Shape::Sphere {
            center: vec3(1.0, 0.0, 0.0),
            radius: 2.0,
        };
        for p in [Vec3::ZERO, vec3(4.0, 0.0, 0.0), vec3(1.0, 5.0, 0.0)] {
            assert!((c.sample(p) - s.sample(p)).abs() < 1e-5);
        }
    }

    #[test]
    fn translate_shifts_samples_and_bounds() {
        let s = Shape::Sphere {
            center: Vec3::ZERO,
            radius: 1.0,
        }
        .translated(vec3(10.0, 0.0, 0.0));
        assert!(s.sample(vec3(10.0, 0.0, 0.0)) < 0.0);
        assert!(s.sample(Vec3::ZERO) > 0.0);
        let b = s.bounds().unwrap();
        assert_eq!(b.min.x, 9.0);
    }

    #[test]
    fn intersect_bounds_clip_unbounded_operand() {
        let clipped = Shape::Cellular(CellularNoise::new(1, vec3(4.0, 4.0, 4.0), 0.5, 3))
            .intersect(Shape::Box {
                center: Vec3::ZERO,
                half_extents: Vec3::splat(8.0),
            });
        let b = clipped.bounds().unwrap();
        assert_eq!(b.min, Vec3::splat(-8.0));
        assert_eq!(b.max, Vec3::splat(8.0));
    }

    #[test]
    fn transformed_applies_the_inverse_to_samples() {
        let s = Shape::Sphere {
            center: Vec3::ZERO,
            radius: 1.0,
        }
        .transformed(Mat4::from_translation(vec3(5.0, 0.0, 0.0)));
        assert!(s.sample(vec3(5.0, 0.0, 0.0)) < 0.0);
        assert!(s.sample(Vec3::ZERO) > 0.0);
        let b = s.bounds().unwrap();
        assert!((b.min.x - 4.0).abs() < 1e-5 && (b.max.x - 6.0).abs() < 1e-5);
    }

    #[test]
    fn half_plane_is_unbounded() {
        let s = Shape::HalfPlane {
            normal: Vec3::Y,
            offset: 0.0,
        };
        assert!(s.bounds().is_none());
        assert!(s.sample(vec3(0.0, -1.0, 0.0)) < 0.0);
        assert!(s.sample(vec3(0.0, 1.0, 0.0)) > 0.0);
    }
}
