//! Amanatides & Woo DDA over a chunk's sample grid.
//!
//! Walks sample cells along a ray in chunk-local space and reports the
//! first sample whose decoded distance is at or below zero. Guards against
//! zero direction components and starting inside the surface.

use crate::{Dimension, SampleArray, ENCODED_ZERO};
use glam::{UVec3, Vec3};

/// First inside sample hit by a ray.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldHit {
    pub sample: UVec3,
}

/// Cast a ray through the sample grid. `origin` and `dir` are chunk-local;
/// `max_dist` is in world units.
#[must_use]
pub fn raycast(array: &SampleArray, origin: Vec3, dir: Vec3, max_dist: f32) -> Option<FieldHit> {
    if dir.length_squared() <= 1e-12 {
        return None;
    }
    let unit = array.quality().unit_size();
    let size = array.size();
    let two_d = array.quality().dimension == Dimension::Two;
    let d = dir.normalize();
    // Grid space: one cell per sample, margin shifted to the origin.
    let o = origin / unit + Vec3::splat(crate::MARGIN as f32);

    let mut x = o.x.floor() as i32;
    let mut y = o.y.floor() as i32;
    let mut z = if two_d { 0 } else { o.z.floor() as i32 };

    let inside_grid = |x: i32, y: i32, z: i32| -> bool {
        x >= 0
            && y >= 0
            && z >= 0
            && (x as u32) < size.x
            && (y as u32) < size.y
            && (z as u32) < size.z
    };
    let solid = |a: &SampleArray, x: i32, y: i32, z: i32| -> bool {
        a.samples()[a.index(x as u32, y as u32, z as u32)] <= ENCODED_ZERO
    };

    if inside_grid(x, y, z) && solid(array, x, y, z) {
        return Some(FieldHit {
            sample: UVec3::new(x as u32, y as u32, z as u32),
        });
    }

    let step = |c: f32| -> i32 {
        if c > 0.0 {
            1
        } else if c < 0.0 {
            -1
        } else {
            0
        }
    };
    let (step_x, step_y) = (step(d.x), step(d.y));
    let step_z = if two_d { 0 } else { step(d.z) };

    let inf = f32::INFINITY;
    let next_boundary = |p: f32, dir: i32| -> f32 {
        let f = p - p.floor();
        if dir > 0 {
            1.0 - f
        } else {
            f
        }
    };
    let mut t_max_x = if step_x == 0 {
        inf
    } else {
        next_boundary(o.x, step_x) / d.x.abs()
    };
    let mut t_max_y = if step_y == 0 {
        inf
    } else {
        next_boundary(o.y, step_y) / d.y.abs()
    };
    let mut t_max_z = if step_z == 0 {
        inf
    } else {
        next_boundary(o.z, step_z) / d.z.abs()
    };
    let t_delta_x = if step_x == 0 { inf } else { 1.0 / d.x.abs() };
    let t_delta_y = if step_y == 0 { inf } else { 1.0 / d.y.abs() };
    let t_delta_z = if step_z == 0 { inf } else { 1.0 / d.z.abs() };

    let mut t = 0.0f32;
    let t_max = max_dist / unit;
    let safety_steps = (size.x as usize + size.y as usize + size.z as usize) * 4;
    for _ in 0..safety_steps {
        if t > t_max {
            break;
        }
        if t_max_x <= t_max_y && t_max_x <= t_max_z {
            x += step_x;
            t = t_max_x;
            t_max_x += t_delta_x;
        } else if t_max_y <= t_max_z {
            y += step_y;
            t = t_max_y;
            t_max_y += t_delta_y;
        } else {
            z += step_z;
            t = t_max_z;
            t_max_z += t_delta_z;
        }
        if !inside_grid(x, y, z) {
            return None;
        }
        if solid(array, x, y, z) {
            return Some(FieldHit {
                sample: UVec3::new(x as u32, y as u32, z as u32),
            });
        }
    }
    None
}
