//! Worley-style cellular noise: distance to the nearest jittered feature
//! point in a hashed integer grid.

use glam::Vec3;

/// Cellular (Worley) noise shape parameters.
///
/// Each grid cell owns one feature point, jittered inside the cell by
/// hashed per-axis fractions. The sample is the euclidean distance to the
/// nearest feature point minus `distance_offset`, so the field is solid in
/// a radius of `distance_offset` around every feature point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CellularNoise {
    pub seed: u32,
    /// World-space cell size per axis. Only x/y are read in 2D.
    pub cell_size: Vec3,
    /// Subtracted from the raw feature distance.
    pub distance_offset: f32,
    /// Sweep dimensionality: 2 or 3.
    pub dimensions: u8,
}

impl CellularNoise {
    #[must_use]
    pub fn new(seed: u32, cell_size: Vec3, distance_offset: f32, dimensions: u8) -> Self {
        debug_assert!(dimensions == 2 || dimensions == 3);
        Self {
            seed,
            cell_size,
            distance_offset,
            dimensions,
        }
    }

    /// `sqrt(min squared distance to a feature point) - distance_offset`.
    ///
    /// The full 3x3(x3) neighbour sweep is required: a feature point jittered
    /// to the far edge of a neighbouring cell can still be the nearest one.
    #[must_use]
    pub fn sample(&self, point: Vec3) -> f32 {
        let three_d = self.dimensions == 3;
        let cs = self.cell_size.max(Vec3::splat(f32::EPSILON));
        let p = if three_d {
            point / cs
        } else {
            Vec3::new(point.x / cs.x, point.y / cs.y, 0.0)
        };
        let cx = p.x.floor() as i32;
        let cy = p.y.floor() as i32;
        let cz = p.z.floor() as i32;
        let (z_lo, z_hi) = if three_d { (-1, 1) } else { (0, 0) };

        let mut best = f32::INFINITY;
        for dz in z_lo..=z_hi {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let (x, y, z) = (cx + dx, cy + dy, cz + dz);
                    let feature = Vec3::new(
                        x as f32 + cell_fraction(self.seed as i32, x, y, z),
                        y as f32 + cell_fraction(x, y, z, self.seed as i32),
                        if three_d {
                            z as f32 + cell_fraction(y, z, self.seed as i32, x)
                        } else {
                            0.0
                        },
                    );
                    let d = p - feature;
                    let d2 = if three_d {
                        d.length_squared()
                    } else {
                        d.x * d.x + d.y * d.y
                    };
                    best = best.min(d2);
                }
            }
        }
        // Distances are in cell units per axis; scale back by the smallest
        // axis so anisotropic cells stay conservative.
        best.sqrt() * cs.min_element() - self.distance_offset
    }
}

/// Hash four lattice arguments into a fraction in `[0, 1)`.
///
/// Callers rotate the argument order to derive independent per-axis
/// fractions from the same cell.
#[inline]
fn cell_fraction(a: i32, b: i32, c: i32, d: i32) -> f32 {
    let mut n = a
        .wrapping_mul(374_761_393)
        .wrapping_add(b.wrapping_mul(668_265_263))
        .wrapping_add(c.wrapping_mul(1_013_904_223))
        .wrapping_add(d.wrapping_mul(1_274_126_177));
    n = (n ^ (n >> 13)).wrapping_mul(1_103_515_245);
    ((n as u32 & 0xFFFF) as f32) / 65_536.0
}
