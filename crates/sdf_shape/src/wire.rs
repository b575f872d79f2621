//! Wire codec for shapes: `(u32 index, payload)` with indices assigned by
//! sorting canonical variant names.
//!
//! The registry is built once and sorted lexicographically, so every peer
//! derives the same index for the same variant without negotiation. Writing
//! an unregistered variant is a programmer error and fatal; reading an
//! unknown index is a protocol error and recoverable.

use crate::{CellularNoise, Shape};
use anyhow::{bail, Context, Result};
use glam::{Mat4, Vec3};
use std::sync::OnceLock;

/// Composite shapes nest; deeper payloads than this are rejected on read.
const MAX_SHAPE_DEPTH: u32 = 32;

struct Variant {
    name: &'static str,
    read: fn(&mut &[u8], u32) -> Result<Shape>,
}

/// Registration list; order here is irrelevant, the sort decides indices.
fn variants() -> &'static [Variant] {
    static REGISTRY: OnceLock<Vec<Variant>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut v = vec![
            Variant {
                name: "box",
                read: read_box,
            },
            Variant {
                name: "sphere",
                read: read_sphere,
            },
            Variant {
                name: "capsule",
                read: read_capsule,
            },
            Variant {
                name: "half_plane",
                read: read_half_plane,
            },
            Variant {
                name: "cellular",
                read: read_cellular,
            },
            Variant {
                name: "translate",
                read: read_translate,
            },
            Variant {
                name: "transformed",
                read: read_transformed,
            },
            Variant {
                name: "intersect",
                read: read_intersect,
            },
        ];
        v.sort_by(|a, b| a.name.cmp(b.name));
        v
    })
}

fn canonical_name(shape: &Shape) -> &'static str {
    match shape {
        Shape::Box { .. } => "box",
        Shape::Sphere { .. } => "sphere",
        Shape::Capsule { .. } => "capsule",
        Shape::HalfPlane { .. } => "half_plane",
        Shape::Cellular(_) => "cellular",
        Shape::Translate { .. } => "translate",
        Shape::Transformed { .. } => "transformed",
        Shape::Intersect { .. } => "intersect",
    }
}

fn index_of(name: &str) -> u32 {
    match variants().binary_search_by(|v| v.name.cmp(name)) {
        Ok(i) => u32::try_from(i).expect("registry fits u32"),
        Err(_) => {
            // Closed enum: only reachable if a variant was added without a
            // registry entry. Fatal by contract.
            log::error!("shape variant '{name}' missing from the wire registry");
            panic!("unregistered shape variant: {name}");
        }
    }
}

/// Append `(index, payload)` for `shape` to `out`.
pub fn write_shape(shape: &Shape, out: &mut Vec<u8>) {
    out.extend_from_slice(&index_of(canonical_name(shape)).to_le_bytes());
    match shape {
        Shape::Box {
            center,
            half_extents,
        } => {
            write_vec3(*center, out);
            write_vec3(*half_extents, out);
        }
        Shape::Sphere { center, radius } => {
            write_vec3(*center, out);
            out.extend_from_slice(&radius.to_le_bytes());
        }
        Shape::Capsule { a, b, radius } => {
            write_vec3(*a, out);
            write_vec3(*b, out);
            out.extend_from_slice(&radius.to_le_bytes());
        }
        Shape::HalfPlane { normal, offset } => {
            write_vec3(*normal, out);
            out.extend_from_slice(&offset.to_le_bytes());
        }
        Shape::Cellular(n) => {
            out.extend_from_slice(&n.seed.to_le_bytes());
            write_vec3(n.cell_size, out);
            out.extend_from_slice(&n.distance_offset.to_le_bytes());
            out.push(n.dimensions);
        }
        Shape::Translate { offset, inner } => {
            write_vec3(*offset, out);
            write_shape(inner, out);
        }
        Shape::Transformed { matrix, inner, .. } => {
            for c in matrix.to_cols_array() {
                out.extend_from_slice(&c.to_le_bytes());
            }
            write_shape(inner, out);
        }
        Shape::Intersect { a, b } => {
            write_shape(a, out);
            write_shape(b, out);
        }
    }
}

/// Decode one shape from the front of `inp`, advancing it.
pub fn read_shape(inp: &mut &[u8]) -> Result<Shape> {
    read_shape_depth(inp, 0)
}

fn read_shape_depth(inp: &mut &[u8], depth: u32) -> Result<Shape> {
    if depth > MAX_SHAPE_DEPTH {
        bail!("shape nesting exceeds {MAX_SHAPE_DEPTH}");
    }
    let index = u32::from_le_bytes(take::<4>(inp)?);
    let variant = variants()
        .get(index as usize)
        .with_context(|| format!("unregistered shape index {index}"))?;
    (variant.read)(inp, depth)
}

fn read_box(inp: &mut &[u8], _depth: u32) -> Result<Shape> {
    Ok(Shape::Box {
        center: read_vec3(inp)?,
        half_extents: read_vec3(inp)?,
    })
}

fn read_sphere(inp: &mut &[u8], _depth: u32) -> Result<Shape> {
    Ok(Shape::Sphere {
        center: read_vec3(inp)?,
        radius: read_f32(inp)?,
    })
}

fn read_capsule(inp: &mut &[u8], _depth: u32) -> Result<Shape> {
    Ok(Shape::Capsule {
        a: read_vec3(inp)?,
        b: read_vec3(inp)?,
        radius: read_f32(inp)?,
    })
}

fn read_half_plane(inp: &mut &[u8], _depth: u32) -> Result<Shape> {
    Ok(Shape::HalfPlane {
        normal: read_vec3(inp)?,
        offset: read_f32(inp)?,
    })
}

fn read_cellular(inp: &mut &[u8], _depth: u32) -> Result<Shape> {
    let seed = u32::from_le_bytes(take::<4>(inp)?);
    let cell_size = read_vec3(inp)?;
    let distance_offset = read_f32(inp)?;
    let dimensions = take::<1>(inp)?[0];
    if dimensions != 2 && dimensions != 3 {
        bail!("cellular dimensions must be 2 or 3, got {dimensions}");
    }
    Ok(Shape::Cellular(CellularNoise {
        seed,
        cell_size,
        distance_offset,
        dimensions,
    }))
}

fn read_translate(inp: &mut &[u8], depth: u32) -> Result<Shape> {
    Ok(Shape::Translate {
        offset: read_vec3(inp)?,
        inner: Box::new(read_shape_depth(inp, depth + 1)?),
    })
}

fn read_transformed(inp: &mut &[u8], depth: u32) -> Result<Shape> {
    let mut cols = [0.0f32; 16];
    for c in &mut cols {
        *c = read_f32(inp)?;
    }
    let matrix = Mat4::from_cols_array(&cols);
    Ok(Shape::Transformed {
        inverse: matrix.inverse(),
        matrix,
        inner: Box::new(read_shape_depth(inp, depth + 1)?),
    })
}

fn read_intersect(inp: &mut &[u8], depth: u32) -> Result<Shape> {
    Ok(Shape::Intersect {
        a: Box::new(read_shape_depth(inp, depth + 1)?),
        b: Box::new(read_shape_depth(inp, depth + 1)?),
    })
}

fn write_vec3(v: Vec3, out: &mut Vec<u8>) {
    out.extend_from_slice(&v.x.to_le_bytes());
    out.extend_from_slice(&v.y.to_le_bytes());
    out.extend_from_slice(&v.z.to_le_bytes());
}

fn read_vec3(inp: &mut &[u8]) -> Result<Vec3> {
    Ok(Vec3::new(read_f32(inp)?, read_f32(inp)?, read_f32(inp)?))
}

fn read_f32(inp: &mut &[u8]) -> Result<f32> {
    Ok(f32::from_le_bytes(take::<4>(inp)?))
}

fn take<const N: usize>(inp: &mut &[u8]) -> Result<[u8; N]> {
    if inp.len() < N {
        bail!("short read");
    }
    let (a, b) = inp.split_at(N);
    *inp = b;
    let mut buf = [0u8; N];
    buf.copy_from_slice(a);
    Ok(buf)
}
