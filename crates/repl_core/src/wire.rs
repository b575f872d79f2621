//! Modification-frame codec.
//!
//! Payload layout (little-endian):
//! ```text
//! i32  clear_count
//! i32  previous_modification_count
//! i32  frame_count               -- <= 64
//! i32  total_modification_count
//! repeat frame_count times:
//!     u8     operator            -- 0 = Add, 1 = Subtract
//!     u64    resource
//!     shape  (registry index + payload)
//! ```

use crate::server::MAX_FRAME_MODIFICATIONS;
use anyhow::{bail, ensure, Context, Result};
use sdf_shape::{read_shape, write_shape, Shape};
use world_core::{ModificationLog, ResourceId, SdfOp};

/// A decoded modification frame.
#[derive(Debug)]
pub struct ModificationFrame {
    pub clear_count: i32,
    pub previous_count: i32,
    pub total_count: i32,
    pub entries: Vec<(SdfOp, ResourceId, Shape)>,
}

/// Encode `count` modifications starting at `start` into a frame payload.
/// The count is clamped to the log length and the frame cap.
#[must_use]
pub fn encode_frame(log: &ModificationLog, start: usize, count: usize) -> Vec<u8> {
    let mods = log.range(start, count.min(MAX_FRAME_MODIFICATIONS));
    let mut out = Vec::new();
    out.extend_from_slice(&log.clear_count().to_le_bytes());
    out.extend_from_slice(&(start as i32).to_le_bytes());
    out.extend_from_slice(&(mods.len() as i32).to_le_bytes());
    out.extend_from_slice(&(log.len() as i32).to_le_bytes());
    for m in mods {
        out.push(m.op.to_wire());
        out.extend_from_slice(&m.resource.0.to_le_bytes());
        write_shape(&m.shape, &mut out);
    }
    out
}

/// Decode a frame payload. The payload must be fully consumed.
pub fn decode_frame(payload: &[u8]) -> Result<ModificationFrame> {
    let mut inp = payload;
    let clear_count = read_i32(&mut inp)?;
    let previous_count = read_i32(&mut inp)?;
    let frame_count = read_i32(&mut inp)?;
    let total_count = read_i32(&mut inp)?;
    ensure!(
        (0..=MAX_FRAME_MODIFICATIONS as i32).contains(&frame_count),
        "frame_count {frame_count} out of range"
    );
    ensure!(previous_count >= 0, "negative previous_count");
    ensure!(total_count >= previous_count, "total below previous");
    let mut entries = Vec::with_capacity(frame_count as usize);
    for i in 0..frame_count {
        let op = take::<1>(&mut inp)?[0];
        let op = SdfOp::from_wire(op)
            .with_context(|| format!("entry {i}: unknown operator {op}"))?;
        let resource = ResourceId(u64::from_le_bytes(take::<8>(&mut inp)?));
        let shape = read_shape(&mut inp).with_context(|| format!("entry {i}"))?;
        entries.push((op, resource, shape));
    }
    ensure!(inp.is_empty(), "trailing bytes after frame");
    Ok(ModificationFrame {
        clear_count,
        previous_count,
        total_count,
        entries,
    })
}

fn read_i32(inp: &mut &[u8]) -> Result<i32> {
    Ok(i32::from_le_bytes(take::<4>(inp)?))
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

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use world_core::Modification;

    fn sample_log(n: usize) -> ModificationLog {
        let mut log = ModificationLog::default();
        for i in 0..n {
            log.push(Modification {
                op: if i % 2 == 0 { SdfOp::Add } else { SdfOp::Subtract },
                resource: ResourceId(1 + (i % 3) as u64),
                shape: Shape::Sphere {
                    center: Vec3::splat(i as f32),
                    radius: 1.0 + i as f32,
                },
            });
        }
        log
    }

    #[test]
    fn frame_round_trip() {
        let log = sample_log(5);
        let payload = encode_frame(&log, 1, 3);
        let frame = decode_frame(&payload).expect("decode");
        assert_eq!(frame.clear_count, 0);
        assert_eq!(frame.previous_count, 1);
        assert_eq!(frame.total_count, 5);
        assert_eq!(frame.entries.len(), 3);
        for (i, (op, resource, shape)) in frame.entries.iter().enumerate() {
            let m = &log.entries()[1 + i];
            assert_eq!(*op, m.op);
            assert_eq!(*resource, m.resource);
            assert_eq!(*shape, m.shape);
        }
    }

    #[test]
    fn frames_never_exceed_the_cap() {
        let log = sample_log(100);
        let payload = encode_frame(&log, 0, usize::MAX);
        let frame = decode_frame(&payload).expect("decode");
        assert_eq!(frame.entries.len(), MAX_FRAME_MODIFICATIONS);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let log = sample_log(2);
        let mut payload = encode_frame(&log, 0, 2);
        payload.truncate(payload.len() - 3);
        assert!(decode_frame(&payload).is_err());
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let log = sample_log(1);
        let mut payload = encode_frame(&log, 0, 1);
        payload.push(0xFF);
        assert!(decode_frame(&payload).is_err());
    }
}
